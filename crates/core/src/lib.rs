//! Provider-independent building blocks for the voice tutor bot: the backend
//! selector, the tutor persona, and a small frame pipeline runtime with the
//! transport and model-service seams each backend plugs into.

pub mod backend;
pub mod context;
pub mod frames;
pub mod persona;
pub mod pipeline;
pub mod rtvi;
pub mod service;

pub use backend::BotImplementation;
pub use frames::Frame;
