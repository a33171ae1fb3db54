//! Voice Tutor API Library Crate
//!
//! Everything behind the `api` binary: configuration, the Daily provisioner
//! and transport, the Gemini and OpenAI bot pipelines, the session registry,
//! the lifecycle controller and the HTTP routes.

pub mod audio_utils;
pub mod bot;
pub mod config;
pub mod daily;
pub mod handlers;
pub mod http_client;
pub mod lifecycle;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;
