//! Shared Application State

use crate::bot::PipelineFactory;
use crate::config::Config;
use crate::daily::RoomProvider;
use crate::registry::SessionRegistry;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub rooms: Arc<dyn RoomProvider>,
    pub pipelines: Arc<dyn PipelineFactory>,
    pub registry: SessionRegistry,
}
