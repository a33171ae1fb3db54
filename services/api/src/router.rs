//! Axum Router Configuration
//!
//! HTTP routing for the application: the connect and health endpoints and
//! the OpenAPI documentation.

use crate::{
    handlers,
    models::{ConnectRequest, ConnectResponse, ErrorResponse, HealthResponse},
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(handlers::connect, handlers::health),
    components(schemas(ConnectRequest, ConnectResponse, HealthResponse, ErrorResponse)),
    tags(
        (name = "Voice Tutor API", description = "Provisioning of voice tutoring bots")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route("/connect", post(handlers::connect))
        .route("/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
