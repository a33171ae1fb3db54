//! Axum Handlers for the REST API
//!
//! `/connect` provisions a room and launches a bot into it; `/health` is a
//! liveness probe. Both are documented with `utoipa`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{Instrument, error, info, info_span};
use tutor_core::BotImplementation;
use tutor_core::persona::StudyContext;

use crate::{
    bot::{BotParams, run_bot},
    daily::TOKEN_EXPIRY,
    models::{ConnectRequest, ConnectResponse, ErrorResponse, HealthResponse},
    registry::SessionInfo,
    state::AppState,
};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// The server lacks something the request needs, such as a backend credential.
    Configuration(String),
    /// Room or token creation failed at the provider.
    Provisioning(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            ApiError::Configuration(detail) => {
                error!(%detail, "Request rejected by server configuration");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
            ApiError::Provisioning(detail) => {
                error!(%detail, "Provisioning failed");
                (StatusCode::INTERNAL_SERVER_ERROR, detail)
            }
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}

/// Create a room and start a bot in it.
///
/// The bot runs in the background; the response only waits for the room and
/// token.
#[utoipa::path(
    post,
    path = "/connect",
    request_body = ConnectRequest,
    responses(
        (status = 200, description = "Room created and bot started", body = ConnectResponse),
        (status = 400, description = "Unsupported bot implementation", body = ErrorResponse),
        (status = 500, description = "Missing credential or provisioning failure", body = ErrorResponse)
    )
)]
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>, ApiError> {
    let implementation = match request.bot_implementation.as_deref().filter(|s| !s.is_empty()) {
        Some(requested) => requested
            .parse::<BotImplementation>()
            .map_err(|_| ApiError::BadRequest("impl must be gemini/openai".to_string()))?,
        None => state.config.bot_implementation,
    };
    if state.config.api_key_for(implementation).is_none() {
        return Err(ApiError::Configuration(format!(
            "No {} key",
            implementation.provider_name()
        )));
    }

    let room = state
        .rooms
        .create_room()
        .await
        .map_err(|e| ApiError::Provisioning(format!("Room creation failed: {}", e)))?;
    info!(room_url = %room.url, "Daily room created");
    let token = state
        .rooms
        .create_token(&room.url, TOKEN_EXPIRY)
        .await
        .map_err(|e| ApiError::Provisioning(format!("Token creation failed: {}", e)))?;

    let ConnectRequest {
        category, periods, ..
    } = request;
    let info = SessionInfo::new(
        room.url.clone(),
        implementation,
        category.clone(),
        periods.clone().unwrap_or_default(),
    );
    let params = BotParams {
        room_url: room.url.clone(),
        token: token.clone(),
        implementation,
        study: StudyContext::new(category, periods),
    };
    let pipelines = state.pipelines.clone();
    let handle = state.registry.spawn(info, move |session_id, cancel| {
        let span = info_span!(
            "bot_session",
            %session_id,
            room_url = %params.room_url,
            implementation = %params.implementation
        );
        async move {
            match pipelines.build(&params) {
                Ok(pipeline) => {
                    let _ = run_bot(pipeline, cancel).await;
                }
                Err(e) => error!(error = ?e, "Failed to build bot pipeline"),
            }
            info!("Bot finished");
        }
        .instrument(span)
    });
    info!(
        session_id = %handle.id(),
        room_url = %room.url,
        %implementation,
        "Bot session started"
    );

    Ok(Json(ConnectResponse {
        room_url: room.url,
        token,
        bot_implementation: implementation.to_string(),
    }))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::daily::{DailyError, DailyRoom, MockRoomProvider};
    use crate::router::create_router;
    use crate::testing::{StubPipelineFactory, app_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn room() -> DailyRoom {
        DailyRoom {
            id: Some("room-id".to_string()),
            name: "abc".to_string(),
            url: "https://x.daily.co/abc".to_string(),
            privacy: Some("public".to_string()),
        }
    }

    fn provisioning_rooms() -> MockRoomProvider {
        let mut rooms = MockRoomProvider::new();
        rooms.expect_create_room().times(1).returning(|| Ok(room()));
        rooms
            .expect_create_token()
            .withf(|url, expiry| url.to_string() == "https://x.daily.co/abc" && *expiry == TOKEN_EXPIRY)
            .times(1)
            .returning(|_, _| Ok("tok123".to_string()));
        rooms
    }

    fn unused_rooms() -> MockRoomProvider {
        let mut rooms = MockRoomProvider::new();
        rooms.expect_create_room().times(0);
        rooms.expect_create_token().times(0);
        rooms
    }

    async fn post_connect(state: Arc<AppState>, body: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/connect")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn connect_with_defaults_starts_one_session() {
        let factory = Arc::new(StubPipelineFactory::default());
        let state = app_state(Config::for_tests(), provisioning_rooms(), factory.clone());

        let (status, body) = post_connect(state.clone(), "{}").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "room_url": "https://x.daily.co/abc",
                "token": "tok123",
                "bot_implementation": "gemini"
            })
        );
        assert_eq!(state.registry.len(), 1);
        let session = &state.registry.list_all()[0];
        assert_eq!(session.info().room_url, "https://x.daily.co/abc");
        assert_eq!(session.info().implementation, BotImplementation::Gemini);

        state.registry.cancel_all();
        session.wait().await;
        let requests = factory.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].token, "tok123");
    }

    #[tokio::test]
    async fn explicit_backend_and_study_context_are_used() {
        let factory = Arc::new(StubPipelineFactory::default());
        let state = app_state(Config::for_tests(), provisioning_rooms(), factory.clone());

        let (status, body) = post_connect(
            state.clone(),
            r#"{"bot_implementation":"openai","category":"Histoire","periods":["Antiquité"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bot_implementation"], "openai");
        let session = &state.registry.list_all()[0];
        assert_eq!(session.info().category.as_deref(), Some("Histoire"));
        assert_eq!(session.info().periods, vec!["Antiquité".to_string()]);

        state.registry.cancel_all();
        session.wait().await;
        let study = &factory.requests()[0].study;
        assert!(study.system_instruction().contains("Histoire"));
    }

    #[tokio::test]
    async fn empty_backend_falls_back_to_default() {
        let mut config = Config::for_tests();
        config.bot_implementation = BotImplementation::OpenAI;
        let state = app_state(config, provisioning_rooms(), Arc::new(StubPipelineFactory::default()));

        let (status, body) = post_connect(state.clone(), r#"{"bot_implementation":""}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bot_implementation"], "openai");
        state.registry.cancel_all();
    }

    #[tokio::test]
    async fn unsupported_backend_is_rejected_before_provisioning() {
        for requested in ["claude", "Gemini", " openai"] {
            let state = app_state(
                Config::for_tests(),
                unused_rooms(),
                Arc::new(StubPipelineFactory::default()),
            );
            let body = serde_json::json!({ "bot_implementation": requested }).to_string();

            let (status, body) = post_connect(state.clone(), &body).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["detail"], "impl must be gemini/openai");
            assert!(state.registry.is_empty());
        }
    }

    #[tokio::test]
    async fn missing_backend_key_is_a_server_error() {
        let mut config = Config::for_tests();
        config.gemini_api_key = None;
        let state = app_state(config, unused_rooms(), Arc::new(StubPipelineFactory::default()));

        let (status, body) = post_connect(state.clone(), "{}").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["detail"], "No Gemini key");
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn room_failure_embeds_the_cause() {
        let mut rooms = MockRoomProvider::new();
        rooms
            .expect_create_room()
            .times(1)
            .returning(|| Err(DailyError::MissingApiKey));
        rooms.expect_create_token().times(0);
        let state = app_state(Config::for_tests(), rooms, Arc::new(StubPipelineFactory::default()));

        let (status, body) = post_connect(state.clone(), "{}").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            "Room creation failed: Daily API key is not configured"
        );
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn token_failure_embeds_the_cause() {
        let mut rooms = MockRoomProvider::new();
        rooms.expect_create_room().times(1).returning(|| Ok(room()));
        rooms
            .expect_create_token()
            .times(1)
            .returning(|_, _| Err(DailyError::ClientClosed));
        let state = app_state(Config::for_tests(), rooms, Arc::new(StubPipelineFactory::default()));

        let (status, body) = post_connect(state.clone(), "{}").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["detail"],
            "Token creation failed: the shared HTTP client has been closed"
        );
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn health_is_unconditional() {
        let state = app_state(
            Config::for_tests(),
            unused_rooms(),
            Arc::new(StubPipelineFactory::default()),
        );
        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({ "status": "healthy" }));
    }
}
