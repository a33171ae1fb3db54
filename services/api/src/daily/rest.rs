//! Thin client for the Daily REST API.

use crate::http_client::SharedHttpClient;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Lifetime of the meeting tokens handed to clients.
pub const TOKEN_EXPIRY: Duration = Duration::from_secs(86_400);

#[derive(Debug, thiserror::Error)]
pub enum DailyError {
    #[error("Daily API key is not configured")]
    MissingApiKey,
    #[error("the shared HTTP client has been closed")]
    ClientClosed,
    #[error("request to Daily failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Daily API returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("invalid room url `{0}`")]
    InvalidRoomUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyRoom {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub privacy: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyRoomParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub privacy: String,
    pub properties: DailyRoomProperties,
}

impl Default for DailyRoomParams {
    fn default() -> Self {
        Self {
            name: None,
            privacy: "public".to_string(),
            properties: DailyRoomProperties::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DailyRoomProperties {
    /// Room expiry as a unix timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    pub start_audio_off: bool,
    pub start_video_off: bool,
    pub enable_chat: bool,
    pub enable_prejoin_ui: bool,
}

#[derive(Serialize)]
struct MeetingTokenRequest<'a> {
    properties: MeetingTokenProperties<'a>,
}

#[derive(Serialize)]
struct MeetingTokenProperties<'a> {
    room_name: &'a str,
    exp: i64,
    is_owner: bool,
    eject_at_token_exp: bool,
}

#[derive(Deserialize)]
struct MeetingTokenResponse {
    token: String,
}

/// One participant currently in a room, as reported by the presence endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceParticipant {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Deserialize)]
struct PresenceResponse {
    #[serde(default)]
    data: Vec<PresenceParticipant>,
}

#[derive(Serialize)]
struct AppMessageRequest<'a> {
    data: &'a Value,
    recipient: &'a str,
}

/// Creates rooms and the tokens that let a participant join them.
///
/// Each call is a single outbound request with no retry. A failed call may
/// still have created something on the provider side.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomProvider: Send + Sync {
    async fn create_room(&self) -> Result<DailyRoom, DailyError>;

    async fn create_token(&self, room_url: &str, expiry: Duration) -> Result<String, DailyError>;
}

/// Extracts the room name (last path segment) from a room URL.
pub fn room_name_from_url(room_url: &str) -> Result<String, DailyError> {
    let url = reqwest::Url::parse(room_url)
        .map_err(|_| DailyError::InvalidRoomUrl(room_url.to_string()))?;
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .ok_or_else(|| DailyError::InvalidRoomUrl(room_url.to_string()))
}

pub struct DailyRestHelper {
    api_key: Option<String>,
    api_url: String,
    http: SharedHttpClient,
}

impl DailyRestHelper {
    pub fn new(api_key: Option<String>, api_url: String, http: SharedHttpClient) -> Self {
        Self {
            api_key,
            api_url,
            http,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, DailyError> {
        let api_key = self.api_key.as_deref().ok_or(DailyError::MissingApiKey)?;
        let client = self.http.get().ok_or(DailyError::ClientClosed)?;
        let url = format!("{}/{}", self.api_url.trim_end_matches('/'), path);
        Ok(client.request(method, url).bearer_auth(api_key))
    }

    async fn send<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, DailyError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DailyError::Api { status, body });
        }
        Ok(response.json().await?)
    }

    pub async fn create_room_with(&self, params: &DailyRoomParams) -> Result<DailyRoom, DailyError> {
        let request = self.request(Method::POST, "rooms")?.json(params);
        Self::send(request).await
    }

    pub async fn get_token(&self, room_url: &str, expiry: Duration) -> Result<String, DailyError> {
        let room_name = room_name_from_url(room_url)?;
        let body = MeetingTokenRequest {
            properties: MeetingTokenProperties {
                room_name: &room_name,
                exp: chrono::Utc::now().timestamp() + expiry.as_secs() as i64,
                is_owner: true,
                eject_at_token_exp: false,
            },
        };
        let request = self.request(Method::POST, "meeting-tokens")?.json(&body);
        let response: MeetingTokenResponse = Self::send(request).await?;
        Ok(response.token)
    }

    pub async fn get_presence(&self, room_name: &str) -> Result<Vec<PresenceParticipant>, DailyError> {
        let request = self.request(Method::GET, &format!("rooms/{}/presence", room_name))?;
        let response: PresenceResponse = Self::send(request).await?;
        Ok(response.data)
    }

    /// Broadcasts an app message to the room's participants.
    pub async fn send_app_message(
        &self,
        room_name: &str,
        data: &Value,
        recipient: &str,
    ) -> Result<(), DailyError> {
        let request = self
            .request(Method::POST, &format!("rooms/{}/send-app-message", room_name))?
            .json(&AppMessageRequest { data, recipient });
        let _: Value = Self::send(request).await?;
        debug!(room = %room_name, "App message sent");
        Ok(())
    }
}

#[async_trait]
impl RoomProvider for DailyRestHelper {
    async fn create_room(&self) -> Result<DailyRoom, DailyError> {
        self.create_room_with(&DailyRoomParams::default()).await
    }

    async fn create_token(&self, room_url: &str, expiry: Duration) -> Result<String, DailyError> {
        self.get_token(room_url, expiry).await
    }
}
