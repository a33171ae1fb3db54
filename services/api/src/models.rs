//! API Models
//!
//! Request and response bodies of the HTTP API, documented with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Default, PartialEq)]
pub struct ConnectRequest {
    /// Model backend for this bot, `gemini` or `openai`. Defaults to the server's configured backend.
    #[schema(example = "gemini")]
    #[serde(default)]
    pub bot_implementation: Option<String>,
    /// Subject the tutor teaches.
    #[schema(example = "Histoire")]
    #[serde(default)]
    pub category: Option<String>,
    /// Topics to study, in order.
    #[serde(default)]
    pub periods: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ConnectResponse {
    #[schema(example = "https://example.daily.co/abc")]
    pub room_url: String,
    pub token: String,
    #[schema(example = "gemini")]
    pub bot_implementation: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    pub detail: String,
}
