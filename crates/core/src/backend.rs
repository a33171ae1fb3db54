//! The closed set of model backends a bot session can run on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies which speech-to-speech model service drives a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotImplementation {
    Gemini,
    OpenAI,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported bot implementation `{0}` (expected gemini or openai)")]
pub struct UnknownBotImplementation(pub String);

impl BotImplementation {
    pub const ALL: [BotImplementation; 2] = [BotImplementation::Gemini, BotImplementation::OpenAI];

    /// The wire identifier, as accepted by `/connect` and `BOT_IMPLEMENTATION`.
    pub fn as_str(&self) -> &'static str {
        match self {
            BotImplementation::Gemini => "gemini",
            BotImplementation::OpenAI => "openai",
        }
    }

    /// Human-facing provider name, used in error messages.
    pub fn provider_name(&self) -> &'static str {
        match self {
            BotImplementation::Gemini => "Gemini",
            BotImplementation::OpenAI => "OpenAI",
        }
    }

    /// The participant name the bot joins the room with.
    pub fn bot_name(&self) -> String {
        format!("AI Assistant ({})", self.provider_name())
    }
}

impl fmt::Display for BotImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotImplementation {
    type Err = UnknownBotImplementation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gemini" => Ok(BotImplementation::Gemini),
            "openai" => Ok(BotImplementation::OpenAI),
            other => Err(UnknownBotImplementation(other.to_string())),
        }
    }
}
