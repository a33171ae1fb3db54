//! Frames flowing through a conversational pipeline.

use crate::context::LLMContext;
use serde_json::Value;

/// A chunk of mono PCM16 audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Parameters carried by the start frame to every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartParams {
    pub allow_interruptions: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// First frame of every run. Stages open their connections when they see it.
    Start(StartParams),
    InputAudio(AudioFrame),
    OutputAudio(AudioFrame),
    /// Speech-to-text of the remote participant.
    Transcription { text: String, is_final: bool },
    /// Text produced by the model, usually the transcript of its speech.
    LLMText(String),
    /// Conversation context handed to the model service to prompt a response.
    /// An empty context asks the user aggregator to substitute its running one.
    Context(LLMContext),
    UserStartedSpeaking,
    UserStoppedSpeaking,
    BotStartedSpeaking,
    BotStoppedSpeaking,
    /// Control-protocol message received from the client app.
    ClientMessage(Value),
    /// Control-protocol message for the client app.
    ServerMessage(Value),
    Error { message: String, fatal: bool },
    /// Graceful termination. Every stage forwards it downstream and exits.
    End,
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Start(_) => "start",
            Frame::InputAudio(_) => "input_audio",
            Frame::OutputAudio(_) => "output_audio",
            Frame::Transcription { .. } => "transcription",
            Frame::LLMText(_) => "llm_text",
            Frame::Context(_) => "context",
            Frame::UserStartedSpeaking => "user_started_speaking",
            Frame::UserStoppedSpeaking => "user_stopped_speaking",
            Frame::BotStartedSpeaking => "bot_started_speaking",
            Frame::BotStoppedSpeaking => "bot_stopped_speaking",
            Frame::ClientMessage(_) => "client_message",
            Frame::ServerMessage(_) => "server_message",
            Frame::Error { .. } => "error",
            Frame::End => "end",
        }
    }
}
