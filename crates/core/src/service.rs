//! Seams between a bot session and the external services it drives.

use crate::context::{ContextAggregatorPair, LLMContext};
use crate::pipeline::FrameProcessor;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub name: Option<String>,
}

/// Room membership changes reported by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The first remote participant of the session has joined.
    FirstParticipantJoined(Participant),
    ParticipantJoined(Participant),
    ParticipantLeft {
        participant: Participant,
        reason: String,
    },
}

/// A connection to a real-time room.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stage that brings room audio and client messages into the pipeline.
    fn input(&self) -> Box<dyn FrameProcessor>;

    /// Stage that sends bot audio and server messages to the room.
    fn output(&self) -> Box<dyn FrameProcessor>;

    /// Hands out the event stream. Only the first caller receives it.
    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;

    async fn capture_participant_transcription(&self, participant_id: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// A speech-to-speech model service.
#[async_trait]
pub trait LLMService: Send + Sync {
    /// Stage that streams pipeline frames to the model and its replies back.
    fn processor(&self) -> Box<dyn FrameProcessor>;

    fn create_context_aggregator(&self, context: LLMContext) -> ContextAggregatorPair {
        ContextAggregatorPair::new(context)
    }

    async fn close(&self) -> Result<()>;
}
