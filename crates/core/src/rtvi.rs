//! Real-time voice inference (RTVI) control protocol.
//!
//! The client app talks to the bot with small JSON envelopes labelled
//! `rtvi-ai`. [`RtviProcessor`] answers the handshake and injects server
//! messages into the pipeline; [`RtviObserver`] watches frames at the end of
//! the pipeline and turns the interesting ones into server messages.

use crate::frames::Frame;
use crate::pipeline::{FrameObserver, FrameProcessor, FrameReceiver, FrameSender, forward};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub const RTVI_LABEL: &str = "rtvi-ai";
pub const RTVI_PROTOCOL_VERSION: &str = "0.3.0";

const OUTBOUND_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtviMessage {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RtviMessage {
    pub fn new(kind: &str, id: Option<String>, data: Option<Value>) -> Self {
        Self {
            label: RTVI_LABEL.to_string(),
            kind: kind.to_string(),
            id,
            data,
        }
    }

    fn into_frame(self) -> Frame {
        Frame::ServerMessage(serde_json::to_value(self).unwrap_or(Value::Null))
    }
}

/// Service configuration advertised in `bot-ready`.
#[derive(Debug, Clone, Default)]
pub struct RtviConfig {
    pub config: Vec<Value>,
}

type ClientReadyHook = Box<dyn Fn() + Send + Sync>;

pub struct RtviProcessor {
    config: RtviConfig,
    outbound_tx: mpsc::Sender<RtviMessage>,
    outbound_rx: mpsc::Receiver<RtviMessage>,
    on_client_ready: Option<ClientReadyHook>,
}

impl RtviProcessor {
    pub fn new(config: RtviConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        Self {
            config,
            outbound_tx,
            outbound_rx,
            on_client_ready: None,
        }
    }

    /// An observer that reports pipeline activity back through this processor.
    pub fn observer(&self) -> RtviObserver {
        RtviObserver {
            tx: self.outbound_tx.clone(),
        }
    }

    pub fn on_client_ready(&mut self, hook: impl Fn() + Send + Sync + 'static) {
        self.on_client_ready = Some(Box::new(hook));
    }

    /// Returns the reply, if any, to a message from the client.
    fn handle_client_message(&self, message: RtviMessage) -> Option<RtviMessage> {
        match message.kind.as_str() {
            "client-ready" => {
                if let Some(hook) = &self.on_client_ready {
                    hook();
                }
                Some(RtviMessage::new(
                    "bot-ready",
                    message.id,
                    Some(json!({
                        "version": RTVI_PROTOCOL_VERSION,
                        "config": self.config.config,
                    })),
                ))
            }
            other => {
                debug!(kind = %other, "Ignoring unsupported RTVI client message");
                Some(RtviMessage::new(
                    "error-response",
                    message.id,
                    Some(json!({ "error": format!("Unsupported message type `{}`", other) })),
                ))
            }
        }
    }
}

#[async_trait]
impl FrameProcessor for RtviProcessor {
    fn name(&self) -> &str {
        "rtvi"
    }

    async fn run(mut self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        loop {
            tokio::select! {
                frame = input.recv() => match frame {
                    Some(Frame::ClientMessage(value)) => {
                        match serde_json::from_value::<RtviMessage>(value.clone()) {
                            Ok(message) if message.label == RTVI_LABEL => {
                                if let Some(reply) = self.handle_client_message(message) {
                                    forward(&output, reply.into_frame()).await?;
                                }
                            }
                            Ok(_) | Err(_) => forward(&output, Frame::ClientMessage(value)).await?,
                        }
                    }
                    Some(Frame::End) => {
                        forward(&output, Frame::End).await?;
                        break;
                    }
                    Some(frame) => forward(&output, frame).await?,
                    None => break,
                },
                Some(message) = self.outbound_rx.recv() => {
                    forward(&output, message.into_frame()).await?;
                }
            }
        }
        Ok(())
    }
}

/// Translates observed frames into RTVI server messages.
#[derive(Clone)]
pub struct RtviObserver {
    tx: mpsc::Sender<RtviMessage>,
}

impl RtviObserver {
    fn message_for(frame: &Frame) -> Option<RtviMessage> {
        let (kind, data) = match frame {
            Frame::Transcription { text, is_final } => (
                "user-transcription",
                Some(json!({ "text": text, "final": is_final })),
            ),
            Frame::LLMText(text) => ("bot-transcription", Some(json!({ "text": text }))),
            Frame::UserStartedSpeaking => ("user-started-speaking", None),
            Frame::UserStoppedSpeaking => ("user-stopped-speaking", None),
            Frame::BotStartedSpeaking => ("bot-started-speaking", None),
            Frame::BotStoppedSpeaking => ("bot-stopped-speaking", None),
            _ => return None,
        };
        Some(RtviMessage::new(kind, None, data))
    }
}

impl FrameObserver for RtviObserver {
    fn on_frame(&self, frame: &Frame) {
        if let Some(message) = Self::message_for(frame) {
            if let Err(e) = self.tx.try_send(message) {
                warn!(error = %e, "Dropping RTVI server message");
            }
        }
    }
}
