//! Room transport backed by the Daily REST API.
//!
//! Membership is tracked by polling the room's presence endpoint, and server
//! messages reach the client as Daily app messages. Media does not flow over
//! this transport: bot audio is consumed at the output stage.

use super::rest::{DailyError, DailyRestHelper, PresenceParticipant, room_name_from_url};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use tutor_core::Frame;
use tutor_core::pipeline::{FrameProcessor, FrameReceiver, FrameSender, forward};
use tutor_core::service::{Participant, Transport, TransportEvent};

const EVENT_CHANNEL_CAPACITY: usize = 32;
const APP_MESSAGE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct DailyParams {
    /// How often room presence is polled once the pipeline has started.
    pub presence_interval: Duration,
    /// Recipient of outgoing app messages, `*` for everyone.
    pub app_message_recipient: String,
}

impl Default for DailyParams {
    fn default() -> Self {
        Self {
            presence_interval: Duration::from_secs(2),
            app_message_recipient: "*".to_string(),
        }
    }
}

/// Turns successive presence snapshots into join and leave events.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    present: BTreeMap<String, Participant>,
    seen_anyone: bool,
}

impl PresenceTracker {
    pub fn update(&mut self, snapshot: Vec<PresenceParticipant>) -> Vec<TransportEvent> {
        let current: BTreeMap<String, Participant> = snapshot
            .into_iter()
            .map(|p| {
                let participant = Participant {
                    id: p.id.clone(),
                    name: p.user_name,
                };
                (p.id, participant)
            })
            .collect();

        let mut events = Vec::new();
        for (id, participant) in &current {
            if self.present.contains_key(id) {
                continue;
            }
            if self.seen_anyone {
                events.push(TransportEvent::ParticipantJoined(participant.clone()));
            } else {
                self.seen_anyone = true;
                events.push(TransportEvent::FirstParticipantJoined(participant.clone()));
            }
        }
        for (id, participant) in &self.present {
            if !current.contains_key(id) {
                events.push(TransportEvent::ParticipantLeft {
                    participant: participant.clone(),
                    reason: "leftCall".to_string(),
                });
            }
        }

        self.present = current;
        events
    }
}

pub struct DailyTransport {
    room_name: String,
    bot_name: String,
    params: DailyParams,
    rest: Arc<DailyRestHelper>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    transcribed: Mutex<BTreeSet<String>>,
    closed: CancellationToken,
}

impl DailyTransport {
    pub fn new(
        room_url: &str,
        bot_name: impl Into<String>,
        params: DailyParams,
        rest: Arc<DailyRestHelper>,
    ) -> Result<Self, DailyError> {
        let room_name = room_name_from_url(room_url)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            room_name,
            bot_name: bot_name.into(),
            params,
            rest,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            transcribed: Mutex::new(BTreeSet::new()),
            closed: CancellationToken::new(),
        })
    }

    /// Participants whose speech has been requested for transcription.
    pub fn transcribed_participants(&self) -> Vec<String> {
        self.transcribed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for DailyTransport {
    fn input(&self) -> Box<dyn FrameProcessor> {
        Box::new(DailyInput {
            room_name: self.room_name.clone(),
            bot_name: self.bot_name.clone(),
            interval: self.params.presence_interval,
            rest: self.rest.clone(),
            events_tx: self.events_tx.clone(),
            closed: self.closed.clone(),
            tracker: PresenceTracker::default(),
        })
    }

    fn output(&self) -> Box<dyn FrameProcessor> {
        Box::new(DailyOutput {
            room_name: self.room_name.clone(),
            recipient: self.params.app_message_recipient.clone(),
            rest: self.rest.clone(),
        })
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    async fn capture_participant_transcription(&self, participant_id: &str) -> Result<()> {
        let added = self
            .transcribed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(participant_id.to_string());
        if added {
            info!(room = %self.room_name, participant = %participant_id, "Capturing participant transcription");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            info!(room = %self.room_name, "Left Daily room");
        }
        Ok(())
    }
}

struct DailyInput {
    room_name: String,
    bot_name: String,
    interval: Duration,
    rest: Arc<DailyRestHelper>,
    events_tx: mpsc::Sender<TransportEvent>,
    closed: CancellationToken,
    tracker: PresenceTracker,
}

impl DailyInput {
    async fn poll_presence(&mut self) {
        match self.rest.get_presence(&self.room_name).await {
            Ok(snapshot) => {
                for event in self.tracker.update(snapshot) {
                    if self.events_tx.send(event).await.is_err() {
                        debug!(room = %self.room_name, "No one is listening for transport events");
                    }
                }
            }
            Err(e) => warn!(room = %self.room_name, error = %e, "Presence poll failed"),
        }
    }
}

#[async_trait]
impl FrameProcessor for DailyInput {
    fn name(&self) -> &str {
        "daily_input"
    }

    async fn run(mut self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut joined = false;

        loop {
            tokio::select! {
                frame = input.recv() => match frame {
                    Some(Frame::End) => {
                        forward(&output, Frame::End).await?;
                        break;
                    }
                    Some(frame) => {
                        if matches!(frame, Frame::Start(_)) && !joined {
                            joined = true;
                            info!(room = %self.room_name, bot = %self.bot_name, "Joined Daily room");
                        }
                        forward(&output, frame).await?;
                    }
                    None => break,
                },
                _ = ticker.tick(), if joined => self.poll_presence().await,
                _ = self.closed.cancelled() => {
                    let _ = output.send(Frame::End).await;
                    break;
                }
            }
        }
        Ok(())
    }
}

struct DailyOutput {
    room_name: String,
    recipient: String,
    rest: Arc<DailyRestHelper>,
}

impl DailyOutput {
    /// Delivers app messages off the frame path. The task drains what is
    /// queued once the stage stops.
    fn spawn_sender(&self) -> mpsc::Sender<serde_json::Value> {
        let (tx, mut rx) = mpsc::channel::<serde_json::Value>(APP_MESSAGE_CAPACITY);
        let rest = self.rest.clone();
        let room_name = self.room_name.clone();
        let recipient = self.recipient.clone();
        tokio::spawn(async move {
            while let Some(data) = rx.recv().await {
                if let Err(e) = rest.send_app_message(&room_name, &data, &recipient).await {
                    debug!(room = %room_name, error = %e, "Failed to deliver app message");
                }
            }
        });
        tx
    }
}

#[async_trait]
impl FrameProcessor for DailyOutput {
    fn name(&self) -> &str {
        "daily_output"
    }

    async fn run(self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        let messages = self.spawn_sender();
        while let Some(frame) = input.recv().await {
            match frame {
                Frame::OutputAudio(audio) => {
                    trace!(samples = audio.samples.len(), "Consumed bot audio");
                }
                Frame::ServerMessage(data) => {
                    if let Err(e) = messages.try_send(data.clone()) {
                        warn!(room = %self.room_name, error = %e, "Dropping app message");
                    }
                    forward(&output, Frame::ServerMessage(data)).await?;
                }
                Frame::End => {
                    forward(&output, Frame::End).await?;
                    break;
                }
                other => forward(&output, other).await?,
            }
        }
        Ok(())
    }
}
