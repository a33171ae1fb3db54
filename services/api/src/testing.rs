//! Stub transports, model services and factories for tests.

use crate::bot::{BotParams, BuiltPipeline, PipelineFactory, assemble_pipeline};
use crate::config::Config;
use crate::daily::MockRoomProvider;
use crate::registry::SessionRegistry;
use crate::state::AppState;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tutor_core::Frame;
use tutor_core::pipeline::{FrameProcessor, FrameReceiver, FrameSender, forward};
use tutor_core::service::{LLMService, Transport, TransportEvent};

type FrameLog = Arc<Mutex<Vec<Frame>>>;

/// Forwards every frame until the end frame.
pub(crate) struct PassThrough {
    name: &'static str,
    fail_on_start: bool,
    seen: Option<FrameLog>,
}

#[async_trait]
impl FrameProcessor for PassThrough {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        while let Some(frame) = input.recv().await {
            if self.fail_on_start && matches!(frame, Frame::Start(_)) {
                return Err(anyhow!("{} refused to start", self.name));
            }
            if let Some(seen) = &self.seen {
                seen.lock().unwrap().push(frame.clone());
            }
            let end = frame == Frame::End;
            forward(&output, frame).await?;
            if end {
                break;
            }
        }
        Ok(())
    }
}

pub(crate) struct StubTransport {
    closes: AtomicUsize,
    hang_on_close: bool,
    captured: Mutex<Vec<String>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl StubTransport {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::channel(8);
        Self {
            closes: AtomicUsize::new(0),
            hang_on_close: false,
            captured: Mutex::new(Vec::new()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// A transport whose close never completes.
    pub fn hanging() -> Self {
        Self {
            hang_on_close: true,
            ..Self::new()
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn event_sender(&self) -> mpsc::Sender<TransportEvent> {
        self.events_tx.clone()
    }

    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for StubTransport {
    fn input(&self) -> Box<dyn FrameProcessor> {
        Box::new(PassThrough {
            name: "stub_input",
            fail_on_start: false,
            seen: None,
        })
    }

    fn output(&self) -> Box<dyn FrameProcessor> {
        Box::new(PassThrough {
            name: "stub_output",
            fail_on_start: false,
            seen: None,
        })
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    async fn capture_participant_transcription(&self, participant_id: &str) -> Result<()> {
        self.captured.lock().unwrap().push(participant_id.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.hang_on_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Counts its closes. Every close reports an error, which callers must tolerate.
pub(crate) struct StubLLM {
    closes: AtomicUsize,
    fail_on_start: bool,
    seen: FrameLog,
}

impl StubLLM {
    pub fn new() -> Self {
        Self {
            closes: AtomicUsize::new(0),
            fail_on_start: false,
            seen: FrameLog::default(),
        }
    }

    /// A service whose pipeline stage fails as soon as the run starts.
    pub fn failing() -> Self {
        Self {
            fail_on_start: true,
            ..Self::new()
        }
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Frames that have reached the model stage.
    pub fn seen(&self) -> Vec<Frame> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMService for StubLLM {
    fn processor(&self) -> Box<dyn FrameProcessor> {
        Box::new(PassThrough {
            name: "stub_llm",
            fail_on_start: self.fail_on_start,
            seen: Some(self.seen.clone()),
        })
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("already closed"))
    }
}

/// Builds stub pipelines and remembers what it was asked for.
#[derive(Default)]
pub(crate) struct StubPipelineFactory {
    requests: Mutex<Vec<BotParams>>,
}

impl StubPipelineFactory {
    pub fn requests(&self) -> Vec<BotParams> {
        self.requests.lock().unwrap().clone()
    }
}

impl PipelineFactory for StubPipelineFactory {
    fn build(&self, params: &BotParams) -> Result<BuiltPipeline> {
        self.requests.lock().unwrap().push(params.clone());
        Ok(assemble_pipeline(
            Arc::new(StubTransport::new()),
            Arc::new(StubLLM::new()),
        ))
    }
}

pub(crate) fn app_state(
    config: Config,
    rooms: MockRoomProvider,
    pipelines: Arc<StubPipelineFactory>,
) -> Arc<AppState> {
    Arc::new(AppState {
        config: Arc::new(config),
        rooms: Arc::new(rooms),
        pipelines,
        registry: SessionRegistry::new(),
    })
}
