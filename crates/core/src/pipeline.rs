//! Pipeline runtime: ordered stages connected by channels, a task that owns
//! them, and a runner that drives a task until an end frame reaches the sink,
//! a stage fails, or the run is cancelled.

use crate::frames::{Frame, StartParams};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the channel between two adjacent stages.
pub const FRAME_CHANNEL_CAPACITY: usize = 128;

pub type FrameSender = mpsc::Sender<Frame>;
pub type FrameReceiver = mpsc::Receiver<Frame>;

/// One stage of a pipeline.
///
/// A stage consumes frames from `input` and pushes frames to `output` until it
/// sees [`Frame::End`] (which it must forward) or its input closes.
#[async_trait]
pub trait FrameProcessor: Send {
    fn name(&self) -> &str;

    async fn run(self: Box<Self>, input: FrameReceiver, output: FrameSender) -> Result<()>;
}

/// Sends a frame downstream, failing if the next stage has gone away.
pub async fn forward(output: &FrameSender, frame: Frame) -> Result<()> {
    output
        .send(frame)
        .await
        .map_err(|e| anyhow!("downstream stage closed while sending `{}`", e.0.name()))
}

/// Sees every frame that reaches the end of the pipeline.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, frame: &Frame);
}

pub struct Pipeline {
    stages: Vec<Box<dyn FrameProcessor>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn FrameProcessor>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineParams {
    pub allow_interruptions: bool,
    pub enable_metrics: bool,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            allow_interruptions: true,
            enable_metrics: false,
        }
    }
}

/// Cloneable handle used to inject frames at the head of a running task.
#[derive(Clone)]
pub struct TaskQueue {
    tx: FrameSender,
}

impl TaskQueue {
    pub async fn queue_frame(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow!("pipeline task is no longer running"))
    }

    pub async fn queue_frames(&self, frames: impl IntoIterator<Item = Frame>) -> Result<()> {
        for frame in frames {
            self.queue_frame(frame).await?;
        }
        Ok(())
    }
}

pub struct PipelineTask {
    pipeline: Pipeline,
    params: PipelineParams,
    observers: Vec<Arc<dyn FrameObserver>>,
    queue: TaskQueue,
    queued: FrameReceiver,
}

impl PipelineTask {
    pub fn new(pipeline: Pipeline, params: PipelineParams) -> Self {
        let (tx, queued) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        Self {
            pipeline,
            params,
            observers: Vec::new(),
            queue: TaskQueue { tx },
            queued,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn FrameObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    pub fn params(&self) -> PipelineParams {
        self.params
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.pipeline.stage_names()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// An end frame made it through every stage.
    Finished,
    Cancelled,
}

type CancelHook = Box<dyn FnOnce() + Send>;

/// Drives a [`PipelineTask`] and exposes its cancellation entry point.
pub struct PipelineRunner {
    cancel: CancellationToken,
    on_cancel: Mutex<Vec<CancelHook>>,
}

impl Default for PipelineRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineRunner {
    pub fn new() -> Self {
        Self::with_cancel_token(CancellationToken::new())
    }

    /// Creates a runner that stops whenever `cancel` fires.
    pub fn with_cancel_token(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            on_cancel: Mutex::new(Vec::new()),
        }
    }

    /// Registers a hook run once after a run has been torn down by cancellation.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks().push(Box::new(hook));
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn hooks(&self) -> std::sync::MutexGuard<'_, Vec<CancelHook>> {
        self.on_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn run(&self, task: PipelineTask) -> Result<RunOutcome> {
        let PipelineTask {
            pipeline,
            params,
            observers,
            queue,
            mut queued,
        } = task;
        drop(queue);

        let started = Instant::now();
        let mut stages: JoinSet<Result<()>> = JoinSet::new();

        // Head of the pipeline: the start frame, then whatever gets queued.
        let (head_tx, head_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let start = Frame::Start(StartParams {
            allow_interruptions: params.allow_interruptions,
        });
        stages.spawn(async move {
            if head_tx.send(start).await.is_err() {
                return Ok(());
            }
            while let Some(frame) = queued.recv().await {
                if head_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut upstream = head_rx;
        for stage in pipeline.stages {
            let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            let name = stage.name().to_string();
            debug!(stage = %name, "Starting pipeline stage");
            stages.spawn(async move {
                stage
                    .run(upstream, tx)
                    .await
                    .with_context(|| format!("pipeline stage `{}` failed", name))
            });
            upstream = rx;
        }
        let mut sink = upstream;

        let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(RunOutcome::Cancelled),
                joined = stages.join_next(), if !stages.is_empty() => match joined {
                    Some(Ok(Err(e))) => break Err(e),
                    Some(Err(e)) if e.is_panic() => break Err(anyhow!("pipeline stage panicked: {}", e)),
                    _ => {}
                },
                frame = sink.recv() => match frame {
                    Some(Frame::End) => break Ok(RunOutcome::Finished),
                    Some(Frame::Error { message, fatal: true }) => break Err(anyhow!(message)),
                    Some(frame) => {
                        if let Frame::Error { message, .. } = &frame {
                            warn!(error = %message, "Pipeline reported a non-fatal error");
                        }
                        *counts.entry(frame.name()).or_default() += 1;
                        for observer in &observers {
                            observer.on_frame(&frame);
                        }
                    }
                    None => break Err(anyhow!("pipeline closed before an end frame reached the sink")),
                },
            }
        };

        stages.shutdown().await;

        if params.enable_metrics {
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                frames = ?counts,
                "Pipeline metrics"
            );
        }
        if matches!(outcome, Ok(RunOutcome::Cancelled)) {
            let hooks: Vec<CancelHook> = self.hooks().drain(..).collect();
            for hook in hooks {
                hook();
            }
        }
        outcome
    }
}
