//! Runs one bot pipeline until it ends or is cancelled, then releases its
//! transport and model connections.

use super::BuiltPipeline;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tutor_core::Frame;
use tutor_core::context::ContextAggregatorPair;
use tutor_core::pipeline::{PipelineRunner, RunOutcome, TaskQueue};
use tutor_core::service::{LLMService, Transport, TransportEvent};

/// Runs a built pipeline under `cancel`.
///
/// The transport and model service are closed exactly once on every exit
/// path. If this future is dropped before it finishes, the close is spawned
/// onto the current runtime instead.
pub async fn run_bot(pipeline: BuiltPipeline, cancel: CancellationToken) -> Result<RunOutcome> {
    let BuiltPipeline {
        transport,
        task,
        llm,
        aggregators,
    } = pipeline;
    let resources = SessionResources::new(transport.clone(), llm);

    let runner = PipelineRunner::with_cancel_token(cancel);
    runner.on_cancel(|| info!("Bot pipeline cancelled"));
    let queue = task.queue();
    let mut events = transport.take_events();

    let run = runner.run(task);
    tokio::pin!(run);
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            Some(event) = next_event(&mut events) => {
                if let Err(e) = on_transport_event(event, transport.as_ref(), &aggregators, &queue).await {
                    warn!(error = %e, "Failed to handle transport event");
                }
            }
        }
    };

    match &outcome {
        Ok(RunOutcome::Finished) => info!("Bot pipeline finished"),
        Ok(RunOutcome::Cancelled) => info!("Bot pipeline stopped by cancellation"),
        Err(e) => error!(error = ?e, "Bot pipeline failed"),
    }
    resources.release().await;
    outcome
}

async fn next_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn on_transport_event(
    event: TransportEvent,
    transport: &dyn Transport,
    aggregators: &ContextAggregatorPair,
    queue: &TaskQueue,
) -> Result<()> {
    match event {
        TransportEvent::FirstParticipantJoined(participant) => {
            info!(participant = %participant.id, "First participant joined");
            transport
                .capture_participant_transcription(&participant.id)
                .await?;
            // Prompting with the running context makes the bot open the conversation.
            queue.queue_frame(aggregators.context_frame()).await?;
        }
        TransportEvent::ParticipantJoined(participant) => {
            debug!(participant = %participant.id, "Participant joined");
        }
        TransportEvent::ParticipantLeft { participant, reason } => {
            info!(participant = %participant.id, %reason, "Participant left");
            queue.queue_frame(Frame::End).await?;
        }
    }
    Ok(())
}

/// Owns a session's open connections until they are released.
struct SessionResources {
    held: Option<(Arc<dyn Transport>, Arc<dyn LLMService>)>,
}

impl SessionResources {
    fn new(transport: Arc<dyn Transport>, llm: Arc<dyn LLMService>) -> Self {
        Self {
            held: Some((transport, llm)),
        }
    }

    async fn release(mut self) {
        if let Some((transport, llm)) = self.held.take() {
            close_all(transport, llm).await;
        }
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        if let Some((transport, llm)) = self.held.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(close_all(transport, llm));
            }
        }
    }
}

async fn close_all(transport: Arc<dyn Transport>, llm: Arc<dyn LLMService>) {
    let (transport_closed, llm_closed) = tokio::join!(transport.close(), llm.close());
    if let Err(e) = transport_closed {
        debug!(error = %e, "Ignoring transport close failure");
    }
    if let Err(e) = llm_closed {
        debug!(error = %e, "Ignoring model service close failure");
    }
}
