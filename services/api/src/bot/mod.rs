//! Bot sessions: building a pipeline for a provisioned room and running it.

pub mod gemini;
pub mod openai;
pub mod session;
mod ws;

use crate::config::Config;
use crate::daily::{DailyParams, DailyRestHelper, DailyTransport};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tutor_core::BotImplementation;
use tutor_core::context::{ContextAggregatorPair, LLMContext, LLMMessage};
use tutor_core::persona::{StudyContext, VOICE_ASSISTANT_PRIMER};
use tutor_core::pipeline::{Pipeline, PipelineParams, PipelineTask};
use tutor_core::rtvi::{RtviConfig, RtviProcessor};
use tutor_core::service::{LLMService, Transport};

pub use gemini::{GeminiLiveService, GeminiLiveSettings};
pub use openai::{OpenAIRealtimeService, OpenAIRealtimeSettings};
pub use session::run_bot;

/// Everything a bot needs to join a room.
#[derive(Debug, Clone)]
pub struct BotParams {
    pub room_url: String,
    pub token: String,
    pub implementation: BotImplementation,
    pub study: StudyContext,
}

/// A pipeline ready to run, with the services it holds open.
pub struct BuiltPipeline {
    pub transport: Arc<dyn Transport>,
    pub task: PipelineTask,
    pub llm: Arc<dyn LLMService>,
    /// The aggregators wired into `task`, sharing its running context.
    pub aggregators: ContextAggregatorPair,
}

/// Builds the pipeline a bot session runs.
pub trait PipelineFactory: Send + Sync {
    fn build(&self, params: &BotParams) -> Result<BuiltPipeline>;
}

/// The production factory: a Daily transport and the requested model backend.
pub struct BackendPipelines {
    config: Arc<Config>,
    daily: Arc<DailyRestHelper>,
}

impl BackendPipelines {
    pub fn new(config: Arc<Config>, daily: Arc<DailyRestHelper>) -> Self {
        Self { config, daily }
    }

    fn model_service(
        &self,
        implementation: BotImplementation,
        system_instruction: String,
    ) -> Result<Arc<dyn LLMService>> {
        let api_key = self.config.require_api_key(implementation)?.to_string();
        let service: Arc<dyn LLMService> = match implementation {
            BotImplementation::Gemini => Arc::new(GeminiLiveService::new(GeminiLiveSettings::tutor(
                api_key,
                self.config.gemini_model.clone(),
                system_instruction,
            ))),
            BotImplementation::OpenAI => Arc::new(OpenAIRealtimeService::new(
                OpenAIRealtimeSettings::tutor(api_key, self.config.openai_model.clone(), system_instruction),
            )),
        };
        Ok(service)
    }
}

impl PipelineFactory for BackendPipelines {
    fn build(&self, params: &BotParams) -> Result<BuiltPipeline> {
        let transport = Arc::new(DailyTransport::new(
            &params.room_url,
            params.implementation.bot_name(),
            DailyParams::default(),
            self.daily.clone(),
        )?);
        let llm = self.model_service(params.implementation, params.study.system_instruction())?;
        info!(implementation = %params.implementation, "Built bot pipeline");
        Ok(assemble_pipeline(transport, llm))
    }
}

/// Wires transport, control protocol, context aggregation and model into one task.
///
/// Stage order: transport input, RTVI, user aggregator, model, transport
/// output, assistant aggregator.
pub fn assemble_pipeline(transport: Arc<dyn Transport>, llm: Arc<dyn LLMService>) -> BuiltPipeline {
    let mut rtvi = RtviProcessor::new(RtviConfig::default());
    rtvi.on_client_ready(|| info!("Client ready, bot is ready to talk"));
    let observer = rtvi.observer();

    let context = LLMContext::new(vec![LLMMessage::user(VOICE_ASSISTANT_PRIMER)]);
    let aggregators = llm.create_context_aggregator(context);

    let pipeline = Pipeline::new(vec![
        transport.input(),
        Box::new(rtvi),
        Box::new(aggregators.user()),
        llm.processor(),
        transport.output(),
        Box::new(aggregators.assistant()),
    ]);
    let task = PipelineTask::new(
        pipeline,
        PipelineParams {
            allow_interruptions: true,
            enable_metrics: true,
        },
    )
    .with_observer(Arc::new(observer));

    BuiltPipeline {
        transport,
        task,
        llm,
        aggregators,
    }
}
