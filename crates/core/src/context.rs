//! Conversation context and the aggregators that maintain it.
//!
//! A model service hands out a [`ContextAggregatorPair`]; the user half sits
//! before the model in the pipeline and records what the participant said,
//! the assistant half sits after the transport output and records what the
//! bot said. Both share one [`LLMContext`].

use crate::frames::Frame;
use crate::pipeline::{FrameProcessor, FrameReceiver, FrameSender, forward};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMMessage {
    pub role: Role,
    pub content: String,
}

impl LLMMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LLMContext {
    messages: Vec<LLMMessage>,
}

impl LLMContext {
    pub fn new(messages: Vec<LLMMessage>) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &[LLMMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: LLMMessage) {
        self.messages.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

type SharedContext = Arc<Mutex<LLMContext>>;

fn lock(context: &SharedContext) -> MutexGuard<'_, LLMContext> {
    context.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// User and assistant aggregators sharing one running context.
#[derive(Clone)]
pub struct ContextAggregatorPair {
    context: SharedContext,
}

impl ContextAggregatorPair {
    pub fn new(context: LLMContext) -> Self {
        Self {
            context: Arc::new(Mutex::new(context)),
        }
    }

    pub fn user(&self) -> UserContextAggregator {
        UserContextAggregator {
            context: self.context.clone(),
            pending: String::new(),
        }
    }

    pub fn assistant(&self) -> AssistantContextAggregator {
        AssistantContextAggregator {
            context: self.context.clone(),
            pending: String::new(),
        }
    }

    /// A frame that, once it reaches the user aggregator, prompts the model
    /// with the running context.
    pub fn context_frame(&self) -> Frame {
        Frame::Context(LLMContext::default())
    }

    pub fn snapshot(&self) -> LLMContext {
        lock(&self.context).clone()
    }
}

pub struct UserContextAggregator {
    context: SharedContext,
    pending: String,
}

impl UserContextAggregator {
    fn commit(&mut self) {
        let text = self.pending.trim();
        if !text.is_empty() {
            lock(&self.context).push(LLMMessage::user(text));
        }
        self.pending.clear();
    }
}

#[async_trait]
impl FrameProcessor for UserContextAggregator {
    fn name(&self) -> &str {
        "user_context_aggregator"
    }

    async fn run(mut self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        while let Some(frame) = input.recv().await {
            match frame {
                Frame::Transcription {
                    ref text,
                    is_final: true,
                } => {
                    if !self.pending.is_empty() {
                        self.pending.push(' ');
                    }
                    self.pending.push_str(text);
                    forward(&output, frame).await?;
                }
                Frame::UserStoppedSpeaking => {
                    self.commit();
                    forward(&output, frame).await?;
                }
                Frame::Context(context) if context.is_empty() => {
                    let running = lock(&self.context).clone();
                    forward(&output, Frame::Context(running)).await?;
                }
                Frame::End => {
                    self.commit();
                    forward(&output, Frame::End).await?;
                    break;
                }
                other => forward(&output, other).await?,
            }
        }
        Ok(())
    }
}

pub struct AssistantContextAggregator {
    context: SharedContext,
    pending: String,
}

impl AssistantContextAggregator {
    fn commit(&mut self) {
        let text = self.pending.trim();
        if !text.is_empty() {
            lock(&self.context).push(LLMMessage::assistant(text));
        }
        self.pending.clear();
    }
}

#[async_trait]
impl FrameProcessor for AssistantContextAggregator {
    fn name(&self) -> &str {
        "assistant_context_aggregator"
    }

    async fn run(mut self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        while let Some(frame) = input.recv().await {
            match frame {
                Frame::LLMText(ref text) => {
                    self.pending.push_str(text);
                    forward(&output, frame).await?;
                }
                Frame::BotStoppedSpeaking => {
                    self.commit();
                    forward(&output, frame).await?;
                }
                Frame::End => {
                    self.commit();
                    forward(&output, Frame::End).await?;
                    break;
                }
                other => forward(&output, other).await?,
            }
        }
        Ok(())
    }
}
