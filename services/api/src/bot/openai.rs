//! Speech-to-speech over the OpenAI Realtime WebSocket API.

use super::ws::{SharedSink, WsSource, next_message};
use crate::audio_utils::{self, OPENAI_REALTIME_SAMPLE_RATE, RateConverter};
use anyhow::{Context, Result};
use async_openai::types::realtime::{
    self as oai_realtime, ClientEvent as OAIClientEvent, ServerEvent as OAIServerEvent,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{error, info, warn};
use tutor_core::Frame;
use tutor_core::context::{LLMContext, Role};
use tutor_core::frames::AudioFrame;
use tutor_core::pipeline::{FrameProcessor, FrameReceiver, FrameSender, forward};
use tutor_core::service::LLMService;

const OPENAI_REALTIME_ENDPOINT: &str = "wss://api.openai.com/v1/realtime";

#[derive(Debug, Clone)]
pub struct OpenAIRealtimeSettings {
    pub api_key: String,
    pub model: String,
    pub voice: oai_realtime::RealtimeVoice,
    pub instructions: String,
    pub temperature: f32,
    pub transcription_model: String,
    pub transcription_language: String,
}

impl OpenAIRealtimeSettings {
    /// The French-speaking tutor voice.
    pub fn tutor(api_key: String, model: String, instructions: String) -> Self {
        Self {
            api_key,
            model,
            voice: oai_realtime::RealtimeVoice::Alloy,
            instructions,
            temperature: 0.7,
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            transcription_language: "fr".to_string(),
        }
    }

    fn session_update(&self, allow_interruptions: bool) -> OAIClientEvent {
        let session = oai_realtime::SessionResource {
            model: Some(self.model.clone()),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.clone()),
            input_audio_format: Some(oai_realtime::AudioFormat::PCM16),
            output_audio_format: Some(oai_realtime::AudioFormat::PCM16),
            input_audio_transcription: Some(oai_realtime::AudioTranscription {
                model: Some(self.transcription_model.clone()),
                language: Some(self.transcription_language.clone()),
                ..Default::default()
            }),
            turn_detection: Some(oai_realtime::TurnDetection::ServerVAD {
                threshold: 0.5,
                prefix_padding_ms: 300,
                silence_duration_ms: 500,
                interrupt_response: Some(allow_interruptions),
                create_response: Some(true),
            }),
            temperature: Some(self.temperature),
            ..Default::default()
        };
        OAIClientEvent::SessionUpdate(oai_realtime::SessionUpdateEvent {
            session,
            event_id: None,
        })
    }
}

pub struct OpenAIRealtimeService {
    settings: Arc<OpenAIRealtimeSettings>,
    sink: SharedSink,
}

impl OpenAIRealtimeService {
    pub fn new(settings: OpenAIRealtimeSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            sink: SharedSink::default(),
        }
    }
}

#[async_trait]
impl LLMService for OpenAIRealtimeService {
    fn processor(&self) -> Box<dyn FrameProcessor> {
        Box::new(OpenAIRealtimeProcessor {
            settings: self.settings.clone(),
            sink: self.sink.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.sink.close().await? {
            info!("Closed OpenAI Realtime connection.");
        }
        Ok(())
    }
}

/// Conversation items for a context, followed by the request for a reply.
fn context_events(context: &LLMContext) -> Vec<OAIClientEvent> {
    let mut events: Vec<OAIClientEvent> = context
        .messages()
        .iter()
        .map(|message| {
            let (role, content_type) = match message.role {
                Role::System => (oai_realtime::ItemRole::System, oai_realtime::ItemContentType::InputText),
                Role::User => (oai_realtime::ItemRole::User, oai_realtime::ItemContentType::InputText),
                Role::Assistant => (oai_realtime::ItemRole::Assistant, oai_realtime::ItemContentType::Text),
            };
            let item = oai_realtime::Item {
                r#type: Some(oai_realtime::ItemType::Message),
                role: Some(role),
                content: Some(vec![oai_realtime::ItemContent {
                    r#type: content_type,
                    text: Some(message.content.clone()),
                    audio: None,
                    transcript: None,
                }]),
                id: None,
                status: None,
                call_id: None,
                name: None,
                arguments: None,
                output: None,
            };
            OAIClientEvent::ConversationItemCreate(oai_realtime::ConversationItemCreateEvent {
                item,
                event_id: None,
                previous_item_id: None,
            })
        })
        .collect();
    events.push(OAIClientEvent::ResponseCreate(oai_realtime::ResponseCreateEvent {
        response: None,
        event_id: None,
    }));
    events
}

/// Maps one server event to pipeline frames.
fn frames_for(event: OAIServerEvent, bot_speaking: &mut bool) -> Vec<Frame> {
    let mut frames = Vec::new();
    match event {
        OAIServerEvent::ResponseAudioDelta(e) => {
            let samples = audio_utils::decode_i16(&e.delta);
            if !samples.is_empty() {
                if !*bot_speaking {
                    *bot_speaking = true;
                    frames.push(Frame::BotStartedSpeaking);
                }
                frames.push(Frame::OutputAudio(AudioFrame::new(samples, OPENAI_REALTIME_SAMPLE_RATE)));
            }
        }
        OAIServerEvent::ResponseAudioTranscriptDelta(e) => frames.push(Frame::LLMText(e.delta)),
        OAIServerEvent::ConversationItemInputAudioTranscriptionDelta(e) => {
            frames.push(Frame::Transcription {
                text: e.delta,
                is_final: false,
            })
        }
        OAIServerEvent::ConversationItemInputAudioTranscriptionCompleted(e) => {
            frames.push(Frame::Transcription {
                text: e.transcript,
                is_final: true,
            })
        }
        OAIServerEvent::InputAudioBufferSpeechStarted(_) => {
            if *bot_speaking {
                *bot_speaking = false;
                frames.push(Frame::BotStoppedSpeaking);
            }
            frames.push(Frame::UserStartedSpeaking);
        }
        OAIServerEvent::InputAudioBufferSpeechStopped(_) => frames.push(Frame::UserStoppedSpeaking),
        OAIServerEvent::ResponseDone(_) => {
            if *bot_speaking {
                *bot_speaking = false;
                frames.push(Frame::BotStoppedSpeaking);
            }
        }
        OAIServerEvent::Error(e) => frames.push(Frame::Error {
            message: e.error.message,
            fatal: false,
        }),
        _ => {}
    }
    frames
}

struct OpenAIRealtimeProcessor {
    settings: Arc<OpenAIRealtimeSettings>,
    sink: SharedSink,
}

impl OpenAIRealtimeProcessor {
    async fn connect(&self, allow_interruptions: bool) -> Result<WsSource> {
        let url = format!("{}?model={}", OPENAI_REALTIME_ENDPOINT, self.settings.model);
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.settings.api_key).parse()?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        let source = self.sink.install(ws_stream).await;
        info!(model = %self.settings.model, "Connected to OpenAI Realtime API.");
        self.sink
            .send_json(&self.settings.session_update(allow_interruptions))
            .await?;
        Ok(source)
    }
}

#[async_trait]
impl FrameProcessor for OpenAIRealtimeProcessor {
    fn name(&self) -> &str {
        "openai_realtime"
    }

    async fn run(self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        let mut source: Option<WsSource> = None;
        let mut bot_speaking = false;
        let mut converter = RateConverter::new(OPENAI_REALTIME_SAMPLE_RATE);

        loop {
            tokio::select! {
                frame = input.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        Frame::Start(params) => {
                            if source.is_none() {
                                source = Some(self.connect(params.allow_interruptions).await?);
                            }
                            forward(&output, Frame::Start(params)).await?;
                        }
                        Frame::InputAudio(audio) => {
                            let samples = converter.convert(&audio)?;
                            if !samples.is_empty() {
                                let append = oai_realtime::InputAudioBufferAppendEvent {
                                    audio: audio_utils::encode_i16(&samples),
                                    event_id: None,
                                };
                                self.sink.send_json(&OAIClientEvent::InputAudioBufferAppend(append)).await?;
                            }
                        }
                        Frame::Context(context) => {
                            for event in context_events(&context) {
                                self.sink.send_json(&event).await?;
                            }
                        }
                        Frame::End => {
                            forward(&output, Frame::End).await?;
                            break;
                        }
                        other => forward(&output, other).await?,
                    }
                },
                message = next_message(&mut source) => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<OAIServerEvent>(&text) {
                            Ok(event) => {
                                for frame in frames_for(event, &mut bot_speaking) {
                                    forward(&output, frame).await?;
                                }
                            }
                            Err(e) => warn!(error = %e, "Ignoring unrecognised OpenAI event"),
                        }
                    }
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        error!(?close_frame, "OpenAI WebSocket connection closed by server.");
                        source = None;
                        forward(&output, Frame::Error {
                            message: "OpenAI Realtime connection closed".to_string(),
                            fatal: true,
                        }).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Error reading from OpenAI WebSocket: {}", e);
                        source = None;
                        forward(&output, Frame::Error {
                            message: format!("OpenAI Realtime connection failed: {}", e),
                            fatal: true,
                        }).await?;
                    }
                    None => {
                        source = None;
                        forward(&output, Frame::Error {
                            message: "OpenAI Realtime connection ended".to_string(),
                            fatal: true,
                        }).await?;
                    }
                },
            }
        }
        Ok(())
    }
}
