//! Speech-to-speech over the Gemini Live WebSocket API.

use super::ws::{SharedSink, WsSource, next_message};
use crate::audio_utils::{self, GEMINI_INPUT_SAMPLE_RATE, GEMINI_OUTPUT_SAMPLE_RATE, RateConverter};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};
use tutor_core::Frame;
use tutor_core::context::{LLMContext, Role};
use tutor_core::frames::AudioFrame;
use tutor_core::pipeline::{FrameProcessor, FrameReceiver, FrameSender, forward};
use tutor_core::service::LLMService;

const GEMINI_LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

mod gemini_live_types {
    use serde::{Deserialize, Serialize};
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(BidiGenerateContentSetup),
        RealtimeInput(BidiGenerateContentRealtimeInput),
        ClientContent(BidiGenerateContentClientContent),
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub input_audio_transcription: Option<AudioTranscriptionConfig>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub output_audio_transcription: Option<AudioTranscriptionConfig>,
    }
    #[derive(Serialize, Default)]
    pub(super) struct AudioTranscriptionConfig {}
    #[derive(Serialize)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize)]
    pub(super) struct Part {
        pub text: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub temperature: f32,
        pub speech_config: SpeechConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
        pub language_code: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentRealtimeInput {
        pub audio: Blob,
    }
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct Blob {
        pub mime_type: String,
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<LiveServerContent>,
    }
    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveServerContent {
        pub model_turn: Option<ServerContentTurn>,
        pub input_transcription: Option<ServerTranscription>,
        pub output_transcription: Option<ServerTranscription>,
        pub turn_complete: Option<bool>,
        pub interrupted: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerContentTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub text: Option<String>,
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerTranscription {
        #[serde(default)]
        pub text: String,
    }
}

use gemini_live_types as types;

#[derive(Debug, Clone)]
pub struct GeminiLiveSettings {
    pub api_key: String,
    pub model: String,
    pub voice_id: String,
    pub system_instruction: String,
    pub temperature: f32,
    pub language: String,
    pub transcribe_user_audio: bool,
    pub transcribe_model_audio: bool,
}

impl GeminiLiveSettings {
    /// The French-speaking tutor voice.
    pub fn tutor(api_key: String, model: String, system_instruction: String) -> Self {
        Self {
            api_key,
            model,
            voice_id: "Puck".to_string(),
            system_instruction,
            temperature: 0.7,
            language: "fr-FR".to_string(),
            transcribe_user_audio: true,
            transcribe_model_audio: true,
        }
    }

    fn setup_message(&self) -> types::ClientMessage {
        let transcription = |enabled: bool| enabled.then(types::AudioTranscriptionConfig::default);
        types::ClientMessage::Setup(types::BidiGenerateContentSetup {
            model: self.model.clone(),
            generation_config: types::GenerationConfig {
                response_modalities: vec![types::ResponseModality::Audio],
                temperature: self.temperature,
                speech_config: types::SpeechConfig {
                    voice_config: types::VoiceConfig {
                        prebuilt_voice_config: types::PrebuiltVoiceConfig {
                            voice_name: self.voice_id.clone(),
                        },
                    },
                    language_code: self.language.clone(),
                },
            },
            system_instruction: types::Content {
                role: None,
                parts: vec![types::Part {
                    text: self.system_instruction.clone(),
                }],
            },
            input_audio_transcription: transcription(self.transcribe_user_audio),
            output_audio_transcription: transcription(self.transcribe_model_audio),
        })
    }
}

pub struct GeminiLiveService {
    settings: Arc<GeminiLiveSettings>,
    sink: SharedSink,
}

impl GeminiLiveService {
    pub fn new(settings: GeminiLiveSettings) -> Self {
        Self {
            settings: Arc::new(settings),
            sink: SharedSink::default(),
        }
    }
}

#[async_trait]
impl LLMService for GeminiLiveService {
    fn processor(&self) -> Box<dyn FrameProcessor> {
        Box::new(GeminiLiveProcessor {
            settings: self.settings.clone(),
            sink: self.sink.clone(),
        })
    }

    async fn close(&self) -> Result<()> {
        if self.sink.close().await? {
            info!("Closed Gemini Live connection.");
        }
        Ok(())
    }
}

fn client_content(context: &LLMContext) -> types::ClientMessage {
    let turns = context
        .messages()
        .iter()
        .map(|message| types::Content {
            role: Some(
                match message.role {
                    Role::Assistant => "model",
                    _ => "user",
                }
                .to_string(),
            ),
            parts: vec![types::Part {
                text: message.content.clone(),
            }],
        })
        .collect();
    types::ClientMessage::ClientContent(types::BidiGenerateContentClientContent {
        turns,
        turn_complete: true,
    })
}

fn realtime_audio(samples: &[i16]) -> types::ClientMessage {
    types::ClientMessage::RealtimeInput(types::BidiGenerateContentRealtimeInput {
        audio: types::Blob {
            mime_type: format!("audio/pcm;rate={}", GEMINI_INPUT_SAMPLE_RATE),
            data: audio_utils::encode_i16(samples),
        },
    })
}

/// Maps one server content message to pipeline frames.
fn frames_for(content: types::LiveServerContent, bot_speaking: &mut bool) -> Vec<Frame> {
    let mut frames = Vec::new();

    if let Some(transcription) = content.input_transcription {
        if !transcription.text.trim().is_empty() {
            frames.push(Frame::Transcription {
                text: transcription.text,
                is_final: true,
            });
        }
    }
    if content.interrupted == Some(true) {
        if *bot_speaking {
            *bot_speaking = false;
            frames.push(Frame::BotStoppedSpeaking);
        }
        frames.push(Frame::UserStartedSpeaking);
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            let Some(blob) = part.inline_data else {
                continue;
            };
            let samples = audio_utils::decode_i16(&blob.data);
            if samples.is_empty() {
                continue;
            }
            if !*bot_speaking {
                *bot_speaking = true;
                frames.push(Frame::BotStartedSpeaking);
            }
            frames.push(Frame::OutputAudio(AudioFrame::new(samples, GEMINI_OUTPUT_SAMPLE_RATE)));
        }
    }
    if let Some(transcription) = content.output_transcription {
        if !transcription.text.is_empty() {
            frames.push(Frame::LLMText(transcription.text));
        }
    }
    if content.turn_complete == Some(true) && *bot_speaking {
        *bot_speaking = false;
        frames.push(Frame::BotStoppedSpeaking);
    }
    frames
}

struct GeminiLiveProcessor {
    settings: Arc<GeminiLiveSettings>,
    sink: SharedSink,
}

/// Per-run connection state.
#[derive(Default)]
struct LiveSession {
    ready: bool,
    bot_speaking: bool,
    // Context turns queued before the server acknowledged setup.
    pending: Vec<types::ClientMessage>,
}

impl GeminiLiveProcessor {
    async fn connect(&self) -> Result<WsSource> {
        let url = format!("{}?key={}", GEMINI_LIVE_ENDPOINT, self.settings.api_key);
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Gemini Live WebSocket")?;
        let source = self.sink.install(ws_stream).await;
        info!(model = %self.settings.model, "Connected to Gemini Live API.");
        self.sink.send_json(&self.settings.setup_message()).await?;
        Ok(source)
    }

    async fn on_server_payload(
        &self,
        payload: &[u8],
        session: &mut LiveSession,
        output: &FrameSender,
    ) -> Result<()> {
        let message: types::ServerMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable Gemini message");
                return Ok(());
            }
        };
        if message.setup_complete.is_some() && !session.ready {
            info!("Gemini session setup is complete. Ready for bidirectional streaming.");
            session.ready = true;
            for pending in session.pending.drain(..) {
                self.sink.send_json(&pending).await?;
            }
        }
        if let Some(content) = message.server_content {
            for frame in frames_for(content, &mut session.bot_speaking) {
                forward(output, frame).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FrameProcessor for GeminiLiveProcessor {
    fn name(&self) -> &str {
        "gemini_live"
    }

    async fn run(self: Box<Self>, mut input: FrameReceiver, output: FrameSender) -> Result<()> {
        let mut source: Option<WsSource> = None;
        let mut session = LiveSession::default();
        let mut converter = RateConverter::new(GEMINI_INPUT_SAMPLE_RATE);

        loop {
            tokio::select! {
                frame = input.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        Frame::Start(params) => {
                            if source.is_none() {
                                source = Some(self.connect().await?);
                            }
                            forward(&output, Frame::Start(params)).await?;
                        }
                        Frame::InputAudio(audio) => {
                            if session.ready {
                                let samples = converter.convert(&audio)?;
                                if !samples.is_empty() {
                                    self.sink.send_json(&realtime_audio(&samples)).await?;
                                }
                            }
                        }
                        Frame::Context(context) => {
                            let message = client_content(&context);
                            if session.ready {
                                self.sink.send_json(&message).await?;
                            } else {
                                debug!("Queueing context until Gemini setup completes");
                                session.pending.push(message);
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
                        self.on_server_payload(text.as_str().as_bytes(), &mut session, &output).await?;
                    }
                    Some(Ok(WsMessage::Binary(bytes))) => {
                        self.on_server_payload(&bytes, &mut session, &output).await?;
                    }
                    Some(Ok(WsMessage::Close(close_frame))) => {
                        error!(?close_frame, "Gemini WebSocket connection closed by server.");
                        source = None;
                        forward(&output, Frame::Error {
                            message: "Gemini Live connection closed".to_string(),
                            fatal: true,
                        }).await?;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Error reading from Gemini WebSocket: {}", e);
                        source = None;
                        forward(&output, Frame::Error {
                            message: format!("Gemini Live connection failed: {}", e),
                            fatal: true,
                        }).await?;
                    }
                    None => {
                        source = None;
                        forward(&output, Frame::Error {
                            message: "Gemini Live connection ended".to_string(),
                            fatal: true,
                        }).await?;
                    }
                },
            }
        }
        Ok(())
    }
}
