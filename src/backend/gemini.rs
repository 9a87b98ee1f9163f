//! Gemini backend provider
//!
//! Chat uses the SSE `streamGenerateContent` endpoint, TTS the audio
//! response modality of `generateContent`, and live sessions the
//! `BidiGenerateContent` websocket.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::{connect_async, tungstenite};

use super::{
    ChatBackend, ChatSession, LiveBackend, LiveConfig, LiveEvent, LiveHandle, MediaChunk,
    SpeechSynthesizer, TextStream,
};
use crate::config::AssistantConfig;
use crate::{Error, Result};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Sample rate of Gemini TTS and live audio output
const TTS_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

impl Content {
    fn new(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![Part { text: text.to_string() }],
        }
    }
}

/// Gemini implementation of the chat, TTS, and live capabilities
pub struct GeminiBackend {
    client: reqwest::Client,
    api_key: String,
    chat_model: String,
    tts_model: String,
    tts_voice: String,
    system_instruction: String,
}

impl GeminiBackend {
    /// Create a backend from an API key and engine configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, config: &AssistantConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Gemini API key required".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            chat_model: config.chat_model.clone(),
            tts_model: config.tts_model.clone(),
            tts_voice: config.tts_voice.clone(),
            system_instruction: config.system_instruction.clone(),
        })
    }
}

impl ChatBackend for GeminiBackend {
    fn start_session(&self) -> Box<dyn ChatSession> {
        Box::new(GeminiChatSession {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            model: self.chat_model.clone(),
            system_instruction: self.system_instruction.clone(),
            history: Arc::new(Mutex::new(Vec::new())),
        })
    }
}

/// Chat session with client-side history accumulation
struct GeminiChatSession {
    client: reqwest::Client,
    api_key: String,
    model: String,
    system_instruction: String,
    history: Arc<Mutex<Vec<Content>>>,
}

#[async_trait]
impl ChatSession for GeminiChatSession {
    async fn send(&mut self, text: &str) -> Result<TextStream> {
        let contents = {
            let mut history = self.history.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            history.push(Content::new("user", text));
            history.clone()
        };

        let url = format!("{API_BASE}/models/{}:streamGenerateContent?alt=sse", self.model);
        let body = json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": self.system_instruction }] },
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Chat(format!("Gemini chat error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let history = Arc::clone(&self.history);

        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut pending = Vec::new();
            let mut reply = String::new();

            while let Some(part) = bytes.next().await {
                match part {
                    Ok(chunk) => {
                        pending.extend_from_slice(&chunk);
                        for data in drain_sse_events(&mut pending) {
                            if let Some(text) = chunk_text(&data) {
                                reply.push_str(&text);
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }

            if !reply.is_empty() {
                let mut history =
                    history.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                history.push(Content::new("model", &reply));
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Pull every complete `data:` event payload out of the SSE byte buffer.
fn drain_sse_events(pending: &mut Vec<u8>) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = pending.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end();
        if let Some(data) = line.strip_prefix("data: ") {
            if data != "[DONE]" {
                events.push(data.to_string());
            }
        }
    }
    events
}

/// Extract the text fragment from one streamed chunk, if any.
fn chunk_text(data: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

#[async_trait]
impl SpeechSynthesizer for GeminiBackend {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let url = format!("{API_BASE}/models/{}:generateContent", self.tts_model);
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.tts_voice } }
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("Gemini TTS error {status}: {body}")));
        }

        let value: serde_json::Value = response.json().await?;
        let data = value
            .pointer("/candidates/0/content/parts/0/inlineData/data")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| Error::Synthesis("no audio in TTS response".to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Synthesis(format!("invalid audio payload: {e}")))
    }

    fn sample_rate(&self) -> u32 {
        TTS_SAMPLE_RATE
    }
}

enum WriterCommand {
    Chunk(MediaChunk),
    Close,
}

struct GeminiLiveHandle {
    tx: mpsc::Sender<WriterCommand>,
}

#[async_trait]
impl LiveHandle for GeminiLiveHandle {
    async fn send(&self, chunk: MediaChunk) -> Result<()> {
        self.tx
            .send(WriterCommand::Chunk(chunk))
            .await
            .map_err(|_| Error::Live("session closed".to_string()))
    }

    async fn close(&self) {
        let _ = self.tx.send(WriterCommand::Close).await;
    }
}

#[async_trait]
impl LiveBackend for GeminiBackend {
    async fn connect(
        &self,
        config: LiveConfig,
        events: mpsc::Sender<LiveEvent>,
    ) -> Result<Box<dyn LiveHandle>> {
        let url = format!("{LIVE_ENDPOINT}?key={}", self.api_key);
        let (socket, _) = connect_async(url).await?;
        let (mut ws_tx, mut ws_rx) = socket.split();

        let setup = json!({
            "setup": {
                "model": format!("models/{}", config.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": config.voice }
                        }
                    }
                },
                "systemInstruction": { "parts": [{ "text": config.system_instruction }] },
                "inputAudioTranscription": {},
                "outputAudioTranscription": {},
            }
        });
        ws_tx
            .send(tungstenite::Message::Text(setup.to_string().into()))
            .await?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WriterCommand>(64);

        // Writer: forward realtime input until close.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    WriterCommand::Chunk(chunk) => {
                        let msg = json!({
                            "realtimeInput": {
                                "mediaChunks": [{
                                    "mimeType": chunk.mime_type,
                                    "data": chunk.data,
                                }]
                            }
                        });
                        if let Err(e) = ws_tx
                            .send(tungstenite::Message::Text(msg.to_string().into()))
                            .await
                        {
                            tracing::warn!(error = %e, "live upload failed");
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
            let _ = ws_tx.close().await;
        });

        // Reader: translate server messages into typed events.
        tokio::spawn(async move {
            while let Some(message) = ws_rx.next().await {
                match message {
                    Ok(tungstenite::Message::Text(text)) => {
                        forward_server_message(text.as_bytes(), &events).await;
                    }
                    Ok(tungstenite::Message::Binary(bytes)) => {
                        forward_server_message(&bytes, &events).await;
                    }
                    Ok(tungstenite::Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(LiveEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = events.send(LiveEvent::Closed).await;
        });

        Ok(Box::new(GeminiLiveHandle { tx: cmd_tx }))
    }
}

/// Decode one server message and push the events it carries.
async fn forward_server_message(raw: &[u8], events: &mpsc::Sender<LiveEvent>) {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(raw) else {
        tracing::warn!("unparseable live server message");
        return;
    };

    if value.get("setupComplete").is_some() {
        let _ = events.send(LiveEvent::Opened).await;
        return;
    }

    let Some(content) = value.get("serverContent") else {
        return;
    };

    if let Some(text) = content
        .pointer("/outputTranscription/text")
        .and_then(serde_json::Value::as_str)
    {
        let _ = events.send(LiveEvent::OutputTranscript(text.to_string())).await;
    }
    if let Some(text) = content
        .pointer("/inputTranscription/text")
        .and_then(serde_json::Value::as_str)
    {
        let _ = events.send(LiveEvent::InputTranscript(text.to_string())).await;
    }
    if content.get("turnComplete").and_then(serde_json::Value::as_bool) == Some(true) {
        let _ = events.send(LiveEvent::TurnComplete).await;
    }
    if let Some(parts) = content
        .pointer("/modelTurn/parts")
        .and_then(serde_json::Value::as_array)
    {
        for part in parts {
            if let Some(data) = part
                .pointer("/inlineData/data")
                .and_then(serde_json::Value::as_str)
            {
                match base64::engine::general_purpose::STANDARD.decode(data) {
                    Ok(bytes) => {
                        let _ = events.send(LiveEvent::Audio(bytes)).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "invalid live audio payload"),
                }
            }
        }
    }
    if content.get("interrupted").and_then(serde_json::Value::as_bool) == Some(true) {
        let _ = events.send(LiveEvent::Interrupted).await;
    }
}
