//! External backend capabilities
//!
//! The engine consumes three operations from a hosted generative-AI
//! backend: a streaming chat call, per-sentence speech synthesis, and a
//! bidirectional live session. Each sits behind a trait so any backend
//! offering equivalent operations can be plugged in; `gemini` provides the
//! concrete implementation.

pub mod gemini;

use async_trait::async_trait;
use base64::Engine as _;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::Result;

/// Ordered stream of reply text fragments for one bot turn
pub type TextStream = BoxStream<'static, Result<String>>;

/// A persistent chat session accumulating turn history
#[async_trait]
pub trait ChatSession: Send {
    /// Send a user message and stream back the reply in fragments
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started; mid-stream failures
    /// surface as `Err` items on the stream
    async fn send(&mut self, text: &str) -> Result<TextStream>;
}

/// Creates chat sessions
pub trait ChatBackend: Send + Sync {
    /// Start a fresh session; history accumulates for its lifetime
    fn start_session(&self) -> Box<dyn ChatSession>;
}

/// Converts a text string to a block of audio samples
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize speech, returning 16-bit little-endian PCM bytes, mono,
    /// at [`SpeechSynthesizer::sample_rate`] Hz
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails for this text
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Sample rate of synthesized audio in Hz
    fn sample_rate(&self) -> u32;
}

/// A media payload uploaded to a live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    /// Encoding tag, e.g. `audio/pcm;rate=16000` or `image/jpeg`
    pub mime_type: String,
    /// Base64-encoded payload
    pub data: String,
}

impl MediaChunk {
    /// Wrap raw 16-bit PCM bytes captured at `sample_rate` Hz
    #[must_use]
    pub fn pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        Self {
            mime_type: format!("audio/pcm;rate={sample_rate}"),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Wrap an encoded JPEG frame
    #[must_use]
    pub fn jpeg(bytes: &[u8]) -> Self {
        Self {
            mime_type: "image/jpeg".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// Typed events pushed by a live session
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The session is open and ready for realtime input
    Opened,
    /// Fragment of what the server heard the user say
    InputTranscript(String),
    /// Fragment of what the bot is saying
    OutputTranscript(String),
    /// The current turn finished; transcript buffers reset
    TurnComplete,
    /// A block of 16-bit PCM audio to play
    Audio(Vec<u8>),
    /// The user barged in; all pending bot audio must be discarded
    Interrupted,
    /// The session failed
    Error(String),
    /// The session closed
    Closed,
}

/// Configuration for opening a live session
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Live model identifier
    pub model: String,
    /// Voice used for the audio response modality
    pub voice: String,
    /// System instruction for the session
    pub system_instruction: String,
}

/// An open live session accepting realtime media input
#[async_trait]
pub trait LiveHandle: Send + Sync {
    /// Upload a media chunk
    ///
    /// # Errors
    ///
    /// Returns error if the session is no longer writable
    async fn send(&self, chunk: MediaChunk) -> Result<()>;

    /// Close the session. Idempotent.
    async fn close(&self);
}

/// Opens live sessions
#[async_trait]
pub trait LiveBackend: Send + Sync {
    /// Connect a live session. Events are pushed to `events` until the
    /// session closes; an [`LiveEvent::Opened`] event signals readiness.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(
        &self,
        config: LiveConfig,
        events: mpsc::Sender<LiveEvent>,
    ) -> Result<Box<dyn LiveHandle>>;
}
