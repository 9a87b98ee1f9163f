//! Assistant engine glue
//!
//! Ties the chat session, speech pipeline, playback queue, live
//! controller, and history store into one [`Assistant`] the host UI
//! drives.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use crate::audio::{AudioSink, MediaSource, OutputDevice, PlaybackQueue};
use crate::backend::{ChatBackend, ChatSession, LiveBackend, SpeechSynthesizer};
use crate::config::AssistantConfig;
use crate::history::HistoryStore;
use crate::live::{LiveController, LiveStatus};
use crate::message::{Message, MessageLog};
use crate::pipeline::SpeechPipeline;
use crate::Result;

/// Localized notice shown when a reply stream fails.
pub const ERROR_NOTICE: &str = "عذراً، حدث خطأ ما. حاول مرة أخرى.";

/// The model-facing capabilities an assistant needs.
pub struct Capabilities {
    pub chat: Arc<dyn ChatBackend>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub live: Arc<dyn LiveBackend>,
}

/// The host audio and media devices an assistant plays through.
pub struct Devices {
    pub sink: Arc<dyn AudioSink>,
    pub media: Arc<dyn MediaSource>,
    pub output: Arc<dyn OutputDevice>,
}

/// One assistant instance: message log, voice pipeline, and live session.
pub struct Assistant {
    messages: MessageLog,
    chat: Box<dyn ChatSession>,
    pipeline: SpeechPipeline,
    playback: PlaybackQueue,
    live: LiveController,
    history: Box<dyn HistoryStore>,
    revision_tx: watch::Sender<u64>,
}

impl Assistant {
    /// Build an assistant and load any persisted chat history.
    ///
    /// Must be called within a tokio runtime; the playback queue worker
    /// is spawned here.
    #[must_use]
    pub fn new(
        config: AssistantConfig,
        capabilities: Capabilities,
        devices: Devices,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        let messages = match history.load() {
            Ok(messages) => MessageLog::from_messages(messages),
            Err(e) => {
                tracing::error!(error = %e, "failed to load chat history");
                MessageLog::new()
            }
        };

        let playback = PlaybackQueue::new(devices.sink);
        let pipeline = SpeechPipeline::new(capabilities.synthesizer, playback.clone());
        let live = LiveController::new(
            capabilities.live,
            devices.media,
            devices.output,
            config.clone(),
        );
        let chat = capabilities.chat.start_session();

        Self {
            messages,
            chat,
            pipeline,
            playback,
            live,
            history,
            revision_tx: watch::channel(0).0,
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.messages.messages()
    }

    /// Watch a counter that bumps on every message log mutation.
    #[must_use]
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.revision_tx.subscribe()
    }

    /// Send one user message and speak the streamed reply.
    ///
    /// Failures never propagate: a failed stream replaces the reply
    /// placeholder with [`ERROR_NOTICE`] and the turn ends normally.
    pub async fn send_message(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        self.messages.push(Message::user(text));
        let placeholder = self.messages.push(Message::bot("..."));
        self.touch();

        let mut speaker = self.pipeline.begin_turn();
        let mut full = String::new();
        let mut failed = false;

        match self.chat.send(text).await {
            Ok(mut stream) => {
                while let Some(fragment) = stream.next().await {
                    match fragment {
                        Ok(fragment) => {
                            full.push_str(&fragment);
                            self.messages.set_text(&placeholder, &full);
                            self.touch();
                            speaker.push_text(&fragment);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "chat stream failed");
                            full.clear();
                            self.messages.set_text(&placeholder, ERROR_NOTICE);
                            self.touch();
                            full.push_str(ERROR_NOTICE);
                            failed = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "chat request failed");
                self.messages.set_text(&placeholder, ERROR_NOTICE);
                self.touch();
                full.push_str(ERROR_NOTICE);
                failed = true;
            }
        }

        if failed {
            // A failed turn is not spoken further; drop residual text
            speaker.abort();
        } else {
            speaker.finish();
        }

        if full.trim().is_empty() {
            self.messages.remove(&placeholder);
            self.touch();
        }
        self.save_history();
    }

    /// Halt sentence playback and drop everything queued.
    pub fn stop_audio(&self) {
        self.playback.stop();
    }

    #[must_use]
    pub fn is_audio_playing(&self) -> bool {
        self.playback.is_playing()
    }

    /// Start a live duplex session.
    ///
    /// # Errors
    ///
    /// Returns error if a session is already running or setup fails.
    pub async fn start_live(&mut self) -> Result<()> {
        // Spoken replies and live audio never overlap.
        self.playback.stop();
        self.live.start().await
    }

    /// Tear down the live session. Idempotent.
    pub async fn stop_live(&mut self) {
        self.live.stop().await;
    }

    #[must_use]
    pub fn live_status(&self) -> LiveStatus {
        self.live.status()
    }

    #[must_use]
    pub const fn live(&self) -> &LiveController {
        &self.live
    }

    fn touch(&self) {
        self.revision_tx.send_modify(|revision| *revision += 1);
    }

    /// Persist the log. Skipped entirely while a live session is active.
    fn save_history(&self) {
        if self.live.status() != LiveStatus::Idle {
            return;
        }
        if self.messages.is_empty() {
            return;
        }
        if let Err(e) = self.history.save(self.messages.messages()) {
            tracing::error!(error = %e, "failed to save chat history");
        }
    }
}
