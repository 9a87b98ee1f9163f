//! Live duplex session controller
//!
//! Streams microphone audio (and optional camera frames) up to the live
//! backend while scheduling returned audio gap-free on the output clock.
//! Model barge-in cancels everything scheduled and resets the clock.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{
    f32_to_i16, i16_to_bytes, AudioBuffer, MediaSource, MediaTracks, OutputContext, OutputDevice,
};
use crate::backend::{LiveBackend, LiveConfig, LiveEvent, LiveHandle, MediaChunk};
use crate::config::AssistantConfig;
use crate::{Error, Result};

/// Connection lifecycle of a live session.
///
/// There is no separate closed state: a server close or runtime error
/// tears the session down and the status returns to [`Idle`], so a new
/// session can start. [`Error`] only marks setup failures, where nothing
/// was torn down.
///
/// [`Idle`]: LiveStatus::Idle
/// [`Error`]: LiveStatus::Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveStatus {
    Idle,
    Connecting,
    Connected,
    Error,
}

struct Session {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns at most one live session at a time and exposes its observable
/// state through watch channels.
pub struct LiveController {
    backend: Arc<dyn LiveBackend>,
    media: Arc<dyn MediaSource>,
    output: Arc<dyn OutputDevice>,
    config: AssistantConfig,
    status_tx: watch::Sender<LiveStatus>,
    speaking_tx: watch::Sender<bool>,
    input_transcript_tx: watch::Sender<String>,
    output_transcript_tx: watch::Sender<String>,
    session: Option<Session>,
}

impl LiveController {
    #[must_use]
    pub fn new(
        backend: Arc<dyn LiveBackend>,
        media: Arc<dyn MediaSource>,
        output: Arc<dyn OutputDevice>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            backend,
            media,
            output,
            config,
            status_tx: watch::channel(LiveStatus::Idle).0,
            speaking_tx: watch::channel(false).0,
            input_transcript_tx: watch::channel(String::new()).0,
            output_transcript_tx: watch::channel(String::new()).0,
            session: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> LiveStatus {
        *self.status_tx.borrow()
    }

    /// Watch the session lifecycle state.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<LiveStatus> {
        self.status_tx.subscribe()
    }

    /// Watch whether model audio is currently scheduled or audible.
    #[must_use]
    pub fn speaking(&self) -> watch::Receiver<bool> {
        self.speaking_tx.subscribe()
    }

    /// Watch the accumulated user speech transcript for the current turn.
    #[must_use]
    pub fn input_transcript(&self) -> watch::Receiver<String> {
        self.input_transcript_tx.subscribe()
    }

    /// Watch the accumulated model speech transcript for the current turn.
    #[must_use]
    pub fn output_transcript(&self) -> watch::Receiver<String> {
        self.output_transcript_tx.subscribe()
    }

    /// Start a live session.
    ///
    /// # Errors
    ///
    /// Returns error if a session is already running, or if media capture,
    /// audio output, or the backend connection cannot be established.
    /// Setup failures leave the controller in the `Error` status with
    /// partial resources released.
    pub async fn start(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            if !session.task.is_finished() {
                return Err(Error::Live("live session already active".to_string()));
            }
        }
        self.session = None;

        self.status_tx.send_replace(LiveStatus::Connecting);
        self.input_transcript_tx.send_replace(String::new());
        self.output_transcript_tx.send_replace(String::new());

        let mut tracks = match self
            .media
            .acquire(self.config.input_sample_rate, self.config.capture_block_size)
        {
            Ok(tracks) => tracks,
            Err(e) => {
                self.status_tx.send_replace(LiveStatus::Error);
                return Err(e);
            }
        };

        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let context = match self.output.open(self.config.output_sample_rate, ended_tx) {
            Ok(context) => context,
            Err(e) => {
                tracks.stop();
                self.status_tx.send_replace(LiveStatus::Error);
                return Err(e);
            }
        };

        let (events_tx, events_rx) = mpsc::channel(256);
        let live_config = LiveConfig {
            model: self.config.live_model.clone(),
            voice: self.config.live_voice.clone(),
            system_instruction: self.config.system_instruction.clone(),
        };
        let handle = match self.backend.connect(live_config, events_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                tracks.stop();
                context.close();
                self.status_tx.send_replace(LiveStatus::Error);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_session(SessionParts {
            handle,
            tracks,
            context,
            events_rx,
            ended_rx,
            shutdown_rx,
            status_tx: self.status_tx.clone(),
            speaking_tx: self.speaking_tx.clone(),
            input_transcript_tx: self.input_transcript_tx.clone(),
            output_transcript_tx: self.output_transcript_tx.clone(),
            config: self.config.clone(),
        }));
        self.session = Some(Session { shutdown_tx, task });
        Ok(())
    }

    /// Stop the current session and release all media. Safe to call when
    /// no session is running, and safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.shutdown_tx.send(true);
            let _ = session.task.await;
        }
        self.status_tx.send_replace(LiveStatus::Idle);
        self.speaking_tx.send_replace(false);
    }
}

struct SessionParts {
    handle: Box<dyn LiveHandle>,
    tracks: MediaTracks,
    context: Box<dyn OutputContext>,
    events_rx: mpsc::Receiver<LiveEvent>,
    ended_rx: mpsc::UnboundedReceiver<u64>,
    shutdown_rx: watch::Receiver<bool>,
    status_tx: watch::Sender<LiveStatus>,
    speaking_tx: watch::Sender<bool>,
    input_transcript_tx: watch::Sender<String>,
    output_transcript_tx: watch::Sender<String>,
    config: AssistantConfig,
}

#[allow(clippy::too_many_lines)]
async fn run_session(mut parts: SessionParts) {
    // Model audio is scheduled back to back on the output clock.
    let mut next_start = 0f64;
    let mut active: HashSet<u64> = HashSet::new();
    let mut connected = false;
    let mut audio_open = true;

    let period = parts.config.frame_interval();
    let mut frames = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = parts.shutdown_rx.changed() => break,

            event = parts.events_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    LiveEvent::Opened => {
                        connected = true;
                        parts.status_tx.send_replace(LiveStatus::Connected);
                    }
                    LiveEvent::InputTranscript(text) => {
                        parts.input_transcript_tx.send_modify(|t| t.push_str(&text));
                    }
                    LiveEvent::OutputTranscript(text) => {
                        parts.output_transcript_tx.send_modify(|t| t.push_str(&text));
                    }
                    LiveEvent::TurnComplete => {
                        parts.input_transcript_tx.send_replace(String::new());
                        parts.output_transcript_tx.send_replace(String::new());
                    }
                    LiveEvent::Audio(pcm) => {
                        let buffer = AudioBuffer::from_pcm16(&pcm, parts.config.output_sample_rate);
                        let duration = buffer.duration();
                        next_start = next_start.max(parts.context.current_time());
                        match parts.context.schedule(buffer, next_start) {
                            Ok(id) => {
                                active.insert(id);
                                next_start += duration;
                                parts.speaking_tx.send_replace(true);
                            }
                            Err(e) => tracing::warn!(error = %e, "failed to schedule live audio"),
                        }
                    }
                    LiveEvent::Interrupted => {
                        tracing::debug!(cancelled = active.len(), "model interrupted, flushing audio");
                        for id in active.drain() {
                            parts.context.cancel(id);
                        }
                        next_start = 0.0;
                        parts.speaking_tx.send_replace(false);
                    }
                    LiveEvent::Error(message) => {
                        tracing::error!(error = %message, "live session error");
                        parts.status_tx.send_replace(LiveStatus::Error);
                        break;
                    }
                    LiveEvent::Closed => break,
                }
            }

            block = parts.tracks.audio.recv(), if audio_open && connected => {
                match block {
                    Some(samples) => {
                        let pcm = i16_to_bytes(&f32_to_i16(&samples));
                        let chunk = MediaChunk::pcm16(&pcm, parts.config.input_sample_rate);
                        if let Err(e) = parts.handle.send(chunk).await {
                            tracing::warn!(error = %e, "microphone upload failed");
                        }
                    }
                    None => audio_open = false,
                }
            }

            _ = frames.tick(), if connected => {
                if let Some(jpeg) = parts.tracks.frames.grab(parts.config.jpeg_quality) {
                    if let Err(e) = parts.handle.send(MediaChunk::jpeg(&jpeg)).await {
                        tracing::warn!(error = %e, "frame upload failed");
                    }
                }
            }

            id = parts.ended_rx.recv() => {
                if let Some(id) = id {
                    active.remove(&id);
                    if active.is_empty() {
                        parts.speaking_tx.send_replace(false);
                    }
                }
            }
        }
    }

    parts.handle.close().await;
    parts.tracks.stop();
    parts.context.close();
    parts.speaking_tx.send_replace(false);
    parts.status_tx.send_replace(LiveStatus::Idle);
}
