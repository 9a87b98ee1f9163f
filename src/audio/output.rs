//! Clock-scheduled audio output for live sessions
//!
//! Live audio chunks arrive at irregular network intervals but must play
//! back-to-back. An [`OutputContext`] exposes a running clock and schedules
//! each buffer at an absolute time on it; overlapping sources are mixed.
//! Source completion is reported through the channel supplied at open time.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use super::AudioBuffer;
use crate::{Error, Result};

/// Opens output contexts for live playback
pub trait OutputDevice: Send + Sync {
    /// Open a context at the given sample rate. Completed (or cancelled)
    /// source ids are delivered on `ended`.
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputContext>>;
}

/// A running output clock with absolute-time scheduling
pub trait OutputContext: Send + Sync {
    /// Seconds elapsed since the context was opened
    fn current_time(&self) -> f64;

    /// Schedule a buffer to start at `at` seconds on the context clock,
    /// returning the source id.
    ///
    /// # Errors
    ///
    /// Returns error if the context is closed
    fn schedule(&self, buffer: AudioBuffer, at: f64) -> Result<u64>;

    /// Silence and discard a scheduled or playing source
    fn cancel(&self, id: u64);

    /// Release the output device. Idempotent.
    fn close(&self);
}

struct Scheduled {
    id: u64,
    start_frame: u64,
    pos: usize,
    samples: Vec<f32>,
}

struct MixState {
    /// Frames rendered since open; the context clock.
    frame: u64,
    next_id: u64,
    sources: Vec<Scheduled>,
    closed: bool,
}

/// Opens cpal-backed output contexts on the default output device
pub struct CpalOutputDevice;

impl OutputDevice for CpalOutputDevice {
    fn open(
        &self,
        sample_rate: u32,
        ended: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputContext>> {
        CpalOutputContext::open(sample_rate, ended).map(|ctx| Box::new(ctx) as _)
    }
}

/// Mixes scheduled sources into a single cpal output stream.
///
/// The stream lives on a dedicated thread; this handle shares the mix state
/// with the stream callback.
pub struct CpalOutputContext {
    state: Arc<Mutex<MixState>>,
    sample_rate: u32,
    shutdown_tx: std::sync::mpsc::Sender<()>,
    ended_tx: mpsc::UnboundedSender<u64>,
}

impl CpalOutputContext {
    fn open(sample_rate: u32, ended_tx: mpsc::UnboundedSender<u64>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = config.channels as usize;

        let state = Arc::new(Mutex::new(MixState {
            frame: 0,
            next_id: 0,
            sources: Vec::new(),
            closed: false,
        }));
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let cb_state = Arc::clone(&state);
        let cb_ended = ended_tx.clone();
        std::thread::spawn(move || {
            let stream = device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    mix_frames(&cb_state, &cb_ended, data, channels);
                },
                |err| {
                    tracing::error!(error = %err, "live output stream error");
                },
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build live output stream");
                    return;
                }
            };
            if let Err(e) = stream.play() {
                tracing::error!(error = %e, "failed to start live output stream");
                return;
            }
            // Park until close; dropping the stream silences everything.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        tracing::debug!(sample_rate, channels, "live output context opened");

        Ok(Self { state, sample_rate, shutdown_tx, ended_tx })
    }
}

impl OutputContext for CpalOutputContext {
    fn current_time(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.frame as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&self, buffer: AudioBuffer, at: f64) -> Result<u64> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.closed {
            return Err(Error::Audio("output context closed".to_string()));
        }
        let id = state.next_id;
        state.next_id += 1;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        state.sources.push(Scheduled {
            id,
            start_frame,
            pos: 0,
            samples: buffer.samples,
        });
        Ok(id)
    }

    fn cancel(&self, id: u64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = state.sources.len();
        state.sources.retain(|s| s.id != id);
        if state.sources.len() != before {
            let _ = self.ended_tx.send(id);
        }
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.closed = true;
        state.sources.clear();
        drop(state);
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sum every due source into the output frames, reporting finished ids.
fn mix_frames(
    state: &Arc<Mutex<MixState>>,
    ended: &mpsc::UnboundedSender<u64>,
    data: &mut [f32],
    channels: usize,
) {
    let mut state = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    for frame in data.chunks_mut(channels) {
        let mut sample = 0.0f32;
        let now = state.frame;
        for source in &mut state.sources {
            if source.start_frame <= now && source.pos < source.samples.len() {
                sample += source.samples[source.pos];
                source.pos += 1;
            }
        }
        for out in frame.iter_mut() {
            *out = sample.clamp(-1.0, 1.0);
        }
        state.frame += 1;
    }
    // Reap finished sources after advancing the clock.
    let mut finished = Vec::new();
    state.sources.retain(|s| {
        if s.pos >= s.samples.len() {
            finished.push(s.id);
            false
        } else {
            true
        }
    });
    drop(state);
    for id in finished {
        let _ = ended.send(id);
    }
}
