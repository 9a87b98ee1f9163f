//! Sequential audio playback
//!
//! A FIFO queue of decoded buffers with exactly one buffer audible at a
//! time. Playback auto-advances on completion; `stop` is a hard flush with
//! no resume.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use super::AudioBuffer;
use crate::{Error, Result};

/// Starts audible playback of a single buffer
pub trait AudioSink: Send + Sync {
    /// Begin playing the buffer, returning a handle to the running source
    ///
    /// # Errors
    ///
    /// Returns error if the output device rejects the buffer
    fn start(&self, buffer: AudioBuffer) -> Result<Box<dyn PlayingSource>>;
}

/// A buffer currently being played by an [`AudioSink`]
pub trait PlayingSource: Send {
    /// Resolves when the source has finished playing
    fn finished(&mut self) -> BoxFuture<'_, ()>;

    /// Silence the source immediately. Its completion must not be reported
    /// through [`PlayingSource::finished`] observers after this call.
    fn stop(self: Box<Self>);
}

enum Command {
    Enqueue(AudioBuffer),
    Stop,
}

/// Handle to the sequential playback queue.
///
/// Cloneable; all clones drive the same worker. Dropping every clone stops
/// playback and ends the worker.
#[derive(Clone)]
pub struct PlaybackQueue {
    tx: mpsc::UnboundedSender<Command>,
    playing_rx: watch::Receiver<bool>,
}

impl PlaybackQueue {
    /// Create a queue playing through the given sink
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (playing_tx, playing_rx) = watch::channel(false);
        tokio::spawn(run_worker(rx, sink, playing_tx));
        Self { tx, playing_rx }
    }

    /// Append a buffer; starts playing immediately if nothing is audible
    pub fn enqueue(&self, buffer: AudioBuffer) {
        let _ = self.tx.send(Command::Enqueue(buffer));
    }

    /// Silence current playback and discard everything queued
    pub fn stop(&self) {
        let _ = self.tx.send(Command::Stop);
    }

    /// Whether a buffer is currently audible
    #[must_use]
    pub fn is_playing(&self) -> bool {
        *self.playing_rx.borrow()
    }

    /// Observe playback state changes
    #[must_use]
    pub fn playing(&self) -> watch::Receiver<bool> {
        self.playing_rx.clone()
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    sink: Arc<dyn AudioSink>,
    playing_tx: watch::Sender<bool>,
) {
    let mut queue: VecDeque<AudioBuffer> = VecDeque::new();
    let mut current: Option<Box<dyn PlayingSource>> = None;

    loop {
        if let Some(source) = current.as_mut() {
            tokio::select! {
                () = source.finished() => {
                    current = None;
                    start_next(&sink, &mut queue, &mut current, &playing_tx);
                }
                cmd = rx.recv() => match cmd {
                    Some(Command::Enqueue(buffer)) => queue.push_back(buffer),
                    Some(Command::Stop) => {
                        if let Some(source) = current.take() {
                            source.stop();
                        }
                        queue.clear();
                        let _ = playing_tx.send(false);
                    }
                    None => break,
                },
            }
        } else {
            match rx.recv().await {
                Some(Command::Enqueue(buffer)) => {
                    queue.push_back(buffer);
                    start_next(&sink, &mut queue, &mut current, &playing_tx);
                }
                Some(Command::Stop) => {
                    queue.clear();
                    let _ = playing_tx.send(false);
                }
                None => break,
            }
        }
    }

    if let Some(source) = current.take() {
        source.stop();
    }
}

/// Pop buffers until one starts playing; unplayable buffers are skipped.
fn start_next(
    sink: &Arc<dyn AudioSink>,
    queue: &mut VecDeque<AudioBuffer>,
    current: &mut Option<Box<dyn PlayingSource>>,
    playing_tx: &watch::Sender<bool>,
) {
    while current.is_none() {
        let Some(buffer) = queue.pop_front() else {
            let _ = playing_tx.send(false);
            return;
        };
        match sink.start(buffer) {
            Ok(source) => {
                *current = Some(source);
                let _ = playing_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start playback; skipping buffer");
            }
        }
    }
}

/// Plays buffers through the default output device.
///
/// Each buffer gets its own output stream on a dedicated thread, since cpal
/// streams cannot cross thread boundaries.
pub struct CpalSink;

impl AudioSink for CpalSink {
    fn start(&self, buffer: AudioBuffer) -> Result<Box<dyn PlayingSource>> {
        if buffer.is_empty() {
            return Err(Error::Audio("empty buffer".to_string()));
        }

        let (done_tx, done_rx) = watch::channel(false);
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        std::thread::spawn(move || {
            if let Err(e) = play_on_thread(&buffer, &stop_rx) {
                tracing::error!(error = %e, "playback thread failed");
            }
            let _ = done_tx.send(true);
        });

        Ok(Box::new(CpalSource { done_rx, stop_tx }))
    }
}

struct CpalSource {
    done_rx: watch::Receiver<bool>,
    stop_tx: std::sync::mpsc::Sender<()>,
}

impl PlayingSource for CpalSource {
    fn finished(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            // A dropped sender means the playback thread exited.
            let _ = self.done_rx.wait_for(|done| *done).await;
        })
    }

    fn stop(self: Box<Self>) {
        let _ = self.stop_tx.send(());
    }
}

fn play_on_thread(buffer: &AudioBuffer, stop_rx: &std::sync::mpsc::Receiver<()>) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let sample_rate = buffer.sample_rate;
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
    let channels = config.channels as usize;

    let samples = buffer.samples.clone();
    let sample_count = samples.len();
    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut pos = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if pos < samples.len() {
                        let s = samples[pos];
                        pos += 1;
                        s
                    } else {
                        finished_cb.store(true, Ordering::Release);
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(sample_rate);
    let deadline = std::time::Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if std::time::Instant::now() >= deadline {
            break;
        }
        // A stop request silences immediately by dropping the stream.
        match stop_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(()) | Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
        }
    }

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");
    Ok(())
}
