//! Media acquisition for live sessions
//!
//! A [`MediaSource`] hands out microphone audio as fixed-size f32 blocks
//! plus a camera [`FrameGrabber`]. The cpal implementation covers the
//! microphone; camera frames come from whatever grabber the host embeds.

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Produces already-encoded JPEG camera frames
pub trait FrameGrabber: Send + Sync {
    /// Capture the current frame at the given quality (0.0..=1.0).
    /// Returns `None` when no frame is ready; such frames are dropped.
    fn grab(&self, quality: f32) -> Option<Vec<u8>>;
}

/// Grabber for hosts without a camera; every frame is skipped
pub struct NoCamera;

impl FrameGrabber for NoCamera {
    fn grab(&self, _quality: f32) -> Option<Vec<u8>> {
        None
    }
}

/// Acquires microphone and camera access
pub trait MediaSource: Send + Sync {
    /// Acquire capture tracks. Audio arrives as `block_size`-sample blocks
    /// at `sample_rate` Hz, driven by the capture hardware's cadence.
    ///
    /// # Errors
    ///
    /// Returns error if the devices are unavailable or permission is denied
    fn acquire(&self, sample_rate: u32, block_size: usize) -> Result<MediaTracks>;
}

/// Live capture tracks: a microphone block stream and a camera grabber
pub struct MediaTracks {
    /// Fixed-size microphone sample blocks
    pub audio: mpsc::UnboundedReceiver<Vec<f32>>,
    /// Camera frame source
    pub frames: Arc<dyn FrameGrabber>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl MediaTracks {
    /// Bundle capture tracks
    #[must_use]
    pub fn new(audio: mpsc::UnboundedReceiver<Vec<f32>>, frames: Arc<dyn FrameGrabber>) -> Self {
        Self { audio, frames, on_stop: None }
    }

    /// Register a teardown hook invoked exactly once by [`MediaTracks::stop`]
    #[must_use]
    pub fn with_on_stop(mut self, on_stop: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(on_stop));
        self
    }

    /// Release all capture resources. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(on_stop) = self.on_stop.take() {
            on_stop();
        }
    }
}

impl Drop for MediaTracks {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Captures microphone audio from the default input device
pub struct CpalMediaSource {
    frames: Arc<dyn FrameGrabber>,
}

impl CpalMediaSource {
    /// Create a source pairing the default microphone with the given camera
    #[must_use]
    pub fn new(frames: Arc<dyn FrameGrabber>) -> Self {
        Self { frames }
    }
}

impl MediaSource for CpalMediaSource {
    fn acquire(&self, sample_rate: u32, block_size: usize) -> Result<MediaTracks> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Media("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Media(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .ok_or_else(|| Error::Media("no suitable capture config found".to_string()))?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            block_size,
            "audio capture acquired"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        // cpal streams are not Send; the stream lives on its own thread and
        // blocks until stop.
        std::thread::spawn(move || {
            let mut pending: Vec<f32> = Vec::with_capacity(block_size * 2);
            let stream = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    pending.extend_from_slice(data);
                    while pending.len() >= block_size {
                        let block: Vec<f32> = pending.drain(..block_size).collect();
                        if tx.send(block).is_err() {
                            return;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            );
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build capture stream");
                    return;
                }
            };
            if let Err(e) = stream.play() {
                tracing::error!(error = %e, "failed to start capture stream");
                return;
            }
            let _ = shutdown_rx.recv();
            drop(stream);
            tracing::debug!("audio capture stopped");
        });

        Ok(MediaTracks::new(rx, Arc::clone(&self.frames)).with_on_stop(move || {
            let _ = shutdown_tx.send(());
        }))
    }
}
