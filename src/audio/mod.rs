//! Audio primitives: PCM conversion and decoded buffers

pub mod capture;
pub mod output;
pub mod playback;

pub use capture::{CpalMediaSource, FrameGrabber, MediaSource, MediaTracks, NoCamera};
pub use output::{CpalOutputDevice, OutputContext, OutputDevice};
pub use playback::{AudioSink, CpalSink, PlaybackQueue, PlayingSource};

/// A decoded, playable block of mono audio samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Samples in the range `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Decode little-endian 16-bit PCM bytes into a buffer
    #[must_use]
    pub fn from_pcm16(bytes: &[u8], sample_rate: u32) -> Self {
        let samples = bytes_to_i16(bytes)
            .iter()
            .map(|&s| f32::from(s) / 32768.0)
            .collect();
        Self { samples, sample_rate }
    }

    /// Playback duration in seconds
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Convert f32 samples to i16 with clamping to the representable range
#[must_use]
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            #[allow(clippy::cast_possible_truncation)]
            let clamped = (s * 32768.0).clamp(-32768.0, 32767.0) as i16;
            clamped
        })
        .collect()
}

/// Pack i16 samples as little-endian bytes
#[must_use]
pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian bytes into i16 samples; a trailing odd byte is dropped
#[must_use]
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
