//! Configuration for the assistant engine

/// Sample rate for microphone capture (16kHz for speech)
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate for synthesized and live audio playback
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Capture block size in samples (~256ms at 16kHz)
pub const CAPTURE_BLOCK_SIZE: usize = 4096;

/// Camera frames sent per second during a live session
pub const FRAME_RATE: f64 = 2.0;

/// JPEG quality for camera frames
pub const JPEG_QUALITY: f32 = 0.7;

/// Default persona prompt (Arabic-first personal assistant)
const SYSTEM_INSTRUCTION: &str = "You are 'Salou' (سالووه), مساعد ذكاء اصطناعي عربي متكامل، وخبير برمجة ومساعد شخصي ممتاز. لغتك الأساسية هي العربية، وخصوصاً اللهجة المصرية. شخصيتك ودودة، واثقة، ومرحة قليلاً. حافظ على ردودك موجزة ومفيدة.";

/// Assistant engine configuration
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Chat model identifier
    pub chat_model: String,

    /// TTS model identifier
    pub tts_model: String,

    /// Live (bidirectional audio) model identifier
    pub live_model: String,

    /// Voice used for per-sentence TTS
    pub tts_voice: String,

    /// Voice used for live session audio
    pub live_voice: String,

    /// System instruction shared by chat and live sessions
    pub system_instruction: String,

    /// Microphone capture sample rate in Hz
    pub input_sample_rate: u32,

    /// Playback sample rate in Hz (TTS and live audio)
    pub output_sample_rate: u32,

    /// Number of samples per uploaded capture block
    pub capture_block_size: usize,

    /// Camera frames per second during live sessions
    pub frame_rate: f64,

    /// JPEG quality for camera frames (0.0..=1.0)
    pub jpeg_quality: f32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            chat_model: "gemini-2.5-flash".to_string(),
            tts_model: "gemini-2.5-flash-preview-tts".to_string(),
            live_model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
            tts_voice: "Kore".to_string(),
            live_voice: "Zephyr".to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            input_sample_rate: INPUT_SAMPLE_RATE,
            output_sample_rate: OUTPUT_SAMPLE_RATE,
            capture_block_size: CAPTURE_BLOCK_SIZE,
            frame_rate: FRAME_RATE,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

impl AssistantConfig {
    /// Interval between camera frames
    ///
    /// # Panics
    ///
    /// Panics if `frame_rate` is not a positive finite number.
    #[must_use]
    pub fn frame_interval(&self) -> std::time::Duration {
        assert!(
            self.frame_rate.is_finite() && self.frame_rate > 0.0,
            "frame_rate must be positive"
        );
        std::time::Duration::from_secs_f64(1.0 / self.frame_rate)
    }
}
