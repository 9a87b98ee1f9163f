//! Salou assistant core
//!
//! Streaming voice/chat engine for an embedded assistant widget:
//! sentence-level streaming TTS over a sequential playback queue, plus a
//! full-duplex live audio session with clock-scheduled, interruptible
//! output. Backends (chat, TTS, live) and host devices (speaker,
//! microphone, camera) sit behind traits; a Gemini provider and cpal
//! device implementations are included.

pub mod audio;
pub mod backend;
pub mod config;
pub mod error;
pub mod history;
pub mod live;
pub mod message;
pub mod pipeline;
pub mod widget;

pub use config::AssistantConfig;
pub use error::{Error, Result};
pub use live::LiveStatus;
pub use message::{Message, MessageLog, Sender};
pub use widget::{Assistant, Capabilities, Devices};
