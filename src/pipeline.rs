//! Sentence streaming speech pipeline
//!
//! Splits a live text stream into sentences, synthesizes each sentence
//! concurrently, and hands buffers to the playback queue in sentence
//! order regardless of which synthesis finishes first.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::{AudioBuffer, PlaybackQueue};
use crate::backend::SpeechSynthesizer;

/// Characters that end a sentence, including the Arabic question mark.
const BOUNDARIES: [char; 5] = ['.', '?', '!', '؟', '\n'];

/// Incremental sentence splitter over streamed text chunks.
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    buffer: String,
}

impl SentenceSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every sentence it completed, in order.
    /// Each sentence keeps its terminating character.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut sentences = Vec::new();
        while let Some(idx) = self.buffer.find(BOUNDARIES) {
            let boundary = self.buffer[idx..]
                .chars()
                .next()
                .map_or(1, char::len_utf8);
            let sentence: String = self.buffer.drain(..idx + boundary).collect();
            sentences.push(sentence);
        }
        sentences
    }

    /// Take whatever is left in the buffer as a final unterminated sentence.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Orchestrates per-turn sentence synthesis into a playback queue.
pub struct SpeechPipeline {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: PlaybackQueue,
}

impl SpeechPipeline {
    #[must_use]
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, playback: PlaybackQueue) -> Self {
        Self { synthesizer, playback }
    }

    /// Begin speaking one response turn.
    ///
    /// Spawns a reordering task that releases synthesized buffers to the
    /// queue strictly in sentence order. Failed or empty syntheses are
    /// skipped without blocking later sentences.
    #[must_use]
    pub fn begin_turn(&self) -> TurnSpeaker {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(reorder_into_queue(rx, self.playback.clone()));
        TurnSpeaker {
            splitter: SentenceSplitter::new(),
            synthesizer: Arc::clone(&self.synthesizer),
            results: tx,
            next_seq: 0,
        }
    }
}

/// Buffers out-of-order synthesis results and enqueues them in sequence.
async fn reorder_into_queue(
    mut rx: mpsc::UnboundedReceiver<(u64, Option<AudioBuffer>)>,
    playback: PlaybackQueue,
) {
    let mut pending: HashMap<u64, Option<AudioBuffer>> = HashMap::new();
    let mut next = 0u64;
    while let Some((seq, buffer)) = rx.recv().await {
        pending.insert(seq, buffer);
        while let Some(slot) = pending.remove(&next) {
            if let Some(buffer) = slot {
                playback.enqueue(buffer);
            }
            next += 1;
        }
    }
}

/// Feeds one turn's text chunks into concurrent sentence synthesis.
pub struct TurnSpeaker {
    splitter: SentenceSplitter,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    results: mpsc::UnboundedSender<(u64, Option<AudioBuffer>)>,
    next_seq: u64,
}

impl TurnSpeaker {
    /// Push a streamed text chunk, starting synthesis for each completed
    /// sentence immediately.
    pub fn push_text(&mut self, chunk: &str) {
        for sentence in self.splitter.push(chunk) {
            self.submit(sentence);
        }
    }

    /// Flush the residual unterminated sentence and finish the turn.
    /// The reorder task drains once all submitted sentences resolve.
    pub fn finish(mut self) {
        if let Some(rest) = self.splitter.flush() {
            self.submit(rest);
        }
    }

    /// End the turn discarding any residual text. Sentences already
    /// submitted still play.
    pub fn abort(self) {}

    fn submit(&mut self, sentence: String) {
        if sentence.trim().is_empty() {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let synthesizer = Arc::clone(&self.synthesizer);
        let results = self.results.clone();
        tokio::spawn(async move {
            let sample_rate = synthesizer.sample_rate();
            let buffer = match synthesizer.synthesize(sentence.trim()).await {
                Ok(pcm) if !pcm.is_empty() => {
                    Some(AudioBuffer::from_pcm16(&pcm, sample_rate))
                }
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, seq, "sentence synthesis failed, skipping");
                    None
                }
            };
            let _ = results.send((seq, buffer));
        });
    }
}
