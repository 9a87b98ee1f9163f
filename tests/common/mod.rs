//! Shared test fakes for the backend and device seams
//!
//! Tests exercise the engine without audio hardware or network. Buffers
//! are identified by a single marker sample so assertions can follow a
//! buffer from synthesis through playback.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Notify};

use salou_assistant::audio::{
    AudioBuffer, AudioSink, FrameGrabber, MediaSource, MediaTracks, OutputContext, OutputDevice,
    PlayingSource,
};
use salou_assistant::backend::{
    ChatBackend, ChatSession, LiveBackend, LiveConfig, LiveEvent, LiveHandle, MediaChunk,
    SpeechSynthesizer, TextStream,
};
use salou_assistant::{Error, Result};

/// PCM bytes for a one-sample buffer whose sample encodes `marker`
#[must_use]
pub fn marker_pcm(marker: i16) -> Vec<u8> {
    marker.to_le_bytes().to_vec()
}

/// A decoded one-sample buffer identified by `marker`
#[must_use]
pub fn marker_buffer(marker: i16) -> AudioBuffer {
    AudioBuffer::from_pcm16(&marker_pcm(marker), 24_000)
}

/// Recover the marker from a buffer produced by [`marker_buffer`]
#[must_use]
pub fn marker_of(buffer: &AudioBuffer) -> i16 {
    #[allow(clippy::cast_possible_truncation)]
    let marker = (buffer.samples[0] * 32768.0).round() as i16;
    marker
}

/// Let spawned engine tasks run until they go idle
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Playback sink

struct PlayingState {
    marker: i16,
    done_tx: watch::Sender<bool>,
    stopped: Arc<AtomicBool>,
}

/// Sink that records started buffers and lets tests complete them manually
#[derive(Clone, Default)]
pub struct FakeSink {
    plays: Arc<Mutex<Vec<PlayingState>>>,
    rejected: Arc<Mutex<HashSet<i16>>>,
}

impl FakeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [`AudioSink::start`] fail for buffers carrying this marker
    pub fn reject(&self, marker: i16) {
        self.rejected.lock().unwrap().insert(marker);
    }

    /// Markers of every buffer that started playing, in start order
    #[must_use]
    pub fn started(&self) -> Vec<i16> {
        self.plays.lock().unwrap().iter().map(|p| p.marker).collect()
    }

    /// Report the `index`-th started buffer as finished
    pub fn complete(&self, index: usize) {
        let plays = self.plays.lock().unwrap();
        let _ = plays[index].done_tx.send(true);
    }

    /// Whether the `index`-th started buffer was stopped mid-play
    #[must_use]
    pub fn was_stopped(&self, index: usize) -> bool {
        self.plays.lock().unwrap()[index].stopped.load(Ordering::Acquire)
    }
}

impl AudioSink for FakeSink {
    fn start(&self, buffer: AudioBuffer) -> Result<Box<dyn PlayingSource>> {
        let marker = marker_of(&buffer);
        if self.rejected.lock().unwrap().contains(&marker) {
            return Err(Error::Audio(format!("rejected marker {marker}")));
        }
        let (done_tx, done_rx) = watch::channel(false);
        let stopped = Arc::new(AtomicBool::new(false));
        self.plays.lock().unwrap().push(PlayingState {
            marker,
            done_tx,
            stopped: Arc::clone(&stopped),
        });
        Ok(Box::new(FakePlaying { done_rx, stopped }))
    }
}

struct FakePlaying {
    done_rx: watch::Receiver<bool>,
    stopped: Arc<AtomicBool>,
}

impl PlayingSource for FakePlaying {
    fn finished(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.done_rx.wait_for(|done| *done).await;
        })
    }

    fn stop(self: Box<Self>) {
        self.stopped.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Speech synthesis

#[derive(Default)]
struct SynthState {
    responses: HashMap<String, i16>,
    failing: HashSet<String>,
    gates: HashMap<String, Arc<Notify>>,
    calls: Vec<String>,
}

/// Synthesizer with scripted per-sentence responses, failures, and gates
#[derive(Clone, Default)]
pub struct FakeSynth {
    state: Arc<Mutex<SynthState>>,
}

impl FakeSynth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `sentence` with a one-sample buffer carrying `marker`
    pub fn respond(&self, sentence: &str, marker: i16) {
        self.state.lock().unwrap().responses.insert(sentence.to_string(), marker);
    }

    /// Fail synthesis of `sentence`
    pub fn fail(&self, sentence: &str) {
        self.state.lock().unwrap().failing.insert(sentence.to_string());
    }

    /// Hold synthesis of `sentence` until the returned gate is notified
    #[must_use]
    pub fn gate(&self, sentence: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().gates.insert(sentence.to_string(), Arc::clone(&gate));
        gate
    }

    /// Sentences synthesized so far, in call order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(text.to_string());
            state.gates.get(text).cloned()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock().unwrap();
        if state.failing.contains(text) {
            return Err(Error::Synthesis(format!("scripted failure for {text:?}")));
        }
        Ok(state.responses.get(text).map(|&m| marker_pcm(m)).unwrap_or_default())
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

// ---------------------------------------------------------------------------
// Chat

/// One scripted reply fragment
#[derive(Clone)]
pub enum Fragment {
    /// Stream this text
    Text(&'static str),
    /// Fail the stream at this point
    Fail,
}

/// Chat backend replaying scripted turns; an unscripted turn fails the send
#[derive(Clone, Default)]
pub struct FakeChatBackend {
    turns: Arc<Mutex<VecDeque<Vec<Fragment>>>>,
}

impl FakeChatBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one scripted reply turn
    pub fn script(&self, fragments: Vec<Fragment>) {
        self.turns.lock().unwrap().push_back(fragments);
    }
}

impl ChatBackend for FakeChatBackend {
    fn start_session(&self) -> Box<dyn ChatSession> {
        Box::new(ScriptedChat { turns: Arc::clone(&self.turns) })
    }
}

struct ScriptedChat {
    turns: Arc<Mutex<VecDeque<Vec<Fragment>>>>,
}

#[async_trait]
impl ChatSession for ScriptedChat {
    async fn send(&mut self, _text: &str) -> Result<TextStream> {
        let Some(turn) = self.turns.lock().unwrap().pop_front() else {
            return Err(Error::Chat("no scripted turn".to_string()));
        };
        let items: Vec<Result<String>> = turn
            .into_iter()
            .map(|fragment| match fragment {
                Fragment::Text(text) => Ok(text.to_string()),
                Fragment::Fail => Err(Error::Chat("scripted stream failure".to_string())),
            })
            .collect();
        Ok(stream::iter(items).boxed())
    }
}

// ---------------------------------------------------------------------------
// Live backend

/// Live backend handing tests the event sender and recording uploads
#[derive(Clone, Default)]
pub struct FakeLiveBackend {
    events: Arc<Mutex<Option<mpsc::Sender<LiveEvent>>>>,
    sent: Arc<Mutex<Vec<MediaChunk>>>,
    closed: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
}

impl FakeLiveBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next [`LiveBackend::connect`] fail
    pub fn fail_connect(&self) {
        self.fail_connect.store(true, Ordering::Release);
    }

    /// Sender for pushing server events into the running session
    #[must_use]
    pub fn events(&self) -> mpsc::Sender<LiveEvent> {
        self.events.lock().unwrap().clone().expect("no live session connected")
    }

    /// Every chunk uploaded through the handle, in order
    #[must_use]
    pub fn sent(&self) -> Vec<MediaChunk> {
        self.sent.lock().unwrap().clone()
    }

    /// How many times the handle was closed
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl LiveBackend for FakeLiveBackend {
    async fn connect(
        &self,
        _config: LiveConfig,
        events: mpsc::Sender<LiveEvent>,
    ) -> Result<Box<dyn LiveHandle>> {
        if self.fail_connect.swap(false, Ordering::AcqRel) {
            return Err(Error::Live("scripted connect failure".to_string()));
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(FakeLiveHandle {
            sent: Arc::clone(&self.sent),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeLiveHandle {
    sent: Arc<Mutex<Vec<MediaChunk>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl LiveHandle for FakeLiveHandle {
    async fn send(&self, chunk: MediaChunk) -> Result<()> {
        self.sent.lock().unwrap().push(chunk);
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Media capture

/// Camera fake serving a fixed frame and recording requested qualities
#[derive(Clone, Default)]
pub struct FakeFrames {
    frame: Vec<u8>,
    qualities: Arc<Mutex<Vec<f32>>>,
}

impl FakeFrames {
    #[must_use]
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame, qualities: Arc::default() }
    }

    /// Qualities of every frame grabbed so far
    #[must_use]
    pub fn qualities(&self) -> Vec<f32> {
        self.qualities.lock().unwrap().clone()
    }
}

impl FrameGrabber for FakeFrames {
    fn grab(&self, quality: f32) -> Option<Vec<u8>> {
        self.qualities.lock().unwrap().push(quality);
        Some(self.frame.clone())
    }
}

/// Media source handing tests the microphone sender
#[derive(Clone)]
pub struct FakeMediaSource {
    frames: Arc<FakeFrames>,
    audio_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<f32>>>>>,
    stopped: Arc<AtomicBool>,
    fail_acquire: Arc<AtomicBool>,
}

impl Default for FakeMediaSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeMediaSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Arc::new(FakeFrames::new(vec![0xff, 0xd8, 0xff])),
            audio_tx: Arc::default(),
            stopped: Arc::default(),
            fail_acquire: Arc::default(),
        }
    }

    /// Make the next [`MediaSource::acquire`] fail
    pub fn fail_acquire(&self) {
        self.fail_acquire.store(true, Ordering::Release);
    }

    /// The camera fake backing acquired tracks
    #[must_use]
    pub fn frames(&self) -> Arc<FakeFrames> {
        Arc::clone(&self.frames)
    }

    /// Sender for pushing microphone blocks into the running session
    #[must_use]
    pub fn audio(&self) -> mpsc::UnboundedSender<Vec<f32>> {
        self.audio_tx.lock().unwrap().clone().expect("no media acquired")
    }

    /// Whether the acquired tracks were stopped
    #[must_use]
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl MediaSource for FakeMediaSource {
    fn acquire(&self, _sample_rate: u32, _block_size: usize) -> Result<MediaTracks> {
        if self.fail_acquire.swap(false, Ordering::AcqRel) {
            return Err(Error::Media("scripted acquire failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.audio_tx.lock().unwrap() = Some(tx);
        let stopped = Arc::clone(&self.stopped);
        Ok(MediaTracks::new(rx, self.frames())
            .with_on_stop(move || stopped.store(true, Ordering::Release)))
    }
}

// ---------------------------------------------------------------------------
// Clock-scheduled output

/// One recorded schedule call
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub id: u64,
    pub at: f64,
    pub duration: f64,
}

#[derive(Default)]
struct OutputState {
    clock: f64,
    scheduled: Vec<ScheduledCall>,
    cancelled: Vec<u64>,
}

/// Output device with a manually driven clock and recorded scheduling
#[derive(Clone, Default)]
pub struct FakeOutputDevice {
    state: Arc<Mutex<OutputState>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicUsize>,
    ended_tx: Arc<Mutex<Option<mpsc::UnboundedSender<u64>>>>,
}

impl FakeOutputDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the context clock to `seconds`
    pub fn set_clock(&self, seconds: f64) {
        self.state.lock().unwrap().clock = seconds;
    }

    /// Report a scheduled source as finished playing
    pub fn finish(&self, id: u64) {
        let tx = self.ended_tx.lock().unwrap().clone().expect("no output context open");
        let _ = tx.send(id);
    }

    /// Every schedule call so far, in order
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledCall> {
        self.state.lock().unwrap().scheduled.clone()
    }

    /// Ids cancelled so far
    #[must_use]
    pub fn cancelled(&self) -> Vec<u64> {
        self.state.lock().unwrap().cancelled.clone()
    }

    /// How many times the context was closed
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::Acquire)
    }
}

impl OutputDevice for FakeOutputDevice {
    fn open(
        &self,
        _sample_rate: u32,
        ended: mpsc::UnboundedSender<u64>,
    ) -> Result<Box<dyn OutputContext>> {
        *self.ended_tx.lock().unwrap() = Some(ended.clone());
        Ok(Box::new(FakeOutputContext {
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
            closed: Arc::clone(&self.closed),
            ended,
        }))
    }
}

struct FakeOutputContext {
    state: Arc<Mutex<OutputState>>,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicUsize>,
    ended: mpsc::UnboundedSender<u64>,
}

impl OutputContext for FakeOutputContext {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn schedule(&self, buffer: AudioBuffer, at: f64) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.state.lock().unwrap().scheduled.push(ScheduledCall {
            id,
            at,
            duration: buffer.duration(),
        });
        Ok(id)
    }

    fn cancel(&self, id: u64) {
        self.state.lock().unwrap().cancelled.push(id);
        let _ = self.ended.send(id);
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::AcqRel);
    }
}
