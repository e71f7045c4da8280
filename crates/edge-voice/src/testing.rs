//! Deterministic capability fakes for unit and integration tests.
//!
//! Each fake is a cheap `Clone` over shared state: hand one clone to the session or controller
//! and keep the other to drive events and inspect calls.

use crate::capability::{
    AudioCapture, CaptureStream, RecognitionSettings, SpeechRecognizer, SpeechSynthesizer,
    Utterance, Voice,
};
use crate::completion::CompletionService;
use crate::error::{CaptureError, CompletionError, RecognitionErrorKind, SynthesisError};
use crate::event::{EventSender, RecognitionEvent, SynthesisEvent, UtteranceId};
use crate::history::ConversationTurn;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Recognition
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecognizerState {
    events: Option<EventSender>,
    settings: Option<RecognitionSettings>,
    starts: usize,
    stops: usize,
    aborts: usize,
    fail_next: VecDeque<RecognitionErrorKind>,
    fail_always: Option<RecognitionErrorKind>,
    running: bool,
}

/// Scripted recognizer. Start attempts are counted whether or not they succeed.
#[derive(Clone, Default)]
pub struct FakeRecognizer {
    state: Arc<Mutex<RecognizerState>>,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `start()` fail with `kind`. Calls queue up.
    pub fn fail_next_start(&self, kind: RecognitionErrorKind) {
        lock(&self.state).fail_next.push_back(kind);
    }

    /// Make every `start()` fail with `kind` until cleared with `None`.
    pub fn fail_every_start(&self, kind: Option<RecognitionErrorKind>) {
        lock(&self.state).fail_always = kind;
    }

    pub fn starts(&self) -> usize {
        lock(&self.state).starts
    }

    pub fn stops(&self) -> usize {
        lock(&self.state).stops
    }

    pub fn aborts(&self) -> usize {
        lock(&self.state).aborts
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn settings(&self) -> Option<RecognitionSettings> {
        lock(&self.state).settings.clone()
    }

    /// Deliver a finalized transcript.
    pub fn say(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            final_text: Some(text.to_string()),
            interim: String::new(),
        });
    }

    /// Deliver an interim-only result.
    pub fn hear_partial(&self, text: &str) {
        self.emit(RecognitionEvent::Result {
            final_text: None,
            interim: text.to_string(),
        });
    }

    pub fn error(&self, kind: RecognitionErrorKind) {
        self.emit(RecognitionEvent::Error(kind));
    }

    /// Spontaneous end of the host session.
    pub fn end(&self) {
        lock(&self.state).running = false;
        self.emit(RecognitionEvent::Ended);
    }

    fn emit(&self, event: RecognitionEvent) {
        let events = lock(&self.state).events.clone();
        if let Some(events) = events {
            events.recognition(event);
        }
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn attach(&mut self, events: EventSender, settings: &RecognitionSettings) {
        let mut state = lock(&self.state);
        state.events = Some(events);
        state.settings = Some(settings.clone());
    }

    fn start(&mut self) -> Result<(), RecognitionErrorKind> {
        let mut state = lock(&self.state);
        state.starts += 1;
        if let Some(kind) = state.fail_next.pop_front() {
            return Err(kind);
        }
        if let Some(kind) = state.fail_always.clone() {
            return Err(kind);
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.stops += 1;
        state.running = false;
    }

    fn abort(&mut self) {
        let mut state = lock(&self.state);
        state.aborts += 1;
        state.running = false;
    }
}

// ---------------------------------------------------------------------------
// Synthesis
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SynthesizerState {
    events: Option<EventSender>,
    voices: Vec<Voice>,
    spoken: Vec<Utterance>,
    cancels: usize,
    fail_next: Option<SynthesisError>,
}

/// Synthesizer that records utterances. Completion is driven by the test.
#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    state: Arc<Mutex<SynthesizerState>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::with_voices(vec![Voice::new("Samantha", "en-US")])
    }

    pub fn with_voices(voices: Vec<Voice>) -> Self {
        let fake = Self::default();
        lock(&fake.state).voices = voices;
        fake
    }

    /// Replace the voice list and announce the change.
    pub fn set_voices(&self, voices: Vec<Voice>) {
        lock(&self.state).voices = voices;
        self.emit(SynthesisEvent::VoicesChanged);
    }

    /// Reject the next `speak()` call synchronously.
    pub fn fail_next_speak(&self, error: SynthesisError) {
        lock(&self.state).fail_next = Some(error);
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        lock(&self.state).spoken.clone()
    }

    pub fn last_spoken(&self) -> Option<Utterance> {
        lock(&self.state).spoken.last().cloned()
    }

    pub fn cancels(&self) -> usize {
        lock(&self.state).cancels
    }

    /// Natural end of utterance `id`.
    pub fn finish(&self, id: UtteranceId) {
        self.emit(SynthesisEvent::Ended(id));
    }

    /// Natural end of the most recent utterance, if any.
    pub fn finish_last(&self) {
        if let Some(utterance) = self.last_spoken() {
            self.finish(utterance.id);
        }
    }

    /// Asynchronous synthesis error for utterance `id`.
    pub fn fail(&self, id: UtteranceId, message: &str) {
        self.emit(SynthesisEvent::Failed(id, SynthesisError(message.to_string())));
    }

    fn emit(&self, event: SynthesisEvent) {
        let events = lock(&self.state).events.clone();
        if let Some(events) = events {
            events.synthesis(event);
        }
    }
}

impl SpeechSynthesizer for FakeSynthesizer {
    fn attach(&mut self, events: EventSender) {
        lock(&self.state).events = Some(events);
    }

    fn voices(&self) -> Vec<Voice> {
        lock(&self.state).voices.clone()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SynthesisError> {
        let id = utterance.id;
        {
            let mut state = lock(&self.state);
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            state.spoken.push(utterance);
        }
        self.emit(SynthesisEvent::Started(id));
        Ok(())
    }

    fn cancel(&mut self) {
        lock(&self.state).cancels += 1;
    }
}

// ---------------------------------------------------------------------------
// Audio capture
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CaptureState {
    level: f32,
    denied: bool,
    unavailable: Option<String>,
    attempts: usize,
    acquisitions: usize,
    releases: usize,
}

/// Microphone producing a constant-amplitude signal at a settable level.
#[derive(Clone, Default)]
pub struct FakeCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amplitude of every sample read from now on, including by streams already handed out.
    pub fn set_level(&self, level: f32) {
        lock(&self.state).level = level;
    }

    /// Deny permission on every acquisition.
    pub fn deny(&self) {
        lock(&self.state).denied = true;
    }

    /// Grant permission again (the user fixed it in the host settings).
    pub fn allow(&self) {
        let mut state = lock(&self.state);
        state.denied = false;
        state.unavailable = None;
    }

    /// Fail acquisition with a non-permission error.
    pub fn make_unavailable(&self, reason: &str) {
        lock(&self.state).unavailable = Some(reason.to_string());
    }

    /// Acquisition calls, including denied ones.
    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }

    /// Successful acquisitions.
    pub fn acquisitions(&self) -> usize {
        lock(&self.state).acquisitions
    }

    pub fn releases(&self) -> usize {
        lock(&self.state).releases
    }

    /// Streams acquired and not yet released.
    pub fn live_streams(&self) -> usize {
        let state = lock(&self.state);
        state.acquisitions - state.releases
    }
}

impl AudioCapture for FakeCapture {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let mut state = lock(&self.state);
        state.attempts += 1;
        if state.denied {
            return Err(CaptureError::PermissionDenied);
        }
        if let Some(reason) = state.unavailable.clone() {
            return Err(CaptureError::Unavailable(reason));
        }
        state.acquisitions += 1;
        Ok(Box::new(FakeStream {
            state: Arc::clone(&self.state),
            released: false,
        }))
    }
}

struct FakeStream {
    state: Arc<Mutex<CaptureState>>,
    released: bool,
}

impl CaptureStream for FakeStream {
    fn read_latest(&mut self, buf: &mut [f32]) -> usize {
        if self.released {
            return 0;
        }
        let level = lock(&self.state).level;
        buf.fill(level);
        buf.len()
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            lock(&self.state).releases += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Completion service answering from a script. Falls back to `"ok"` once the script runs out.
#[derive(Clone, Default)]
pub struct FakeCompletion {
    script: Arc<Mutex<VecDeque<Result<String, CompletionError>>>>,
    requests: Arc<Mutex<Vec<Vec<ConversationTurn>>>>,
    calls: Arc<AtomicUsize>,
    delay: Duration,
}

impl FakeCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request after `delay` (virtual time under a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_reply(&self, reply: &str) {
        lock(&self.script).push_back(Ok(reply.to_string()));
    }

    pub fn push_error(&self, error: CompletionError) {
        lock(&self.script).push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Histories received, in call order.
    pub fn requests(&self) -> Vec<Vec<ConversationTurn>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, history: &[ConversationTurn]) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(history.to_vec());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Ok("ok".to_string()))
    }
}
