//! Turn-taking state machine.
//!
//! [`TurnMachine::handle`] is a pure transition function: `(state, signal) -> (state, effects)`.
//! It performs no I/O and reads no clock; the controller executes the returned [`Effect`]s.
//! Exactly one [`SessionState`] is active at a time, which is the half-duplex invariant.

use crate::error::{CompletionError, RecognitionErrorKind};
use crate::event::UtteranceId;
use crate::history::{ConversationHistory, ConversationTurn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Transcript text shown for a failed request. Diagnostics stay in the logs.
pub const ERROR_MARKER: &str = "[error]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    Waiting,
    Interrupted,
    PermissionBlocked,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Thinking => "thinking",
            SessionState::Speaking => "speaking",
            SessionState::Waiting => "waiting",
            SessionState::Interrupted => "interrupted",
            SessionState::PermissionBlocked => "permission_blocked",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for turn-taking timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Minimum spacing between two completion requests (default: 1100ms)
    pub min_request_spacing_ms: u64,

    /// Pause after speech ends before listening again (default: 350ms)
    pub speech_end_cooldown_ms: u64,

    /// Pause in Waiting when replies are not spoken (default: 400ms)
    pub waiting_cooldown_ms: u64,

    /// Pause after a barge-in before listening again (default: 600ms)
    pub interrupt_settle_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_request_spacing_ms: 1100,
            speech_end_cooldown_ms: 350,
            waiting_cooldown_ms: 400,
            interrupt_settle_ms: 600,
        }
    }
}

impl TurnConfig {
    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    pub fn speech_end_cooldown(&self) -> Duration {
        Duration::from_millis(self.speech_end_cooldown_ms)
    }

    pub fn waiting_cooldown(&self) -> Duration {
        Duration::from_millis(self.waiting_cooldown_ms)
    }

    pub fn interrupt_settle(&self) -> Duration {
        Duration::from_millis(self.interrupt_settle_ms)
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    VoiceEnabled,
    VoiceDisabled,
    /// Microphone acquired. `monitoring` is false when barge-in detection is unavailable.
    CaptureReady { monitoring: bool },
    PermissionDenied,
    PermissionRetry,
    FinalTranscript(String),
    Typed(String),
    TextInputFocused,
    SpeechOutputToggled(bool),
    CompletionSucceeded(String),
    CompletionFailed(CompletionError),
    SpeechStarted(UtteranceId),
    /// Natural end or synthesis error.
    SpeechFinished(UtteranceId),
    BargeIn,
    ResumeDue(u64),
    InputDegraded(RecognitionErrorKind),
    Stop,
}

/// Side effects requested by a transition, executed in order by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    AcquireCapture,
    ReleaseCapture,
    StartListening,
    StopListening,
    /// Send the full history; the client applies the transmission window.
    SendCompletion(Vec<ConversationTurn>),
    Speak { utterance: UtteranceId, text: String },
    CancelSpeech,
    StartMonitor,
    StopMonitor,
    ScheduleResume { epoch: u64, after: Duration },
    Status(SessionState),
    TurnAppended(ConversationTurn),
    Notice(String),
}

/// At most one request in flight, plus the time of the last send.
#[derive(Debug, Clone, Default)]
struct PendingRequest {
    in_flight: bool,
    last_sent: Option<Instant>,
}

impl PendingRequest {
    fn admits(&self, now: Instant, spacing: Duration) -> bool {
        if self.in_flight {
            return false;
        }
        match self.last_sent {
            Some(sent) => now.saturating_duration_since(sent) >= spacing,
            None => true,
        }
    }
}

pub struct TurnMachine {
    config: TurnConfig,
    state: SessionState,

    voice_enabled: bool,
    speech_output: bool,
    capture_ready: bool,
    monitoring: bool,

    pending: PendingRequest,
    last_transcript: Option<String>,
    history: ConversationHistory,

    utterance: Option<UtteranceId>,
    next_utterance: UtteranceId,

    // Bumped on every state change; stale resume timers carry an old epoch.
    epoch: u64,
    stopped: bool,
}

impl TurnMachine {
    pub fn new(config: TurnConfig, speech_output: bool) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            voice_enabled: false,
            speech_output,
            capture_ready: false,
            monitoring: false,
            pending: PendingRequest::default(),
            last_transcript: None,
            history: ConversationHistory::new(),
            utterance: None,
            next_utterance: 1,
            epoch: 0,
            stopped: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn into_history(self) -> ConversationHistory {
        self.history
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    pub fn request_in_flight(&self) -> bool {
        self.pending.in_flight
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Apply one signal at time `now` and return the effects to execute.
    pub fn handle(&mut self, signal: Signal, now: Instant) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.stopped {
            debug!("signal after stop ignored: {:?}", signal);
            return fx;
        }

        match signal {
            Signal::VoiceEnabled => self.on_voice_enabled(&mut fx),
            Signal::VoiceDisabled => self.on_voice_disabled(&mut fx),
            Signal::CaptureReady { monitoring } => self.on_capture_ready(monitoring, &mut fx),
            Signal::PermissionDenied => self.on_permission_denied(&mut fx),
            Signal::PermissionRetry => {
                if self.state == SessionState::PermissionBlocked {
                    self.enter(SessionState::Idle, &mut fx);
                    if self.voice_enabled {
                        fx.push(Effect::AcquireCapture);
                    }
                }
            }
            Signal::FinalTranscript(text) => self.on_final_transcript(text, now, &mut fx),
            Signal::Typed(text) => self.on_typed(text, now, &mut fx),
            Signal::TextInputFocused | Signal::BargeIn => self.interrupt(&mut fx),
            Signal::SpeechOutputToggled(enabled) => {
                self.speech_output = enabled;
                if !enabled {
                    self.interrupt(&mut fx);
                }
            }
            Signal::CompletionSucceeded(reply) => self.on_reply(reply, &mut fx),
            Signal::CompletionFailed(err) => self.on_failure(err, &mut fx),
            Signal::SpeechStarted(id) => {
                debug!("speech #{} started", id);
            }
            Signal::SpeechFinished(id) => self.on_speech_finished(id, &mut fx),
            Signal::ResumeDue(epoch) => self.on_resume(epoch, &mut fx),
            Signal::InputDegraded(kind) => {
                fx.push(Effect::Notice(format!(
                    "Voice input is having trouble ({}). You can keep typing.",
                    kind
                )));
            }
            Signal::Stop => self.on_stop(&mut fx),
        }
        fx
    }

    fn on_voice_enabled(&mut self, fx: &mut Vec<Effect>) {
        self.voice_enabled = true;
        match self.state {
            SessionState::PermissionBlocked => {
                debug!("voice enable waits for explicit permission retry");
            }
            SessionState::Idle if self.capture_ready => {
                self.enter(SessionState::Listening, fx);
                fx.push(Effect::StartListening);
            }
            _ if !self.capture_ready => fx.push(Effect::AcquireCapture),
            _ => {}
        }
    }

    fn on_voice_disabled(&mut self, fx: &mut Vec<Effect>) {
        self.voice_enabled = false;
        match self.state {
            SessionState::Listening => {
                fx.push(Effect::StopListening);
                self.enter(SessionState::Idle, fx);
            }
            SessionState::PermissionBlocked => self.enter(SessionState::Idle, fx),
            _ => {}
        }
        if self.capture_ready {
            self.capture_ready = false;
            self.monitoring = false;
            fx.push(Effect::StopMonitor);
            fx.push(Effect::ReleaseCapture);
        }
    }

    fn on_capture_ready(&mut self, monitoring: bool, fx: &mut Vec<Effect>) {
        if !self.voice_enabled || self.state == SessionState::PermissionBlocked {
            fx.push(Effect::ReleaseCapture);
            return;
        }
        self.capture_ready = true;
        self.monitoring = monitoring;
        match self.state {
            SessionState::Idle => {
                self.enter(SessionState::Listening, fx);
                fx.push(Effect::StartListening);
            }
            SessionState::Speaking if monitoring => fx.push(Effect::StartMonitor),
            _ => {}
        }
    }

    fn on_permission_denied(&mut self, fx: &mut Vec<Effect>) {
        if self.state == SessionState::PermissionBlocked {
            return;
        }
        if self.utterance.take().is_some() {
            fx.push(Effect::CancelSpeech);
        }
        self.capture_ready = false;
        self.monitoring = false;
        fx.push(Effect::StopListening);
        fx.push(Effect::StopMonitor);
        fx.push(Effect::ReleaseCapture);
        self.enter(SessionState::PermissionBlocked, fx);
    }

    fn on_final_transcript(&mut self, text: String, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != SessionState::Listening {
            debug!("transcript outside listening ignored ({})", self.state);
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.last_transcript.as_deref() == Some(text) {
            debug!("duplicate transcript suppressed");
            return;
        }
        if self.submit(text, now, fx) {
            self.last_transcript = Some(text.to_string());
        }
    }

    fn on_typed(&mut self, text: String, now: Instant, fx: &mut Vec<Effect>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if matches!(self.state, SessionState::Thinking | SessionState::PermissionBlocked) {
            debug!("typed submission dropped in {}", self.state);
            return;
        }
        if !self.pending.admits(now, self.config.min_request_spacing()) {
            debug!("typed submission dropped: request spacing");
            return;
        }
        if self.utterance.take().is_some() {
            fx.push(Effect::CancelSpeech);
            fx.push(Effect::StopMonitor);
        }
        self.last_transcript = None;
        self.submit(text, now, fx);
    }

    /// Admission control: drop, never queue. Returns whether the text was sent.
    fn submit(&mut self, text: &str, now: Instant, fx: &mut Vec<Effect>) -> bool {
        if !self.pending.admits(now, self.config.min_request_spacing()) {
            debug!("submission dropped: request pending or too soon");
            return false;
        }
        if self.state == SessionState::Listening {
            fx.push(Effect::StopListening);
        }
        let turn = ConversationTurn::user(text);
        self.history.push(turn.clone());
        fx.push(Effect::TurnAppended(turn));
        self.enter(SessionState::Thinking, fx);

        self.pending.in_flight = true;
        self.pending.last_sent = Some(now);
        fx.push(Effect::SendCompletion(self.history.turns().to_vec()));
        true
    }

    fn on_reply(&mut self, reply: String, fx: &mut Vec<Effect>) {
        self.pending.in_flight = false;
        let turn = ConversationTurn::assistant(reply.clone());
        self.history.push(turn.clone());
        fx.push(Effect::TurnAppended(turn));

        if self.state != SessionState::Thinking {
            debug!("reply arrived in {}; recorded only", self.state);
            return;
        }
        if self.speech_output {
            let id = self.next_utterance;
            self.next_utterance += 1;
            self.utterance = Some(id);
            self.enter(SessionState::Speaking, fx);
            fx.push(Effect::Speak { utterance: id, text: reply });
            if self.voice_enabled && self.monitoring {
                fx.push(Effect::StartMonitor);
            }
        } else {
            self.enter(SessionState::Waiting, fx);
            fx.push(self.resume_after(self.config.waiting_cooldown()));
        }
    }

    fn on_failure(&mut self, err: CompletionError, fx: &mut Vec<Effect>) {
        self.pending.in_flight = false;
        warn!(
            "completion failed (status {:?}): {}",
            err.status(),
            err
        );
        let turn = ConversationTurn::assistant(ERROR_MARKER);
        self.history.push(turn.clone());
        fx.push(Effect::TurnAppended(turn));

        if self.state == SessionState::Thinking {
            self.enter(SessionState::Idle, fx);
            if self.voice_enabled {
                fx.push(self.resume_after(self.config.speech_end_cooldown()));
            }
        }
    }

    fn on_speech_finished(&mut self, id: UtteranceId, fx: &mut Vec<Effect>) {
        if self.state != SessionState::Speaking || self.utterance != Some(id) {
            debug!("speech end #{} suppressed in {}", id, self.state);
            return;
        }
        self.utterance = None;
        fx.push(Effect::StopMonitor);
        if self.voice_enabled {
            self.enter(SessionState::Waiting, fx);
            fx.push(self.resume_after(self.config.speech_end_cooldown()));
        } else {
            self.enter(SessionState::Idle, fx);
        }
    }

    /// Speaking -> Interrupted. Cancels immediately; the natural end is suppressed.
    fn interrupt(&mut self, fx: &mut Vec<Effect>) {
        if self.state != SessionState::Speaking {
            return;
        }
        self.utterance = None;
        fx.push(Effect::CancelSpeech);
        fx.push(Effect::StopMonitor);
        self.enter(SessionState::Interrupted, fx);
        fx.push(self.resume_after(self.config.interrupt_settle()));
    }

    fn on_resume(&mut self, epoch: u64, fx: &mut Vec<Effect>) {
        if epoch != self.epoch {
            debug!("stale resume timer ignored");
            return;
        }
        if !matches!(
            self.state,
            SessionState::Waiting | SessionState::Interrupted | SessionState::Idle
        ) {
            return;
        }
        if self.voice_enabled && self.capture_ready {
            self.enter(SessionState::Listening, fx);
            fx.push(Effect::StartListening);
        } else {
            self.enter(SessionState::Idle, fx);
        }
    }

    fn on_stop(&mut self, fx: &mut Vec<Effect>) {
        if self.utterance.take().is_some() {
            fx.push(Effect::CancelSpeech);
        }
        fx.push(Effect::StopListening);
        fx.push(Effect::StopMonitor);
        fx.push(Effect::ReleaseCapture);
        self.voice_enabled = false;
        self.capture_ready = false;
        self.enter(SessionState::Idle, fx);
        self.stopped = true;
    }

    fn resume_after(&self, after: Duration) -> Effect {
        Effect::ScheduleResume {
            epoch: self.epoch,
            after,
        }
    }

    fn enter(&mut self, next: SessionState, fx: &mut Vec<Effect>) {
        if next == self.state {
            return;
        }
        info!("🔀 {} → {}", self.state, next);
        self.state = next;
        self.epoch += 1;
        fx.push(Effect::Status(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> TurnMachine {
        TurnMachine::new(TurnConfig::default(), true)
    }

    /// Enable voice and grant the microphone: Idle -> Listening.
    fn listening(m: &mut TurnMachine, now: Instant) {
        assert_eq!(m.handle(Signal::VoiceEnabled, now), vec![Effect::AcquireCapture]);
        let fx = m.handle(Signal::CaptureReady { monitoring: true }, now);
        assert_eq!(
            fx,
            vec![Effect::Status(SessionState::Listening), Effect::StartListening]
        );
    }

    fn resume_epoch(fx: &[Effect]) -> u64 {
        fx.iter()
            .find_map(|e| match e {
                Effect::ScheduleResume { epoch, .. } => Some(*epoch),
                _ => None,
            })
            .expect("resume scheduled")
    }

    fn spoken(fx: &[Effect]) -> UtteranceId {
        fx.iter()
            .find_map(|e| match e {
                Effect::Speak { utterance, .. } => Some(*utterance),
                _ => None,
            })
            .expect("speak effect")
    }

    #[test]
    fn transcript_enters_thinking_and_appends_before_send() {
        let mut m = machine();
        let t0 = Instant::now();
        listening(&mut m, t0);

        let fx = m.handle(Signal::FinalTranscript("Hello".into()), t0);
        assert_eq!(
            fx,
            vec![
                Effect::StopListening,
                Effect::TurnAppended(ConversationTurn::user("Hello")),
                Effect::Status(SessionState::Thinking),
                Effect::SendCompletion(vec![ConversationTurn::user("Hello")]),
            ]
        );
        assert!(m.request_in_flight());
    }

    #[test]
    fn duplicate_transcript_suppressed() {
        let mut m = machine();
        let t0 = Instant::now();
        listening(&mut m, t0);

        m.handle(Signal::FinalTranscript("what time is it".into()), t0);
        m.handle(Signal::CompletionSucceeded("Noon.".into()), t0);
        let fx = m.handle(Signal::SpeechFinished(1), t0);
        let epoch = resume_epoch(&fx);
        m.handle(Signal::ResumeDue(epoch), t0 + Duration::from_secs(2));
        assert_eq!(m.state(), SessionState::Listening);

        let fx = m.handle(
            Signal::FinalTranscript(" what time is it ".into()),
            t0 + Duration::from_secs(3),
        );
        assert!(fx.is_empty());
        assert_eq!(m.state(), SessionState::Listening);
    }

    #[test]
    fn dropped_transcript_is_not_a_duplicate() {
        let mut m = TurnMachine::new(TurnConfig::default(), false);
        let t0 = Instant::now();
        listening(&mut m, t0);

        m.handle(Signal::FinalTranscript("Hello".into()), t0);
        let fx = m.handle(Signal::CompletionSucceeded("Hi!".into()), t0 + Duration::from_millis(100));
        let epoch = resume_epoch(&fx);
        m.handle(Signal::ResumeDue(epoch), t0 + Duration::from_millis(500));
        assert_eq!(m.state(), SessionState::Listening);

        // Inside the spacing window: dropped, and not remembered.
        let fx = m.handle(
            Signal::FinalTranscript("what time is it".into()),
            t0 + Duration::from_millis(700),
        );
        assert!(fx.is_empty());
        assert_eq!(m.state(), SessionState::Listening);

        let fx = m.handle(
            Signal::FinalTranscript("what time is it".into()),
            t0 + Duration::from_secs(3),
        );
        assert_eq!(m.state(), SessionState::Thinking);
        assert!(fx.contains(&Effect::SendCompletion(vec![
            ConversationTurn::user("Hello"),
            ConversationTurn::assistant("Hi!"),
            ConversationTurn::user("what time is it"),
        ])));

        // Once admitted it does count as the preceding transcript.
        let fx = m.handle(Signal::CompletionSucceeded("Noon.".into()), t0 + Duration::from_millis(3100));
        let epoch = resume_epoch(&fx);
        m.handle(Signal::ResumeDue(epoch), t0 + Duration::from_millis(3500));
        let fx = m.handle(
            Signal::FinalTranscript("what time is it".into()),
            t0 + Duration::from_secs(6),
        );
        assert!(fx.is_empty());
    }

    #[test]
    fn admission_drops_inside_spacing_window() {
        let mut m = TurnMachine::new(TurnConfig::default(), false);
        let t0 = Instant::now();
        m.handle(Signal::Typed("first".into()), t0);
        m.handle(Signal::CompletionSucceeded("ok".into()), t0 + Duration::from_millis(200));
        assert_eq!(m.state(), SessionState::Waiting);

        let fx = m.handle(Signal::Typed("second".into()), t0 + Duration::from_millis(500));
        assert!(fx.is_empty());
        let fx = m.handle(Signal::Typed("third".into()), t0 + Duration::from_millis(1200));
        assert!(fx.iter().any(|e| matches!(e, Effect::SendCompletion(_))));
    }

    #[test]
    fn in_flight_request_blocks_new_sends() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(Signal::Typed("one".into()), t0);
        let fx = m.handle(Signal::Typed("two".into()), t0 + Duration::from_secs(5));
        assert!(fx.is_empty());
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn barge_in_interrupts_and_suppresses_natural_end() {
        let mut m = machine();
        let t0 = Instant::now();
        listening(&mut m, t0);
        m.handle(Signal::FinalTranscript("tell me a story".into()), t0);
        let fx = m.handle(Signal::CompletionSucceeded("Once upon a time".into()), t0);
        let id = spoken(&fx);
        assert!(fx.contains(&Effect::StartMonitor));

        let fx = m.handle(Signal::BargeIn, t0);
        assert_eq!(fx[0], Effect::CancelSpeech);
        assert_eq!(m.state(), SessionState::Interrupted);
        let epoch = resume_epoch(&fx);
        assert!(fx.contains(&Effect::ScheduleResume {
            epoch,
            after: Duration::from_millis(600)
        }));

        // A second barge-in and the cancelled utterance's end are both no-ops.
        assert!(m.handle(Signal::BargeIn, t0).is_empty());
        assert!(m.handle(Signal::SpeechFinished(id), t0).is_empty());

        let fx = m.handle(Signal::ResumeDue(epoch), t0 + Duration::from_millis(600));
        assert_eq!(
            fx,
            vec![Effect::Status(SessionState::Listening), Effect::StartListening]
        );
    }

    #[test]
    fn failure_appends_error_turn_and_returns_to_idle() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(Signal::Typed("hi".into()), t0);
        let fx = m.handle(
            Signal::CompletionFailed(CompletionError::from_status(503, "loading")),
            t0,
        );
        assert!(fx.contains(&Effect::TurnAppended(ConversationTurn::assistant(ERROR_MARKER))));
        assert_eq!(m.state(), SessionState::Idle);
        assert!(!m.request_in_flight());
        assert_eq!(m.history().len(), 2);
    }

    #[test]
    fn permission_denied_blocks_until_retry() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(Signal::VoiceEnabled, t0);
        let fx = m.handle(Signal::PermissionDenied, t0);
        assert!(fx.contains(&Effect::Status(SessionState::PermissionBlocked)));
        assert!(!fx.contains(&Effect::StartListening));

        assert!(m.handle(Signal::VoiceEnabled, t0).is_empty());
        assert!(m.handle(Signal::Typed("hello?".into()), t0).is_empty());

        let fx = m.handle(Signal::PermissionRetry, t0);
        assert_eq!(
            fx,
            vec![Effect::Status(SessionState::Idle), Effect::AcquireCapture]
        );
    }

    #[test]
    fn stale_resume_is_ignored() {
        let mut m = machine();
        let t0 = Instant::now();
        listening(&mut m, t0);
        m.handle(Signal::FinalTranscript("a".into()), t0);
        m.handle(Signal::CompletionSucceeded("b".into()), t0);
        let fx = m.handle(Signal::BargeIn, t0);
        let epoch = resume_epoch(&fx);

        // User types before the settle delay elapses.
        m.handle(Signal::Typed("c".into()), t0 + Duration::from_secs(2));
        assert_eq!(m.state(), SessionState::Thinking);
        assert!(m.handle(Signal::ResumeDue(epoch), t0 + Duration::from_secs(2)).is_empty());
        assert_eq!(m.state(), SessionState::Thinking);
    }

    #[test]
    fn disabling_output_while_speaking_interrupts() {
        let mut m = machine();
        let t0 = Instant::now();
        m.handle(Signal::Typed("hi".into()), t0);
        m.handle(Signal::CompletionSucceeded("hello".into()), t0);
        assert_eq!(m.state(), SessionState::Speaking);
        let fx = m.handle(Signal::SpeechOutputToggled(false), t0);
        assert_eq!(fx[0], Effect::CancelSpeech);
        assert_eq!(m.state(), SessionState::Interrupted);
    }

    #[test]
    fn stop_is_final() {
        let mut m = machine();
        let t0 = Instant::now();
        listening(&mut m, t0);
        let fx = m.handle(Signal::Stop, t0);
        assert!(fx.contains(&Effect::ReleaseCapture));
        assert!(m.is_stopped());
        assert!(m.handle(Signal::VoiceEnabled, t0).is_empty());
    }
}
