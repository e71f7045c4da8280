//! **TurnController** — the effect-execution shell around [`TurnMachine`].
//!
//! ```text
//!   ControllerHandle ──Command──┐
//!   recognizer ──Recognition────┤
//!   synthesizer ──Synthesis─────┼──► mpsc ──► run loop ──► TurnMachine::handle
//!   completion task ──Reply─────┤                 │              │
//!   timers ──Restart/Resume─────┘                 │              ▼
//!                                                 │          Vec<Effect>
//!   monitor tick (60 Hz, only while sampling) ────┘              │
//!                                                                ▼
//!        input / output / monitor / completion / watch + broadcast status
//! ```
//!
//! Everything runs on one task: each event is handled to completion, including the signals
//! its effects feed back, before the next event is taken.

use crate::capability::{AudioCapture, SpeechRecognizer, SpeechSynthesizer};
use crate::completion::CompletionService;
use crate::config::VoiceConfig;
use crate::error::{CaptureError, VoiceResult};
use crate::event::{Command, Event, EventSender, Timer};
use crate::history::{ConversationHistory, ConversationTurn};
use crate::input::{InputSignal, SpeechInputSession};
use crate::monitor::VoiceActivityMonitor;
use crate::output::{OutputSignal, SpeechOutputSession};
use crate::turn::{Effect, SessionState, Signal, TurnMachine};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const UPDATE_CAPACITY: usize = 64;

/// Platform capabilities and the completion backend, injected at construction.
pub struct ControllerParts {
    pub recognizer: Box<dyn SpeechRecognizer>,
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    pub capture: Box<dyn AudioCapture>,
    pub completion: Arc<dyn CompletionService>,
}

/// Something a UI would render.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerUpdate {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: UpdateKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateKind {
    State { state: SessionState },
    Turn { turn: ConversationTurn },
    Notice { message: String },
}

/// Cloneable front door to a running controller. Dropping the last clone stops the controller.
#[derive(Clone)]
pub struct ControllerHandle {
    events: EventSender,
    state: watch::Receiver<SessionState>,
    updates: broadcast::Sender<ControllerUpdate>,
    _stop_on_drop: Arc<StopOnDrop>,
}

/// Shared by every handle clone. The controller's own senders keep its channel open, so the
/// loop would never see it close; this posts the stop instead.
struct StopOnDrop(EventSender);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if self.0.send(Event::Control(Command::Stop)).is_ok() {
            debug!("last controller handle dropped; stopping");
        }
    }
}

impl ControllerHandle {
    pub fn send(&self, command: Command) -> VoiceResult<()> {
        self.events.send(Event::Control(command))
    }

    pub fn enable_voice(&self) -> VoiceResult<()> {
        self.send(Command::EnableVoice)
    }

    pub fn disable_voice(&self) -> VoiceResult<()> {
        self.send(Command::DisableVoice)
    }

    pub fn submit(&self, text: impl Into<String>) -> VoiceResult<()> {
        self.send(Command::Submit(text.into()))
    }

    pub fn focus_text_input(&self) -> VoiceResult<()> {
        self.send(Command::FocusTextInput)
    }

    pub fn retry_permission(&self) -> VoiceResult<()> {
        self.send(Command::RetryPermission)
    }

    pub fn set_speech_output(&self, enabled: bool) -> VoiceResult<()> {
        self.send(Command::SetSpeechOutput(enabled))
    }

    pub fn stop(&self) -> VoiceResult<()> {
        self.send(Command::Stop)
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribe to state changes, appended turns and notices.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerUpdate> {
        self.updates.subscribe()
    }
}

pub struct TurnController {
    machine: TurnMachine,
    input: SpeechInputSession,
    output: SpeechOutputSession,
    monitor: VoiceActivityMonitor,
    capture: Box<dyn AudioCapture>,
    completion: Arc<dyn CompletionService>,

    events: EventSender,
    rx: mpsc::UnboundedReceiver<Event>,
    state_tx: watch::Sender<SessionState>,
    updates: broadcast::Sender<ControllerUpdate>,
}

impl TurnController {
    pub fn new(config: &VoiceConfig, parts: ControllerParts) -> (Self, ControllerHandle) {
        let (events, rx) = EventSender::channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);

        let input = SpeechInputSession::new(parts.recognizer, config.input.clone(), events.clone());
        let output = SpeechOutputSession::new(parts.synthesizer, config.output.clone(), events.clone());
        let speech_output = output.settings().enabled;

        let controller = Self {
            machine: TurnMachine::new(config.turn.clone(), speech_output),
            input,
            output,
            monitor: VoiceActivityMonitor::new(config.monitor.clone()),
            capture: parts.capture,
            completion: parts.completion,
            events: events.clone(),
            rx,
            state_tx,
            updates: updates.clone(),
        };
        let handle = ControllerHandle {
            events: events.clone(),
            state: state_rx,
            updates,
            _stop_on_drop: Arc::new(StopOnDrop(events)),
        };
        (controller, handle)
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn history(&self) -> &ConversationHistory {
        self.machine.history()
    }

    /// Run on a new task. The join handle yields the final transcript.
    pub fn spawn(self) -> JoinHandle<ConversationHistory> {
        tokio::spawn(self.run())
    }

    /// Drive the conversation until [`Command::Stop`] or the last handle drops. Returns the full transcript.
    pub async fn run(mut self) -> ConversationHistory {
        info!("🚀 turn controller started");
        let mut ticker = tokio::time::interval(self.monitor.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
                _ = ticker.tick(), if self.monitor.is_sampling() => {
                    if self.monitor.sample(Instant::now(), self.output.is_speaking()) {
                        self.apply(Signal::BargeIn);
                    }
                }
            }
            if self.machine.is_stopped() {
                break;
            }
        }

        self.input.abort();
        self.output.cancel();
        self.monitor.release();
        info!(
            "🏁 turn controller stopped ({} turns)",
            self.machine.history().len()
        );
        self.machine.into_history()
    }

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::Control(command) => self.on_command(command),
            Event::Recognition(event) => {
                if let Some(signal) = self.input.handle(event) {
                    self.apply(input_signal(signal));
                }
            }
            Event::Synthesis(event) => {
                if let Some(signal) = self.output.handle(event) {
                    self.apply(output_signal(signal));
                }
            }
            Event::Completion(Ok(reply)) => self.apply(Signal::CompletionSucceeded(reply)),
            Event::Completion(Err(err)) => self.apply(Signal::CompletionFailed(err)),
            Event::Timer(Timer::RestartRecognition(token)) => {
                if let Some(signal) = self.input.restart_due(token) {
                    self.apply(input_signal(signal));
                }
            }
            Event::Timer(Timer::Resume(epoch)) => self.apply(Signal::ResumeDue(epoch)),
        }
    }

    fn on_command(&mut self, command: Command) {
        debug!("command: {:?}", command);
        match command {
            Command::EnableVoice => self.apply(Signal::VoiceEnabled),
            Command::DisableVoice => self.apply(Signal::VoiceDisabled),
            Command::Submit(text) => self.apply(Signal::Typed(text)),
            Command::FocusTextInput => self.apply(Signal::TextInputFocused),
            Command::RetryPermission => self.apply(Signal::PermissionRetry),
            Command::SetSpeechOutput(enabled) => {
                self.output.set_enabled(enabled);
                self.apply(Signal::SpeechOutputToggled(enabled));
            }
            Command::SetRate(rate) => self.output.set_rate(rate),
            Command::SelectVoice(hint) => self.output.set_voice_hint(hint),
            Command::Stop => self.apply(Signal::Stop),
        }
    }

    /// Feed `signal` to the machine, execute its effects, and keep going until no effect
    /// produces a follow-up signal.
    fn apply(&mut self, signal: Signal) {
        let mut queue = VecDeque::from([signal]);
        while let Some(signal) = queue.pop_front() {
            let effects = self.machine.handle(signal, Instant::now());
            for effect in effects {
                self.execute(effect, &mut queue);
            }
        }
    }

    fn execute(&mut self, effect: Effect, queue: &mut VecDeque<Signal>) {
        match effect {
            Effect::AcquireCapture => match self.monitor.acquire(&mut *self.capture) {
                Ok(()) => queue.push_back(Signal::CaptureReady { monitoring: true }),
                Err(CaptureError::PermissionDenied) => queue.push_back(Signal::PermissionDenied),
                Err(CaptureError::Unavailable(reason)) => {
                    warn!("barge-in monitoring unavailable: {}", reason);
                    queue.push_back(Signal::CaptureReady { monitoring: false });
                }
            },
            Effect::ReleaseCapture => self.monitor.release(),
            Effect::StartListening => {
                if let Some(signal) = self.input.start() {
                    queue.push_back(input_signal(signal));
                }
            }
            Effect::StopListening => self.input.stop(),
            Effect::SendCompletion(history) => {
                let completion = Arc::clone(&self.completion);
                let events = self.events.clone();
                tokio::spawn(async move {
                    let result = completion.complete(&history).await;
                    if events.send(Event::Completion(result)).is_err() {
                        debug!("completion finished after controller stopped");
                    }
                });
            }
            Effect::Speak { utterance, text } => {
                if let Err(err) = self.output.speak(utterance, &text, &mut self.input) {
                    warn!("synthesis rejected utterance #{}: {}", utterance, err);
                    queue.push_back(Signal::SpeechFinished(utterance));
                }
            }
            Effect::CancelSpeech => {
                self.output.cancel();
            }
            Effect::StartMonitor => self.monitor.resume(),
            Effect::StopMonitor => self.monitor.pause(),
            Effect::ScheduleResume { epoch, after } => {
                self.events.schedule(after, Timer::Resume(epoch));
            }
            Effect::Status(state) => {
                self.state_tx.send_replace(state);
                self.publish(UpdateKind::State { state });
            }
            Effect::TurnAppended(turn) => self.publish(UpdateKind::Turn { turn }),
            Effect::Notice(message) => {
                warn!("{}", message);
                self.publish(UpdateKind::Notice { message });
            }
        }
    }

    fn publish(&self, kind: UpdateKind) {
        // No subscribers is fine.
        let _ = self.updates.send(ControllerUpdate { at: Utc::now(), kind });
    }
}

fn input_signal(signal: InputSignal) -> Signal {
    match signal {
        InputSignal::FinalTranscript(text) => Signal::FinalTranscript(text),
        InputSignal::PermissionDenied => Signal::PermissionDenied,
        InputSignal::Degraded(kind) => Signal::InputDegraded(kind),
    }
}

fn output_signal(signal: OutputSignal) -> Signal {
    match signal {
        OutputSignal::Started(id) => Signal::SpeechStarted(id),
        OutputSignal::Finished { utterance, error } => {
            if let Some(err) = error {
                warn!("synthesis error on #{}: {}", utterance, err);
            }
            Signal::SpeechFinished(utterance)
        }
    }
}
