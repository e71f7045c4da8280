//! Randomized interleavings against the pure turn machine.
//!
//! A small model of the outside world (microphone, recognizer, synthesizer, completion backend,
//! timers) reacts to the machine's effects, and a seeded RNG picks what happens next. Late
//! playback ends and barge-ins racing a natural end are delivered too. After every step the
//! half-duplex and admission invariants are checked.
//!
//! Run with: `cargo test -p edge-voice --test half_duplex_test`

use edge_voice::turn::{Effect, Signal};
use edge_voice::{CompletionError, SessionState, TurnConfig, TurnMachine, UtteranceId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Default)]
struct World {
    listening: bool,
    playing: Option<UtteranceId>,
    /// Utterances that ended or were cancelled but may still report a late end.
    ended: Vec<UtteranceId>,
    /// Signals that arrive back to back with the previous one.
    racing: VecDeque<Signal>,
    races: usize,
    capture_pending: bool,
    requests_outstanding: usize,
    resumes: Vec<u64>,
    sends: usize,
}

impl World {
    fn apply(&mut self, effects: &[Effect], machine: &TurnMachine) {
        for effect in effects {
            match effect {
                Effect::AcquireCapture => self.capture_pending = true,
                Effect::StartListening => self.listening = true,
                Effect::StopListening => self.listening = false,
                Effect::SendCompletion(history) => {
                    assert!(!history.is_empty(), "request without a user turn");
                    self.requests_outstanding += 1;
                    self.sends += 1;
                }
                Effect::Speak { utterance, .. } => {
                    assert!(!self.listening, "spoke while the recognizer was running");
                    self.playing = Some(*utterance);
                }
                Effect::CancelSpeech => {
                    if let Some(id) = self.playing.take() {
                        self.ended.push(id);
                    }
                }
                Effect::ScheduleResume { epoch, .. } => self.resumes.push(*epoch),
                Effect::Status(state) => assert_eq!(*state, machine.state()),
                _ => {}
            }
        }
    }

    fn check(&self, machine: &TurnMachine) {
        assert!(
            !(self.listening && self.playing.is_some()),
            "recognizer and synthesizer active together in {}",
            machine.state()
        );
        if self.listening {
            assert_eq!(machine.state(), SessionState::Listening);
        }
        assert!(self.requests_outstanding <= 1, "more than one request in flight");
        assert_eq!(machine.request_in_flight(), self.requests_outstanding == 1);
    }
}

fn next_signal(rng: &mut StdRng, world: &mut World) -> Signal {
    if let Some(signal) = world.racing.pop_front() {
        world.races += 1;
        return signal;
    }
    loop {
        let signal = match rng.gen_range(0..16) {
            0 => Signal::VoiceEnabled,
            1 => Signal::VoiceDisabled,
            2 if world.capture_pending => {
                world.capture_pending = false;
                if rng.gen_bool(0.85) {
                    Signal::CaptureReady { monitoring: rng.gen_bool(0.8) }
                } else {
                    Signal::PermissionDenied
                }
            }
            3 => Signal::PermissionRetry,
            4 if world.listening => Signal::FinalTranscript(format!("utterance {}", rng.gen_range(0..4))),
            5 => Signal::Typed(format!("typed {}", rng.gen_range(0..4))),
            6 => Signal::TextInputFocused,
            7 => Signal::SpeechOutputToggled(rng.gen_bool(0.7)),
            8 if world.requests_outstanding > 0 => {
                world.requests_outstanding -= 1;
                if rng.gen_bool(0.8) {
                    Signal::CompletionSucceeded("a short reply".to_string())
                } else {
                    Signal::CompletionFailed(CompletionError::from_status(503, "busy"))
                }
            }
            9 if world.playing.is_some() => {
                let id = world.playing.take().unwrap();
                world.ended.push(id);
                if rng.gen_bool(0.4) {
                    // The monitor fired in the same instant playback ended.
                    world.racing.push_back(Signal::BargeIn);
                }
                Signal::SpeechFinished(id)
            }
            10 if world.playing.is_some() => {
                if rng.gen_bool(0.4) {
                    // Playback ended naturally just as the barge-in was detected.
                    let id = world.playing.take().unwrap();
                    world.ended.push(id);
                    world.racing.push_back(Signal::SpeechFinished(id));
                }
                Signal::BargeIn
            }
            11 | 12 if !world.resumes.is_empty() => {
                let i = rng.gen_range(0..world.resumes.len());
                Signal::ResumeDue(world.resumes.remove(i))
            }
            13 if world.listening && rng.gen_bool(0.2) => {
                Signal::InputDegraded(edge_voice::RecognitionErrorKind::Network)
            }
            14 if !world.ended.is_empty() => {
                let i = rng.gen_range(0..world.ended.len());
                Signal::SpeechFinished(world.ended.remove(i))
            }
            15 if !world.ended.is_empty() && world.playing.is_none() => Signal::BargeIn,
            _ => continue,
        };
        return signal;
    }
}

fn run_interleaving(seed: u64, steps: usize) -> World {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut machine = TurnMachine::new(TurnConfig::default(), true);
    let mut world = World::default();
    let mut now = Instant::now();

    for _ in 0..steps {
        now += Duration::from_millis(rng.gen_range(0..800));
        let signal = next_signal(&mut rng, &mut world);
        let effects = machine.handle(signal, now);
        world.apply(&effects, &machine);
        world.check(&machine);
    }

    let effects = machine.handle(Signal::Stop, now);
    world.apply(&effects, &machine);
    assert!(!world.listening);
    assert!(world.playing.is_none());
    assert_eq!(machine.state(), SessionState::Idle);
    world
}

#[test]
fn test_never_listens_while_speaking() {
    let mut total_sends = 0;
    let mut total_races = 0;
    for seed in 0..200 {
        let world = run_interleaving(seed, 300);
        total_sends += world.sends;
        total_races += world.races;
    }
    // The walk must actually exercise conversations, not just toggle settings.
    assert!(total_sends > 200, "only {} requests across all runs", total_sends);
    assert!(total_races > 0, "no barge-in raced a natural speech end");
}

#[test]
fn test_requests_respect_spacing() {
    let mut rng = StdRng::seed_from_u64(99);
    let config = TurnConfig::default();
    let spacing = config.min_request_spacing();
    let mut machine = TurnMachine::new(config, false);
    let mut now = Instant::now();
    let mut last_send: Option<Instant> = None;
    let mut outstanding = false;

    for _ in 0..2000 {
        now += Duration::from_millis(rng.gen_range(0..400));
        let signal = if outstanding && rng.gen_bool(0.5) {
            outstanding = false;
            Signal::CompletionSucceeded("ok".to_string())
        } else {
            Signal::Typed("again".to_string())
        };
        for effect in machine.handle(signal, now) {
            match effect {
                Effect::SendCompletion(_) => {
                    if let Some(prev) = last_send {
                        assert!(now - prev >= spacing, "sent {:?} after the previous", now - prev);
                    }
                    assert!(!outstanding);
                    last_send = Some(now);
                    outstanding = true;
                }
                Effect::ScheduleResume { epoch, .. } => {
                    machine.handle(Signal::ResumeDue(epoch), now);
                }
                _ => {}
            }
        }
    }
    assert!(last_send.is_some());
}
