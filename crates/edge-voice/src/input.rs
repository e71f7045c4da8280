//! Speech input session: continuous recognition with an auto-restart policy.
//!
//! Host recognition sessions end on their own all the time. While the controller wants input,
//! every spontaneous end schedules a delayed restart; a permission denial ends the session for
//! good and is reported instead of retried.

use crate::capability::{RecognitionSettings, SpeechRecognizer};
use crate::error::RecognitionErrorKind;
use crate::event::{EventSender, RecognitionEvent, Timer};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for speech input
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Recognition language (default: en-US)
    pub language: String,

    /// Delay before restarting after a spontaneous end (default: 300ms)
    pub restart_delay_ms: u64,

    /// Extra delay after an "already started" failure (default: 500ms)
    pub already_started_extra_ms: u64,

    /// Cap for the soft-error restart backoff (default: 1000ms)
    pub max_backoff_ms: u64,

    /// Consecutive soft failures before a warning is surfaced (default: 5)
    pub warn_after_failures: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            restart_delay_ms: 300,
            already_started_extra_ms: 500,
            max_backoff_ms: 1000,
            warn_after_failures: 5,
        }
    }
}

impl InputConfig {
    /// Restart delay after `failures` consecutive soft failures: doubles from the base, capped.
    pub fn restart_delay(&self, failures: u32) -> Duration {
        let base = self.restart_delay_ms;
        let scaled = base.saturating_mul(1u64 << failures.min(16));
        Duration::from_millis(scaled.min(self.max_backoff_ms.max(base)))
    }
}

/// What the session reports up to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum InputSignal {
    FinalTranscript(String),
    PermissionDenied,
    /// Restarts keep failing; voice input is degraded but typing still works.
    Degraded(RecognitionErrorKind),
}

pub struct SpeechInputSession {
    recognizer: Box<dyn SpeechRecognizer>,
    config: InputConfig,
    events: EventSender,

    // Controller wants input; restarts only happen while this holds.
    wanted: bool,
    running: bool,
    blocked: bool,

    failures: u32,
    warned: bool,
    restart_token: u64,

    interim: String,
}

impl SpeechInputSession {
    pub fn new(mut recognizer: Box<dyn SpeechRecognizer>, config: InputConfig, events: EventSender) -> Self {
        let settings = RecognitionSettings {
            continuous: true,
            interim_results: true,
            language: config.language.clone(),
        };
        recognizer.attach(events.clone(), &settings);
        Self {
            recognizer,
            config,
            events,
            wanted: false,
            running: false,
            blocked: false,
            failures: 0,
            warned: false,
            restart_token: 0,
            interim: String::new(),
        }
    }

    /// Begin listening. Clears a previous permission block (explicit retry path).
    pub fn start(&mut self) -> Option<InputSignal> {
        self.wanted = true;
        self.blocked = false;
        if self.running {
            return None;
        }
        self.attempt()
    }

    /// Stop listening. Pending restarts become no-ops.
    pub fn stop(&mut self) {
        self.wanted = false;
        self.restart_token += 1;
        if self.running {
            debug!("🛑 recognition stop");
            self.recognizer.stop();
            self.running = false;
        }
    }

    /// Stop and discard any pending result.
    pub fn abort(&mut self) {
        self.wanted = false;
        self.restart_token += 1;
        if self.running {
            self.recognizer.abort();
            self.running = false;
        }
    }

    pub fn is_listening(&self) -> bool {
        self.running
    }

    pub fn is_wanted(&self) -> bool {
        self.wanted
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Latest interim text. Kept for display only.
    pub fn interim(&self) -> &str {
        &self.interim
    }

    /// Handle an event from the recognition capability.
    pub fn handle(&mut self, event: RecognitionEvent) -> Option<InputSignal> {
        match event {
            RecognitionEvent::Started => {
                self.running = true;
                self.failures = 0;
                self.warned = false;
                debug!("🎤 recognition started");
                None
            }
            RecognitionEvent::Result { final_text, interim } => {
                self.interim = interim;
                let text = final_text?.trim().to_string();
                if text.is_empty() || !self.wanted {
                    return None;
                }
                self.interim.clear();
                Some(InputSignal::FinalTranscript(text))
            }
            RecognitionEvent::Error(kind) => self.on_error(kind),
            RecognitionEvent::Ended => {
                self.running = false;
                if self.wanted && !self.blocked {
                    let delay = self.config.restart_delay(self.failures);
                    debug!("recognition ended, restarting in {:?}", delay);
                    self.schedule_restart(delay);
                }
                None
            }
        }
    }

    /// A scheduled restart fired. No-op unless input is still wanted.
    pub fn restart_due(&mut self, token: u64) -> Option<InputSignal> {
        if token != self.restart_token || !self.wanted || self.blocked || self.running {
            debug!("stale recognition restart ignored");
            return None;
        }
        self.attempt()
    }

    fn attempt(&mut self) -> Option<InputSignal> {
        match self.recognizer.start() {
            Ok(()) => {
                self.running = true;
                None
            }
            Err(kind) if kind.is_permission_denial() => self.deny(kind),
            Err(RecognitionErrorKind::AlreadyStarted) => {
                let delay = self.config.restart_delay(0)
                    + Duration::from_millis(self.config.already_started_extra_ms);
                debug!("recognizer busy, retrying in {:?}", delay);
                let signal = self.record_failure(RecognitionErrorKind::AlreadyStarted);
                self.schedule_restart(delay);
                signal
            }
            Err(kind) => {
                let signal = self.record_failure(kind);
                self.schedule_restart(self.config.restart_delay(self.failures));
                signal
            }
        }
    }

    fn on_error(&mut self, kind: RecognitionErrorKind) -> Option<InputSignal> {
        if kind.is_permission_denial() {
            return self.deny(kind);
        }
        match kind {
            // Silence and our own stop/abort are routine.
            RecognitionErrorKind::NoSpeech | RecognitionErrorKind::Aborted => {
                debug!("recognition soft end: {}", kind);
                None
            }
            other => self.record_failure(other),
        }
    }

    fn deny(&mut self, kind: RecognitionErrorKind) -> Option<InputSignal> {
        warn!("🚫 recognition permission denied ({})", kind);
        self.blocked = true;
        self.wanted = false;
        self.running = false;
        self.restart_token += 1;
        Some(InputSignal::PermissionDenied)
    }

    fn record_failure(&mut self, kind: RecognitionErrorKind) -> Option<InputSignal> {
        self.failures = self.failures.saturating_add(1);
        debug!("recognition soft error {} (#{})", kind, self.failures);
        if self.failures >= self.config.warn_after_failures && !self.warned {
            self.warned = true;
            warn!(
                "recognition failed {} times in a row ({}); voice input degraded",
                self.failures, kind
            );
            return Some(InputSignal::Degraded(kind));
        }
        None
    }

    fn schedule_restart(&mut self, delay: Duration) {
        self.restart_token += 1;
        info!("🔁 recognition restart in {:?}", delay);
        self.events
            .schedule(delay, Timer::RestartRecognition(self.restart_token));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventSender};
    use crate::testing::FakeRecognizer;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn session() -> (SpeechInputSession, FakeRecognizer, UnboundedReceiver<Event>) {
        let (events, rx) = EventSender::channel();
        let fake = FakeRecognizer::new();
        let session = SpeechInputSession::new(Box::new(fake.clone()), InputConfig::default(), events);
        (session, fake, rx)
    }

    async fn next_restart(rx: &mut UnboundedReceiver<Event>) -> u64 {
        loop {
            match rx.recv().await {
                Some(Event::Timer(Timer::RestartRecognition(token))) => return token,
                Some(_) => continue,
                None => panic!("channel closed"),
            }
        }
    }

    #[test]
    fn backoff_is_capped() {
        let config = InputConfig::default();
        assert_eq!(config.restart_delay(0), Duration::from_millis(300));
        assert_eq!(config.restart_delay(1), Duration::from_millis(600));
        assert_eq!(config.restart_delay(2), Duration::from_millis(1000));
        assert_eq!(config.restart_delay(40), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_after_spontaneous_end() {
        let (mut session, fake, mut rx) = session();
        assert_eq!(session.start(), None);
        assert_eq!(fake.starts(), 1);

        session.handle(RecognitionEvent::Ended);
        let token = next_restart(&mut rx).await;
        assert_eq!(session.restart_due(token), None);
        assert_eq!(fake.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_is_noop_after_stop() {
        let (mut session, fake, mut rx) = session();
        session.start();
        session.handle(RecognitionEvent::Ended);
        let token = next_restart(&mut rx).await;

        session.stop();
        assert_eq!(session.restart_due(token), None);
        assert_eq!(fake.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn already_started_retries_with_extra_delay() {
        let (mut session, fake, mut rx) = session();
        fake.fail_next_start(RecognitionErrorKind::AlreadyStarted);

        let before = tokio::time::Instant::now();
        assert_eq!(session.start(), None);
        assert!(!session.is_listening());
        let token = next_restart(&mut rx).await;
        assert!(before.elapsed() >= Duration::from_millis(800));

        session.restart_due(token);
        assert!(session.is_listening());
        assert_eq!(fake.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denial_is_terminal() {
        let (mut session, fake, _rx) = session();
        session.start();
        assert_eq!(
            session.handle(RecognitionEvent::Error(RecognitionErrorKind::NotAllowed)),
            Some(InputSignal::PermissionDenied)
        );
        assert_eq!(session.handle(RecognitionEvent::Ended), None);
        assert!(session.is_blocked());
        assert_eq!(session.restart_due(99), None);
        assert_eq!(fake.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn denial_on_start_is_reported() {
        let (mut session, fake, _rx) = session();
        fake.fail_next_start(RecognitionErrorKind::ServiceNotAllowed);
        assert_eq!(session.start(), Some(InputSignal::PermissionDenied));
        assert!(session.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_soft_errors_degrade_once() {
        let (mut session, _fake, _rx) = session();
        session.start();
        let mut degraded = 0;
        for _ in 0..8 {
            if let Some(InputSignal::Degraded(_)) =
                session.handle(RecognitionEvent::Error(RecognitionErrorKind::Network))
            {
                degraded += 1;
            }
        }
        assert_eq!(degraded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_final_results_are_forwarded() {
        let (mut session, _fake, _rx) = session();
        session.start();
        assert_eq!(
            session.handle(RecognitionEvent::Result {
                final_text: None,
                interim: "hel".into()
            }),
            None
        );
        assert_eq!(session.interim(), "hel");
        assert_eq!(
            session.handle(RecognitionEvent::Result {
                final_text: Some("  Hello ".into()),
                interim: String::new()
            }),
            Some(InputSignal::FinalTranscript("Hello".into()))
        );
        assert_eq!(
            session.handle(RecognitionEvent::Result {
                final_text: Some("   ".into()),
                interim: String::new()
            }),
            None
        );
    }
}
