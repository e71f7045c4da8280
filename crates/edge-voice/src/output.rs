//! **SpeechOutputSession** — synthesis with voice selection and the half-duplex rule.
//!
//! Speaking always stops the input session first: the host cannot reliably capture the
//! microphone while synthesizing. The synthesis queue is cleared before each utterance, so at
//! most one utterance is ever pending.

use crate::capability::{SpeechSynthesizer, Utterance, Voice};
use crate::error::SynthesisError;
use crate::event::{EventSender, SynthesisEvent, UtteranceId};
use crate::input::SpeechInputSession;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// User-adjustable speech settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Speaking rate, > 0 (1.0 = normal).
    pub rate: f32,
    /// Voice name hint chosen by the user; checked before the configured preferences.
    pub voice: Option<String>,
    /// Speak replies aloud.
    pub enabled: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            rate: 1.0,
            voice: None,
            enabled: true,
        }
    }
}

/// Configuration for speech output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Voice names tried in priority order (case-insensitive substring match).
    pub preferred_voices: Vec<String>,
    /// Language-region fallback, e.g. `en-US`.
    pub lang_hint: String,
    /// Initial speech settings.
    pub settings: VoiceSettings,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            preferred_voices: vec![
                "Google US English".to_string(),
                "Samantha".to_string(),
                "Microsoft Aria".to_string(),
                "Alex".to_string(),
            ],
            lang_hint: "en-US".to_string(),
            settings: VoiceSettings::default(),
        }
    }
}

/// Pick a voice: user hint, then preferred names in order, then the first voice matching the
/// language-region hint, then the platform's default voice. `None` means "let the platform
/// decide".
pub fn select_voice(
    voices: &[Voice],
    user_hint: Option<&str>,
    preferred: &[String],
    lang_hint: &str,
) -> Option<Voice> {
    let by_name = |wanted: &str| {
        let wanted = wanted.to_lowercase();
        voices
            .iter()
            .find(|v| v.name.to_lowercase() == wanted)
            .or_else(|| voices.iter().find(|v| v.name.to_lowercase().contains(&wanted)))
            .cloned()
    };

    if let Some(voice) = user_hint.and_then(|hint| by_name(hint)) {
        return Some(voice);
    }
    if let Some(voice) = preferred.iter().find_map(|name| by_name(name.as_str())) {
        return Some(voice);
    }
    let lang = normalize_lang(lang_hint);
    voices
        .iter()
        .find(|v| normalize_lang(&v.lang) == lang)
        .or_else(|| voices.iter().find(|v| v.default))
        .cloned()
}

fn normalize_lang(tag: &str) -> String {
    tag.replace('_', "-").to_lowercase()
}

/// What the session reports up to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSignal {
    Started(UtteranceId),
    /// Natural end or synthesis error of the current utterance.
    Finished {
        utterance: UtteranceId,
        error: Option<SynthesisError>,
    },
}

pub struct SpeechOutputSession {
    synthesizer: Box<dyn SpeechSynthesizer>,
    config: OutputConfig,
    settings: VoiceSettings,

    voice: Option<Voice>,
    // Voice list was empty at selection time; select again on VoicesChanged.
    reselect_pending: bool,

    active: Option<UtteranceId>,
}

impl SpeechOutputSession {
    pub fn new(mut synthesizer: Box<dyn SpeechSynthesizer>, config: OutputConfig, events: EventSender) -> Self {
        synthesizer.attach(events);
        let settings = config.settings.clone();
        let mut session = Self {
            synthesizer,
            config,
            settings,
            voice: None,
            reselect_pending: false,
            active: None,
        };
        session.refresh_voice();
        session
    }

    pub fn settings(&self) -> &VoiceSettings {
        &self.settings
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }

    /// Ignored unless `rate` is finite and positive.
    pub fn set_rate(&mut self, rate: f32) {
        if rate.is_finite() && rate > 0.0 {
            self.settings.rate = rate;
        } else {
            warn!("ignoring invalid speech rate {}", rate);
        }
    }

    pub fn set_voice_hint(&mut self, hint: Option<String>) {
        self.settings.voice = hint;
        self.refresh_voice();
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn is_speaking(&self) -> bool {
        self.active.is_some()
    }

    /// Speak `text` as `utterance`. Stops `input` first and clears the synthesis queue.
    pub fn speak(
        &mut self,
        utterance: UtteranceId,
        text: &str,
        input: &mut SpeechInputSession,
    ) -> Result<(), SynthesisError> {
        input.stop();
        self.synthesizer.cancel();
        self.active = None;

        if self.reselect_pending {
            self.refresh_voice();
        }

        let request = Utterance {
            id: utterance,
            text: text.to_string(),
            rate: self.settings.rate,
            voice: self.voice.clone(),
        };
        self.synthesizer.speak(request)?;
        self.active = Some(utterance);
        info!(
            "🔊 speaking #{} ({} chars, voice {})",
            utterance,
            text.len(),
            self.voice.as_ref().map(|v| v.name.as_str()).unwrap_or("default")
        );
        Ok(())
    }

    /// Cancel the current utterance. Idempotent; returns whether anything was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(id) => {
                self.synthesizer.cancel();
                info!("🔇 speech #{} cancelled", id);
                true
            }
            None => false,
        }
    }

    /// Handle an event from the synthesis capability. Events for cancelled or superseded
    /// utterances are swallowed.
    pub fn handle(&mut self, event: SynthesisEvent) -> Option<OutputSignal> {
        match event {
            SynthesisEvent::Started(id) if self.active == Some(id) => Some(OutputSignal::Started(id)),
            SynthesisEvent::Ended(id) if self.active == Some(id) => {
                self.active = None;
                Some(OutputSignal::Finished {
                    utterance: id,
                    error: None,
                })
            }
            SynthesisEvent::Failed(id, error) if self.active == Some(id) => {
                self.active = None;
                Some(OutputSignal::Finished {
                    utterance: id,
                    error: Some(error),
                })
            }
            SynthesisEvent::VoicesChanged => {
                if self.reselect_pending || self.voice.is_none() {
                    self.refresh_voice();
                }
                None
            }
            other => {
                debug!("stale synthesis event {:?}", other);
                None
            }
        }
    }

    fn refresh_voice(&mut self) {
        let voices = self.synthesizer.voices();
        if voices.is_empty() {
            self.reselect_pending = true;
            return;
        }
        self.reselect_pending = false;
        self.voice = select_voice(
            &voices,
            self.settings.voice.as_deref(),
            &self.config.preferred_voices,
            &self.config.lang_hint,
        );
        debug!("voice selected: {:?}", self.voice.as_ref().map(|v| &v.name));
    }
}
