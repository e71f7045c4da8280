use super::api_key_from_env;
use crate::capability::{SpeechSynthesizer, Utterance, Voice};
use crate::error::{SynthesisError, VoiceError, VoiceResult};
use crate::event::{EventSender, SynthesisEvent};
use rodio::{Decoder, OutputStream, Sink};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Voices offered by OpenAI-compatible `/audio/speech` endpoints.
const VOICES: [&str; 6] = ["alloy", "echo", "fable", "onyx", "nova", "shimmer"];

/// Speech endpoint settings.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    /// tts-1 (fast) or tts-1-hd.
    pub model: String,
    /// Used when the controller picks no voice.
    pub default_voice: String,
}

impl TtsConfig {
    /// Build from environment: `TTS_API_URL`, `TTS_API_KEY` (or `EDGE_AUDIO_API_KEY`),
    /// `TTS_MODEL`, `TTS_VOICE`.
    pub fn from_env() -> VoiceResult<Self> {
        Ok(Self {
            base_url: std::env::var("TTS_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: api_key_from_env("TTS_API_KEY")?,
            model: std::env::var("TTS_MODEL").unwrap_or_else(|_| "tts-1".to_string()),
            default_voice: std::env::var("TTS_VOICE").unwrap_or_else(|_| "nova".to_string()),
        })
    }
}

enum Job {
    Speak { utterance: Utterance, generation: u64 },
}

/// HTTP synthesis with rodio playback on a dedicated thread.
///
/// `cancel()` bumps a generation counter; the playback thread stops the sink as soon as it
/// sees the change and never reports an end for the cancelled utterance.
pub struct HttpSynthesizer {
    jobs: std_mpsc::Sender<Job>,
    generation: Arc<AtomicU64>,
    events: Arc<std::sync::Mutex<Option<EventSender>>>,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| VoiceError::Config(format!("tts client: {}", e)))?;
        let (jobs, rx) = std_mpsc::channel();
        let generation = Arc::new(AtomicU64::new(0));
        let events = Arc::new(std::sync::Mutex::new(None));

        let player = Player {
            config,
            client,
            generation: Arc::clone(&generation),
            events: Arc::clone(&events),
        };
        thread::Builder::new()
            .name("edge-synthesizer".to_string())
            .spawn(move || player.run(rx))
            .map_err(|e| VoiceError::Config(format!("playback thread: {}", e)))?;

        Ok(Self {
            jobs,
            generation,
            events,
        })
    }
}

impl SpeechSynthesizer for HttpSynthesizer {
    fn attach(&mut self, events: EventSender) {
        if let Ok(mut slot) = self.events.lock() {
            *slot = Some(events);
        }
    }

    fn voices(&self) -> Vec<Voice> {
        VOICES
            .iter()
            .map(|name| Voice {
                name: (*name).to_string(),
                lang: "en-US".to_string(),
                default: *name == "nova",
            })
            .collect()
    }

    fn speak(&mut self, utterance: Utterance) -> Result<(), SynthesisError> {
        let generation = self.generation.load(Ordering::SeqCst);
        self.jobs
            .send(Job::Speak {
                utterance,
                generation,
            })
            .map_err(|_| SynthesisError("playback thread stopped".to_string()))
    }

    fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

struct Player {
    config: TtsConfig,
    client: reqwest::blocking::Client,
    generation: Arc<AtomicU64>,
    events: Arc<std::sync::Mutex<Option<EventSender>>>,
}

impl Player {
    fn run(self, rx: std_mpsc::Receiver<Job>) {
        // OutputStream must stay alive for the sink to play.
        let output = OutputStream::try_default()
            .map_err(|e| e.to_string())
            .and_then(|(stream, handle)| {
                Sink::try_new(&handle)
                    .map(|sink| (stream, sink))
                    .map_err(|e| e.to_string())
            });
        match &output {
            Ok(_) => info!("🔊 playback sink ready"),
            Err(err) => warn!("no audio output: {}", err),
        }

        while let Ok(Job::Speak { utterance, generation }) = rx.recv() {
            let id = utterance.id;
            if self.cancelled(generation) {
                continue;
            }
            let sink = match &output {
                Ok((_stream, sink)) => sink,
                Err(err) => {
                    self.emit(SynthesisEvent::Failed(id, SynthesisError(err.clone())));
                    continue;
                }
            };
            let audio = match self.synthesize(&utterance) {
                Ok(audio) => audio,
                Err(err) => {
                    if !self.cancelled(generation) {
                        self.emit(SynthesisEvent::Failed(id, err));
                    }
                    continue;
                }
            };
            if self.cancelled(generation) {
                continue;
            }
            match Decoder::new(Cursor::new(audio)) {
                Ok(source) => sink.append(source),
                Err(e) => {
                    self.emit(SynthesisEvent::Failed(id, SynthesisError(format!("decode failed: {}", e))));
                    continue;
                }
            }
            self.emit(SynthesisEvent::Started(id));

            while !sink.empty() {
                if self.cancelled(generation) {
                    sink.stop();
                    debug!("playback of #{} cut", id);
                    break;
                }
                thread::sleep(Duration::from_millis(20));
            }
            if !self.cancelled(generation) {
                self.emit(SynthesisEvent::Ended(id));
            }
        }
    }

    fn cancelled(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) != generation
    }

    fn synthesize(&self, utterance: &Utterance) -> Result<Vec<u8>, SynthesisError> {
        let url = format!("{}/audio/speech", self.config.base_url.trim_end_matches('/'));
        let voice = utterance
            .voice
            .as_ref()
            .map(|v| v.name.clone())
            .unwrap_or_else(|| self.config.default_voice.clone());
        let body = serde_json::json!({
            "model": self.config.model,
            "input": utterance.text,
            "voice": voice,
            "speed": utterance.rate.clamp(0.25, 4.0),
        });
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .map_err(|e| SynthesisError(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(SynthesisError(format!(
                "speech API error {}: {}",
                status,
                crate::error::excerpt(&body)
            )));
        }
        res.bytes()
            .map(|b| b.to_vec())
            .map_err(|e| SynthesisError(e.to_string()))
    }

    fn emit(&self, event: SynthesisEvent) {
        let events = self.events.lock().ok().and_then(|slot| slot.clone());
        if let Some(events) = events {
            events.synthesis(event);
        }
    }
}
