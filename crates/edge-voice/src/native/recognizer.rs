use super::api_key_from_env;
use super::wav::{encode_wav, resample, to_i16};
use crate::capability::{RecognitionSettings, SpeechRecognizer};
use crate::error::{RecognitionErrorKind, VoiceError, VoiceResult};
use crate::event::{EventSender, RecognitionEvent};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

const VAD_RATE: u32 = 16_000;
// 30ms at 16 kHz
const FRAME: usize = 480;
const FRAME_MS: u64 = 30;

/// Transcription endpoint and turn detection settings.
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Base URL without trailing slash (e.g. https://api.openai.com/v1).
    pub base_url: String,
    pub api_key: String,
    /// whisper-1, gpt-4o-transcribe, ...
    pub model: String,
    /// Silence that ends an utterance (default: 800ms)
    pub silence: Duration,
    /// Shorter utterances are discarded (default: 200ms)
    pub min_speech: Duration,
    /// Utterances are cut here (default: 30s)
    pub max_utterance: Duration,
}

impl SttConfig {
    /// Build from environment: `STT_API_URL`, `STT_API_KEY` (or `EDGE_AUDIO_API_KEY`), `STT_MODEL`.
    pub fn from_env() -> VoiceResult<Self> {
        Ok(Self {
            base_url: std::env::var("STT_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: api_key_from_env("STT_API_KEY")?,
            model: std::env::var("STT_MODEL").unwrap_or_else(|_| "whisper-1".to_string()),
            silence: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_utterance: Duration::from_secs(30),
        })
    }
}

// Stop modes seen by the worker thread.
const RUN: u8 = 0;
const STOP: u8 = 1;
const ABORT: u8 = 2;

/// Continuous recognition from the default microphone: VAD gap logic segments utterances,
/// each finished utterance is transcribed over HTTP and delivered as a final result.
pub struct VadRecognizer {
    config: SttConfig,
    client: reqwest::blocking::Client,
    events: Option<EventSender>,
    language: String,
    running: Arc<AtomicBool>,
    mode: Arc<AtomicU8>,
}

impl VadRecognizer {
    pub fn new(config: SttConfig) -> VoiceResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VoiceError::Config(format!("stt client: {}", e)))?;
        Ok(Self {
            config,
            client,
            events: None,
            language: "en".to_string(),
            running: Arc::new(AtomicBool::new(false)),
            mode: Arc::new(AtomicU8::new(RUN)),
        })
    }
}

impl SpeechRecognizer for VadRecognizer {
    fn attach(&mut self, events: EventSender, settings: &RecognitionSettings) {
        self.events = Some(events);
        // Transcription APIs take ISO-639-1.
        self.language = settings
            .language
            .split(['-', '_'])
            .next()
            .unwrap_or("en")
            .to_lowercase();
    }

    fn start(&mut self) -> Result<(), RecognitionErrorKind> {
        let Some(events) = self.events.clone() else {
            return Err(RecognitionErrorKind::Other("recognizer not attached".to_string()));
        };
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RecognitionErrorKind::AlreadyStarted);
        }
        self.mode.store(RUN, Ordering::SeqCst);

        let worker = Worker {
            config: self.config.clone(),
            client: self.client.clone(),
            language: self.language.clone(),
            events,
            running: Arc::clone(&self.running),
            mode: Arc::clone(&self.mode),
        };
        thread::Builder::new()
            .name("edge-recognizer".to_string())
            .spawn(move || worker.run())
            .map(|_| ())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                RecognitionErrorKind::Other(e.to_string())
            })
    }

    fn stop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.mode.store(STOP, Ordering::SeqCst);
        }
    }

    fn abort(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            self.mode.store(ABORT, Ordering::SeqCst);
        }
    }
}

struct Worker {
    config: SttConfig,
    client: reqwest::blocking::Client,
    language: String,
    events: EventSender,
    running: Arc<AtomicBool>,
    mode: Arc<AtomicU8>,
}

/// Gap logic over 30ms VAD frames.
#[derive(Default)]
struct Segmenter {
    speaking: bool,
    speech_ms: u64,
    silence_ms: u64,
    samples: Vec<f32>,
}

impl Segmenter {
    /// Feed one frame. Returns a finished utterance when the silence gap closes it.
    fn push(&mut self, frame: &[f32], is_speech: bool, config: &SttConfig) -> Option<Vec<f32>> {
        if is_speech {
            if !self.speaking {
                debug!("🎤 speech started");
                self.speaking = true;
            }
            self.speech_ms += FRAME_MS;
            self.silence_ms = 0;
            self.samples.extend_from_slice(frame);
            if self.speech_ms >= config.max_utterance.as_millis() as u64 {
                return self.take(config);
            }
            return None;
        }
        if !self.speaking {
            return None;
        }
        self.silence_ms += FRAME_MS;
        self.samples.extend_from_slice(frame);
        if self.silence_ms >= config.silence.as_millis() as u64 {
            return self.take(config);
        }
        None
    }

    fn take(&mut self, config: &SttConfig) -> Option<Vec<f32>> {
        let long_enough = self.speech_ms >= config.min_speech.as_millis() as u64;
        let samples = std::mem::take(&mut self.samples);
        *self = Self::default();
        long_enough.then_some(samples)
    }
}

impl Worker {
    fn run(self) {
        let (tx, rx) = std_mpsc::channel::<Vec<f32>>();
        let (stream, device_rate) = match open_mono_input(tx) {
            Ok(opened) => opened,
            Err(kind) => {
                warn!("recognizer input failed: {}", kind);
                self.events.recognition(RecognitionEvent::Error(kind));
                self.finish();
                return;
            }
        };
        self.events.recognition(RecognitionEvent::Started);
        info!("🎙️ recognizer listening ({} Hz input)", device_rate);

        let mut vad = Vad::new();
        vad.set_mode(VadMode::VeryAggressive);
        vad.set_sample_rate(SampleRate::Rate16kHz);
        let mut segmenter = Segmenter::default();
        let mut pending: Vec<f32> = Vec::with_capacity(FRAME * 4);

        loop {
            match self.mode.load(Ordering::SeqCst) {
                RUN => {}
                STOP => {
                    // Deliver what was said before the stop.
                    if let Some(utterance) = segmenter.take(&self.config) {
                        self.transcribe(&utterance);
                    }
                    break;
                }
                _ => break,
            }
            let chunk = match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(chunk) => chunk,
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                    self.events
                        .recognition(RecognitionEvent::Error(RecognitionErrorKind::AudioCapture));
                    break;
                }
            };
            pending.extend(resample(&chunk, device_rate, VAD_RATE));

            while pending.len() >= FRAME {
                let frame: Vec<f32> = pending.drain(..FRAME).collect();
                let pcm: Vec<i16> = frame.iter().copied().map(to_i16).collect();
                let is_speech = vad.is_voice_segment(&pcm).unwrap_or(false);
                if let Some(utterance) = segmenter.push(&frame, is_speech, &self.config) {
                    self.transcribe(&utterance);
                }
            }
        }

        drop(stream);
        self.finish();
    }

    fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.events.recognition(RecognitionEvent::Ended);
    }

    fn transcribe(&self, samples: &[f32]) {
        match self.request(samples) {
            Ok(text) if !text.is_empty() => {
                self.events.recognition(RecognitionEvent::Result {
                    final_text: Some(text),
                    interim: String::new(),
                });
            }
            Ok(_) => debug!("empty transcription discarded"),
            Err(kind) => self.events.recognition(RecognitionEvent::Error(kind)),
        }
    }

    fn request(&self, samples: &[f32]) -> Result<String, RecognitionErrorKind> {
        let url = format!("{}/audio/transcriptions", self.config.base_url.trim_end_matches('/'));
        let part = reqwest::blocking::multipart::Part::bytes(encode_wav(samples, VAD_RATE))
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionErrorKind::Other(e.to_string()))?;
        let form = reqwest::blocking::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("language", self.language.clone());

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .map_err(|_| RecognitionErrorKind::Network)?;
        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(RecognitionErrorKind::ServiceNotAllowed);
        }
        if !status.is_success() {
            warn!("transcription failed with status {}", status);
            return Err(RecognitionErrorKind::Network);
        }
        let json: serde_json::Value = res.json().map_err(|e| RecognitionErrorKind::Other(e.to_string()))?;
        Ok(json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string())
    }
}

fn open_mono_input(
    tx: std_mpsc::Sender<Vec<f32>>,
) -> Result<(cpal::Stream, u32), RecognitionErrorKind> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(RecognitionErrorKind::AudioCapture)?;
    let supported = device
        .default_input_config()
        .map_err(|_| RecognitionErrorKind::AudioCapture)?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels.max(1));
    let rate = config.sample_rate.0;

    let on_error = |err: cpal::StreamError| warn!("recognizer stream error: {}", err);
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.chunks(channels).map(|f| f[0]).collect());
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(
                    data.chunks(channels)
                        .map(|f| f32::from(f[0]) / f32::from(i16::MAX))
                        .collect(),
                );
            },
            on_error,
            None,
        ),
        _ => return Err(RecognitionErrorKind::AudioCapture),
    }
    .map_err(|e| {
        let text = e.to_string().to_lowercase();
        if text.contains("permission") || text.contains("denied") {
            RecognitionErrorKind::NotAllowed
        } else {
            RecognitionErrorKind::AudioCapture
        }
    })?;
    stream.play().map_err(|_| RecognitionErrorKind::AudioCapture)?;
    Ok((stream, rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SttConfig {
        SttConfig {
            base_url: "http://localhost".into(),
            api_key: "k".into(),
            model: "whisper-1".into(),
            silence: Duration::from_millis(90),
            min_speech: Duration::from_millis(60),
            max_utterance: Duration::from_secs(30),
        }
    }

    #[test]
    fn gap_closes_utterance() {
        let config = config();
        let mut seg = Segmenter::default();
        let frame = [0.1f32; FRAME];
        assert!(seg.push(&frame, true, &config).is_none());
        assert!(seg.push(&frame, true, &config).is_none());
        assert!(seg.push(&frame, false, &config).is_none());
        assert!(seg.push(&frame, false, &config).is_none());
        let utterance = seg.push(&frame, false, &config).unwrap();
        assert_eq!(utterance.len(), FRAME * 5);
    }

    #[test]
    fn blips_are_discarded() {
        let config = config();
        let mut seg = Segmenter::default();
        let frame = [0.1f32; FRAME];
        seg.push(&frame, true, &config);
        for _ in 0..2 {
            assert!(seg.push(&frame, false, &config).is_none());
        }
        assert!(seg.push(&frame, false, &config).is_none());
        assert!(!seg.speaking);
    }
}
