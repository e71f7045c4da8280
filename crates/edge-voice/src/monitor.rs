//! Voice activity monitor: raises barge-in when the user talks over synthesized speech.
//!
//! Samples the microphone at display-refresh cadence, computes RMS over the latest buffer and
//! fires once when it crosses the threshold while synthesis is active. A post-fire cooldown
//! keeps one loud interruption from cancelling twice.

use crate::capability::{AudioCapture, CaptureStream};
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Configuration for barge-in detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// RMS level (0.0..1.0) above which the user counts as speaking (default: 0.06)
    pub rms_threshold: f32,

    /// Quiet period after a barge-in (default: 600ms)
    pub cooldown_ms: u64,

    /// Sampling cadence in Hz (default: 60)
    pub sample_hz: u32,

    /// Samples read per tick (default: 2048)
    pub buffer_len: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rms_threshold: 0.06,
            cooldown_ms: 600,
            sample_hz: 60,
            buffer_len: 2048,
        }
    }
}

impl MonitorConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.sample_hz.max(1)))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Root-mean-square amplitude of `samples`, each clamped to -1.0..1.0.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples
        .iter()
        .map(|s| {
            let s = s.clamp(-1.0, 1.0);
            s * s
        })
        .sum();
    (sum / samples.len() as f32).sqrt()
}

pub struct VoiceActivityMonitor {
    config: MonitorConfig,
    stream: Option<Box<dyn CaptureStream>>,
    sampling: bool,
    quiet_until: Option<Instant>,
    buffer: Vec<f32>,
}

impl VoiceActivityMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let buffer = vec![0.0; config.buffer_len.max(1)];
        Self {
            config,
            stream: None,
            sampling: false,
            quiet_until: None,
            buffer,
        }
    }

    /// Acquire the microphone. At most one stream per monitoring session.
    pub fn acquire(&mut self, capture: &mut dyn AudioCapture) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = capture.acquire()?;
        info!("🎙️ microphone acquired for barge-in monitoring");
        self.stream = Some(stream);
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.stream.is_some()
    }

    /// Begin sampling (entering Speaking). No-op without a stream.
    pub fn resume(&mut self) {
        if self.stream.is_some() && !self.sampling {
            debug!("barge-in monitoring on");
            self.sampling = true;
        }
    }

    pub fn pause(&mut self) {
        if self.sampling {
            debug!("barge-in monitoring off");
            self.sampling = false;
        }
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling
    }

    pub fn sample_interval(&self) -> Duration {
        self.config.sample_interval()
    }

    /// Stop sampling and release the stream.
    pub fn release(&mut self) {
        self.sampling = false;
        self.quiet_until = None;
        if let Some(mut stream) = self.stream.take() {
            stream.release();
            info!("🎙️ microphone released");
        }
    }

    /// Take one sample. Returns `true` exactly when a barge-in should be raised.
    pub fn sample(&mut self, now: Instant, synthesis_active: bool) -> bool {
        if !self.sampling || !synthesis_active {
            return false;
        }
        if self.quiet_until.is_some_and(|until| now < until) {
            return false;
        }
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let n = stream.read_latest(&mut self.buffer);
        if n == 0 {
            return false;
        }
        let level = rms(&self.buffer[..n.min(self.buffer.len())]);
        if level <= self.config.rms_threshold {
            return false;
        }
        info!("⚡ barge-in (rms {:.3})", level);
        self.quiet_until = Some(now + self.config.cooldown());
        true
    }
}

impl Drop for VoiceActivityMonitor {
    fn drop(&mut self) {
        self.release();
    }
}
