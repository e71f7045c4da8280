use crate::capability::{AudioCapture, CaptureStream};
use crate::error::CaptureError;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

type Ring = Arc<Mutex<VecDeque<f32>>>;

/// Default-input-device capture. Keeps the most recent `history` mono samples.
pub struct CpalCapture {
    history: usize,
}

impl CpalCapture {
    pub fn new(history: usize) -> Self {
        Self {
            history: history.max(1),
        }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl AudioCapture for CpalCapture {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let ring: Ring = Arc::new(Mutex::new(VecDeque::with_capacity(self.history)));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread_ring = Arc::clone(&ring);
        let history = self.history;
        // The stream lives and dies on this thread.
        let thread = thread::Builder::new()
            .name("edge-capture".to_string())
            .spawn(move || {
                let stream = match open_input(thread_ring, history) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Blocks until release() sends or drops the sender.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                ring,
                stop: Some(stop_tx),
                thread: Some(thread),
            })),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => Err(CaptureError::Unavailable("capture thread exited".to_string())),
        }
    }
}

fn open_input(ring: Ring, history: usize) -> Result<Stream, CaptureError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| CaptureError::Unavailable("no input device available".to_string()))?;
    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    let format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let channels = usize::from(config.channels.max(1));

    info!(
        "📱 capture device: {} ({} Hz, {} ch)",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.sample_rate.0,
        channels
    );

    let on_error = |err: cpal::StreamError| warn!("capture stream error: {}", err);
    let stream = match format {
        SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push_frames(&ring, history, data.chunks(channels).map(|frame| frame[0]));
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                push_frames(
                    &ring,
                    history,
                    data.chunks(channels)
                        .map(|frame| f32::from(frame[0]) / f32::from(i16::MAX)),
                );
            },
            on_error,
            None,
        ),
        other => {
            return Err(CaptureError::Unavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(map_build_error)?;

    stream
        .play()
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    Ok(stream)
}

fn map_build_error(err: cpal::BuildStreamError) -> CaptureError {
    let text = err.to_string();
    // cpal has no dedicated permission variant; hosts report it in the backend message.
    if text.to_lowercase().contains("permission") || text.to_lowercase().contains("denied") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Unavailable(text)
    }
}

fn push_frames(ring: &Ring, history: usize, samples: impl Iterator<Item = f32>) {
    let Ok(mut ring) = ring.lock() else {
        return;
    };
    for s in samples {
        if ring.len() == history {
            ring.pop_front();
        }
        ring.push_back(s);
    }
}

struct CpalStream {
    ring: Ring,
    stop: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn read_latest(&mut self, buf: &mut [f32]) -> usize {
        let Ok(ring) = self.ring.lock() else {
            return 0;
        };
        let n = ring.len().min(buf.len());
        let skip = ring.len() - n;
        for (slot, sample) in buf.iter_mut().zip(ring.iter().skip(skip)) {
            *slot = *sample;
        }
        n
    }

    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("capture thread panicked");
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.release();
    }
}
