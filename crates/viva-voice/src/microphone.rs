//! Microphone acquisition on bare metal via CPAL.
//!
//! `cpal::Stream` is not `Send`, so the stream lives on a dedicated audio
//! thread for as long as the microphone is held. The thread converts whatever
//! the device delivers into mono 16 kHz f32 and pushes it into the [`InputTap`].

use crate::error::{VoiceError, VoiceResult};
use crate::tap::{InputTap, TAP_SAMPLE_RATE};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tracing::{info, warn};

/// A source of live input audio.
pub trait Microphone: Send {
    /// Open the device and start feeding `tap`. Fails when no device is usable or access is denied.
    fn acquire(&mut self, tap: InputTap) -> VoiceResult<()>;

    /// Stop the device. Safe to call repeatedly.
    fn release(&mut self);

    fn is_live(&self) -> bool;
}

struct MicWorker {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Default (or named) CPAL input device.
pub struct CpalMicrophone {
    device_name: Option<String>,
    worker: Option<MicWorker>,
}

impl CpalMicrophone {
    /// `device_name` selects an input by exact name; None uses the host default.
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            worker: None,
        }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl Microphone for CpalMicrophone {
    fn acquire(&mut self, tap: InputTap) -> VoiceResult<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();

        let handle = thread::Builder::new()
            .name("viva-mic".to_string())
            .spawn(move || {
                let stream = match open_input_stream(device_name.as_deref(), tap.clone()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Either an explicit shutdown or the handle being dropped ends the stream.
                let _ = shutdown_rx.recv();
                drop(stream);
                tap.clear();
                info!("🎤 Microphone released");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.worker = Some(MicWorker {
                    shutdown_tx,
                    handle,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(VoiceError::ThreadGone(
                "microphone thread exited before reporting".to_string(),
            )),
        }
    }

    fn release(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(());
            if worker.handle.join().is_err() {
                warn!("microphone thread panicked during shutdown");
            }
        }
    }

    fn is_live(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_input_stream(device_name: Option<&str>, tap: InputTap) -> VoiceResult<Stream> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .input_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::AudioDevice(format!("Input device not found: {}", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?,
    };
    info!(
        "📱 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let config = device.default_input_config()?;
    let sample_rate = config.sample_rate().0;
    let channels = config.channels() as usize;
    let stream_config: StreamConfig = config.clone().into();

    let stream = match config.sample_format() {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                tap.push(&to_mono_16k(data, channels, sample_rate));
            },
            move |err| warn!("Audio stream error: {}", err),
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let f32_samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                tap.push(&to_mono_16k(&f32_samples, channels, sample_rate));
            },
            move |err| warn!("Audio stream error: {}", err),
            None,
        )?,
        other => {
            return Err(VoiceError::AudioStream(format!(
                "Unsupported sample format {:?} (need F32 or I16)",
                other
            )))
        }
    };
    stream.play()?;
    info!(
        "✅ Audio capture started ({} Hz x{} → mono {} Hz)",
        sample_rate, channels, TAP_SAMPLE_RATE
    );
    Ok(stream)
}

/// Convert interleaved multi-channel audio at any rate to mono 16 kHz (nearest sample).
pub fn to_mono_16k(samples: &[f32], channels: usize, from_rate: u32) -> Vec<f32> {
    if channels == 0 || samples.is_empty() || from_rate == 0 {
        return Vec::new();
    }
    let mono: Vec<f32> = if channels == 1 {
        samples.to_vec()
    } else {
        samples
            .chunks_exact(channels)
            .map(|c| c.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    if from_rate == TAP_SAMPLE_RATE {
        return mono;
    }
    let out_len = (mono.len() as u64 * TAP_SAMPLE_RATE as u64 / from_rate as u64) as usize;
    (0..out_len)
        .map(|i| (i as f64 * from_rate as f64 / TAP_SAMPLE_RATE as f64) as usize)
        .take_while(|&src| src < mono.len())
        .map(|src| mono[src])
        .collect()
}
