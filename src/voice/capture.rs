//! Audio capture from microphone

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleFormat, SampleRate, SupportedStreamConfig};
use tokio::sync::oneshot;

use super::wav::{AudioBlob, TARGET_SAMPLE_RATE, WAV_MIME};
use crate::{Error, Result};

/// Gain applied to RMS so normal speech fills most of the meter
const LEVEL_GAIN: f32 = 4.0;

/// Everything recorded during one listening session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedAudio {
    pub chunks: Vec<Vec<u8>>,
    pub mime: String,
}

impl CapturedAudio {
    /// Concatenate the chunks into a single blob
    #[must_use]
    pub fn into_blob(self) -> AudioBlob {
        AudioBlob::new(self.chunks.concat(), self.mime)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(Vec::is_empty)
    }
}

/// Something that can start a recording
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the input device and start recording
    ///
    /// Fails with [`Error::Permission`] when access is denied and with
    /// [`Error::Environment`] when no usable device exists.
    async fn open(&self) -> Result<Box<dyn Recording>>;
}

/// An in-progress recording
#[async_trait]
pub trait Recording: Send {
    /// Current input level in `[0, 1]`
    fn level(&self) -> f32;

    /// Stop recording and hand back the captured audio
    async fn finish(self: Box<Self>) -> Result<CapturedAudio>;
}

/// Records from the default input device
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for
/// the duration of the recording.
#[derive(Debug, Default, Clone, Copy)]
pub struct MicrophoneSource;

impl MicrophoneSource {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn open(&self) -> Result<Box<dyn Recording>> {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let level = Arc::new(AtomicU32::new(0));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread = {
            let samples = Arc::clone(&samples);
            let level = Arc::clone(&level);
            std::thread::Builder::new()
                .name("emotive-capture".to_string())
                .spawn(move || run_capture(&samples, &level, ready_tx, &stop_rx))?
        };

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited before starting".to_string()))??;

        tracing::debug!(sample_rate, channels, "audio capture started");

        Ok(Box::new(MicrophoneRecording {
            samples,
            level,
            sample_rate,
            channels,
            stop: stop_tx,
            thread: Some(thread),
        }))
    }
}

/// Capture thread body: open, report readiness, record until told to stop
fn run_capture(
    samples: &Arc<Mutex<Vec<f32>>>,
    level: &Arc<AtomicU32>,
    ready: oneshot::Sender<Result<(u32, u16)>>,
    stop: &std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_stream(samples, level) {
        Ok((stream, config)) => {
            if let Err(e) = stream.play() {
                let _ = ready.send(Err(Error::Audio(e.to_string())));
                return;
            }
            let _ = ready.send(Ok((config.sample_rate().0, config.channels())));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Sender dropped or signalled: either way the recording is over
    let _ = stop.recv();
    drop(stream);
    tracing::debug!("audio capture stopped");
}

fn build_stream(
    samples: &Arc<Mutex<Vec<f32>>>,
    level: &Arc<AtomicU32>,
) -> Result<(cpal::Stream, SupportedStreamConfig)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Environment("no input device available".to_string()))?;

    let config = preferred_config(&device)?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = config.sample_rate().0,
        channels = config.channels(),
        format = ?config.sample_format(),
        "audio capture initialized"
    );

    let stream_config = config.config();
    let on_error = |err| tracing::error!(error = %err, "audio capture error");

    let stream = match config.sample_format() {
        SampleFormat::F32 => {
            let samples = Arc::clone(samples);
            let level = Arc::clone(level);
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    record(&samples, &level, data.iter().copied());
                },
                on_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let samples = Arc::clone(samples);
            let level = Arc::clone(level);
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    record(
                        &samples,
                        &level,
                        data.iter().map(|&s| f32::from(s) / 32768.0),
                    );
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
        }
    }
    .map_err(map_build_error)?;

    Ok((stream, config))
}

/// Prefer 16 kHz mono, otherwise whatever the device defaults to
fn preferred_config(device: &cpal::Device) -> Result<SupportedStreamConfig> {
    let speech = device.supported_input_configs().ok().and_then(|mut configs| {
        configs.find(|c| {
            c.channels() == 1
                && matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16)
                && c.min_sample_rate() <= SampleRate(TARGET_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(TARGET_SAMPLE_RATE)
        })
    });

    if let Some(range) = speech {
        return Ok(range.with_sample_rate(SampleRate(TARGET_SAMPLE_RATE)));
    }

    device
        .default_input_config()
        .map_err(|e| Error::Environment(format!("no usable input config: {e}")))
}

fn map_build_error(e: BuildStreamError) -> Error {
    match e {
        BuildStreamError::DeviceNotAvailable => {
            Error::Environment("input device is not available".to_string())
        }
        BuildStreamError::BackendSpecific { err } => {
            let lower = err.description.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                Error::Permission(err.description)
            } else {
                Error::Audio(err.description)
            }
        }
        other => Error::Audio(other.to_string()),
    }
}

fn record(samples: &Mutex<Vec<f32>>, level: &AtomicU32, data: impl Iterator<Item = f32>) {
    let Ok(mut buf) = samples.lock() else {
        return;
    };
    let start = buf.len();
    buf.extend(data);
    level.store(input_level(&buf[start..]).to_bits(), Ordering::Relaxed);
}

/// Scaled RMS of a block of samples, clamped to `[0, 1]`
#[must_use]
pub fn input_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rms = (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt();
    (rms * LEVEL_GAIN).clamp(0.0, 1.0)
}

/// Write interleaved float samples as a WAV container at the native rate
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

struct MicrophoneRecording {
    samples: Arc<Mutex<Vec<f32>>>,
    level: Arc<AtomicU32>,
    sample_rate: u32,
    channels: u16,
    stop: std::sync::mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

#[async_trait]
impl Recording for MicrophoneRecording {
    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    async fn finish(mut self: Box<Self>) -> Result<CapturedAudio> {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| Error::Audio(e.to_string()))?
                .map_err(|_| Error::Audio("capture thread panicked".to_string()))?;
        }

        let samples = self
            .samples
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        tracing::debug!(samples = samples.len(), "recording finished");

        if samples.is_empty() {
            return Ok(CapturedAudio {
                chunks: Vec::new(),
                mime: WAV_MIME.to_string(),
            });
        }

        let wav = samples_to_wav(&samples, self.sample_rate, self.channels)?;
        Ok(CapturedAudio {
            chunks: vec![wav],
            mime: WAV_MIME.to_string(),
        })
    }
}

impl Drop for MicrophoneRecording {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_concatenate_in_order() {
        let audio = CapturedAudio {
            chunks: vec![vec![1, 2], vec![], vec![3]],
            mime: "audio/webm".to_string(),
        };
        assert!(!audio.is_empty());

        let blob = audio.into_blob();
        assert_eq!(blob.bytes, vec![1, 2, 3]);
        assert_eq!(blob.mime, "audio/webm");
    }

    #[test]
    fn level_is_clamped() {
        assert!(input_level(&[]).abs() < f32::EPSILON);
        assert!(input_level(&[0.0; 64]).abs() < f32::EPSILON);
        assert!((input_level(&[1.0; 64]) - 1.0).abs() < f32::EPSILON);

        let quiet = input_level(&[0.05; 64]);
        assert!(quiet > 0.0 && quiet < 1.0);
    }

    #[test]
    fn float_wav_keeps_native_rate() {
        let wav = samples_to_wav(&[0.0, 0.25, -0.25, 0.5], 48_000, 2).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.channels, 2);
        assert_eq!(reader.len(), 4);
    }
}
