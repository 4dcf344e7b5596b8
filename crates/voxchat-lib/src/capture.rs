//! Microphone capture using cpal.
//!
//! Delivers 16 kHz mono i16 chunks whatever the device's native format,
//! rate, or channel count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use voxchat_core::wav::SAMPLE_RATE;

use crate::error::RecognitionError;

/// Samples returned by [`AudioCapture::read_chunk`]: 100 ms at 16 kHz.
pub const CHUNK_SAMPLES: usize = 1_600;

/// Check that a default input device exists and reports a usable config.
pub fn check_input_device() -> Result<(), RecognitionError> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or(RecognitionError::NoInputDevice)?;
    device
        .default_input_config()
        .map_err(|e| RecognitionError::Capture(e.to_string()))?;
    Ok(())
}

pub struct AudioCapture {
    rx: mpsc::UnboundedReceiver<Vec<i16>>,
    buf: Vec<i16>,
    stop: Arc<AtomicBool>,
    thread: std::thread::Thread,
}

impl AudioCapture {
    /// Open the default input device and start capturing. Resolves once the
    /// stream is playing or has failed to start.
    pub async fn open() -> Result<Self, RecognitionError> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or(RecognitionError::NoInputDevice)?;
        let supported = device
            .default_input_config()
            .map_err(|e| RecognitionError::Capture(e.to_string()))?;

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let (tx, rx) = mpsc::unbounded_channel::<Vec<i16>>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        // cpal Stream is !Send on macOS, so it lives on its own OS thread.
        let thread = std::thread::Builder::new()
            .name("voxchat-capture".into())
            .spawn(move || {
                let input = Input {
                    channels,
                    native_rate,
                    tx,
                    stop: thread_stop.clone(),
                };
                let stream = match sample_format {
                    SampleFormat::I16 => build_stream::<i16>(&device, &config, input),
                    SampleFormat::U16 => build_stream::<u16>(&device, &config, input),
                    SampleFormat::F32 => build_stream::<f32>(&device, &config, input),
                    other => Err(format!("unsupported sample format: {other:?}")),
                };
                let started = stream.and_then(|s| match s.play() {
                    Ok(()) => Ok(s),
                    Err(e) => Err(e.to_string()),
                });
                let stream = match started {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                debug!("capture: {native_rate} Hz x{channels} ({sample_format:?})");

                while !thread_stop.load(Ordering::Relaxed) {
                    std::thread::park();
                }
                drop(stream);
            })
            .map_err(|e| RecognitionError::Capture(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                rx,
                buf: Vec::new(),
                stop,
                thread: thread.thread().clone(),
            }),
            Ok(Err(e)) => Err(RecognitionError::Capture(e)),
            Err(_) => Err(RecognitionError::Capture("capture thread exited".into())),
        }
    }

    /// Read exactly [`CHUNK_SAMPLES`] samples.
    pub async fn read_chunk(&mut self) -> Result<Vec<i16>, RecognitionError> {
        while self.buf.len() < CHUNK_SAMPLES {
            match self.rx.recv().await {
                Some(samples) => self.buf.extend_from_slice(&samples),
                None => return Err(RecognitionError::Capture("capture stream ended".into())),
            }
        }
        Ok(self.buf.drain(..CHUNK_SAMPLES).collect())
    }
}

/// Signals the capture thread and returns without joining it; the thread
/// drops the stream on its own.
impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        self.thread.unpark();
    }
}

struct Input {
    channels: u16,
    native_rate: u32,
    tx: mpsc::UnboundedSender<Vec<i16>>,
    stop: Arc<AtomicBool>,
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    input: Input,
) -> Result<cpal::Stream, String>
where
    T: SizedSample,
    i16: cpal::FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if input.stop.load(Ordering::Relaxed) {
                    return;
                }
                let pcm: Vec<i16> = data.iter().map(|&s| s.to_sample::<i16>()).collect();
                let mono = mix_to_mono(&pcm, input.channels);
                let _ = input.tx.send(resample_linear(&mono, input.native_rate, SAMPLE_RATE));
            },
            |err| warn!("capture: stream error: {err}"),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Average interleaved frames down to one channel.
fn mix_to_mono(input: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return input.to_vec();
    }
    input
        .chunks_exact(usize::from(channels))
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            (sum / i32::from(channels)) as i16
        })
        .collect()
}

/// Linear-interpolation resampler. Good enough for speech.
fn resample_linear(input: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || input.is_empty() {
        return input.to_vec();
    }
    let step = f64::from(from_rate) / f64::from(to_rate);
    let len = (input.len() as f64 / step) as usize;
    (0..len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = pos as usize;
            let s0 = f64::from(input[idx]);
            let s1 = input.get(idx + 1).map_or(s0, |&s| f64::from(s));
            (s0 + (pos - idx as f64) * (s1 - s0)) as i16
        })
        .collect()
}
