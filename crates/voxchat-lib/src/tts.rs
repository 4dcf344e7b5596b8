//! Kokoro synthesizer: one HTTP request per utterance, rodio playback.
//!
//! ```text
//! speak(utterance) → POST Kokoro (pcm stream) → collect samples
//!     → [play_tx] → playback thread: sink.append → done when sink drains
//! ```
//!
//! Epoch-based cancellation: `cancel_all()` bumps an [`AtomicU64`] and clears
//! the sink. An in-flight fetch of an older epoch is dropped, and a playing
//! utterance resolves as soon as the sink is cleared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, Sink};
use tokio::sync::oneshot;
use tracing::{debug, error};

use voxchat_core::types::KokoroConfig;

use crate::error::SynthesisError;
use crate::synthesis::{Synthesizer, Utterance, Voice};

/// Kokoro PCM streaming format: 24 kHz mono 16-bit signed LE.
const PCM_SAMPLE_RATE: u32 = 24_000;
const PCM_CHANNELS: u16 = 1;

/// How often the playback thread checks whether the sink has drained.
const DRAIN_POLL: Duration = Duration::from_millis(20);

enum PlayCmd {
    Play {
        samples: Vec<i16>,
        done: oneshot::Sender<()>,
    },
    Stop,
}

pub struct KokoroSynthesizer {
    config: KokoroConfig,
    client: reqwest::Client,
    play_tx: std::sync::mpsc::Sender<PlayCmd>,
    epoch: Arc<AtomicU64>,
}

impl KokoroSynthesizer {
    /// Open the default audio output. Fails when there is none.
    pub fn new(config: KokoroConfig) -> Result<Self, SynthesisError> {
        let (play_tx, play_rx) = std::sync::mpsc::channel::<PlayCmd>();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);

        // rodio OutputStream is !Send, so playback owns its own OS thread.
        std::thread::Builder::new()
            .name("voxchat-playback".into())
            .spawn(move || playback_thread(play_rx, ready_tx))
            .map_err(|e| SynthesisError::Output(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                config,
                client: reqwest::Client::new(),
                play_tx,
                epoch: Arc::new(AtomicU64::new(0)),
            }),
            Ok(Err(e)) => Err(SynthesisError::Output(e)),
            Err(_) => Err(SynthesisError::PlaybackClosed),
        }
    }

    async fn fetch(&self, utterance: &Utterance, epoch: u64) -> Result<Option<Vec<i16>>, SynthesisError> {
        let url = format!("{}/v1/audio/speech", self.config.url.trim_end_matches('/'));
        let body = request_body(&self.config, utterance);

        debug!("kokoro: POST {} chars", utterance.text.len());
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SynthesisError::Server {
                status: status.as_u16(),
                body: resp.text().await.unwrap_or_default(),
            });
        }

        let mut stream = resp.bytes_stream();
        let mut leftover: Option<u8> = None;
        let mut samples: Vec<i16> = Vec::new();
        while let Some(chunk) = stream.next().await {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Ok(None);
            }
            let (decoded, lo) = bytes_to_i16(&chunk?, leftover.take());
            samples.extend(decoded);
            leftover = lo;
        }
        Ok(Some(samples))
    }
}

#[async_trait]
impl Synthesizer for KokoroSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        vec![Voice {
            name: format!("Kokoro {}", self.config.voice),
            locale: "en-US".into(),
        }]
    }

    async fn speak(&self, utterance: Utterance) -> Result<(), SynthesisError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let Some(mut samples) = self.fetch(&utterance, epoch).await? else {
            debug!("kokoro: stale fetch dropped");
            return Ok(());
        };
        if samples.is_empty() || self.epoch.load(Ordering::SeqCst) != epoch {
            return Ok(());
        }

        apply_volume(&mut samples, utterance.volume);
        let (done_tx, done_rx) = oneshot::channel();
        self.play_tx
            .send(PlayCmd::Play {
                samples,
                done: done_tx,
            })
            .map_err(|_| SynthesisError::PlaybackClosed)?;

        // A dropped sender means the sink was stopped.
        let _ = done_rx.await;
        Ok(())
    }

    fn cancel_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let _ = self.play_tx.send(PlayCmd::Stop);
    }
}

/// Kokoro has no pitch control; rate is folded into its speed.
fn request_body(config: &KokoroConfig, utterance: &Utterance) -> serde_json::Value {
    serde_json::json!({
        "input": utterance.text,
        "voice": config.voice,
        "model": "kokoro",
        "response_format": "pcm",
        "stream": true,
        "speed": config.speed * utterance.rate,
    })
}

fn apply_volume(samples: &mut [i16], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    let gain = volume.clamp(0.0, 1.0);
    for s in samples.iter_mut() {
        *s = (f32::from(*s) * gain) as i16;
    }
}

/// Decode little-endian i16 PCM, carrying an odd trailing byte into the
/// next chunk.
fn bytes_to_i16(bytes: &[u8], leftover: Option<u8>) -> (Vec<i16>, Option<u8>) {
    let joined;
    let slice = match leftover {
        Some(lo) => {
            joined = std::iter::once(lo).chain(bytes.iter().copied()).collect::<Vec<u8>>();
            &joined[..]
        }
        None => bytes,
    };

    let pairs = slice.chunks_exact(2);
    let remainder = pairs.remainder().first().copied();
    let samples = pairs.map(|p| i16::from_le_bytes([p[0], p[1]])).collect();
    (samples, remainder)
}

// ─── Playback OS thread ───────────────────────────────────────────────────

fn playback_thread(
    cmd_rx: std::sync::mpsc::Receiver<PlayCmd>,
    ready_tx: std::sync::mpsc::SyncSender<Result<(), String>>,
) {
    let opened = OutputStream::try_default()
        .map_err(|e| e.to_string())
        .and_then(|(stream, handle)| {
            Sink::try_new(&handle)
                .map(|sink| (stream, handle, sink))
                .map_err(|e| e.to_string())
        });
    let (_stream, handle, mut sink) = match opened {
        Ok(parts) => {
            let _ = ready_tx.send(Ok(()));
            parts
        }
        Err(e) => {
            error!("playback: failed to open audio output: {e}");
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let mut waiting: Vec<oneshot::Sender<()>> = Vec::new();
    loop {
        match cmd_rx.recv_timeout(DRAIN_POLL) {
            Ok(PlayCmd::Play { samples, done }) => {
                sink.append(SamplesBuffer::new(PCM_CHANNELS, PCM_SAMPLE_RATE, samples));
                waiting.push(done);
            }
            Ok(PlayCmd::Stop) => {
                sink.stop();
                waiting.clear();
                sink = match Sink::try_new(&handle) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("playback: failed to recreate sink: {e}");
                        break;
                    }
                };
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                sink.stop();
                break;
            }
        }

        if sink.empty() {
            for done in waiting.drain(..) {
                let _ = done.send(());
            }
        }
    }
}
