//! Whisper recognizer: microphone VAD session, then one transcription request.
//!
//! Each `start()` opens a session that emits `Start`, listens until the
//! speaker pauses, posts the captured WAV to a local Whisper server, and emits
//! `Result` or `Error`. Every session ends with exactly one `End`, including
//! sessions cut short by `stop()`. A session superseded by a newer `start()`
//! goes silent instead, so its late `End` cannot close the newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxchat_core::types::WhisperConfig;
use voxchat_core::wav::{compute_rms, duration_ms, write_wav, SAMPLE_RATE};

use crate::capture::{self, AudioCapture, CHUNK_SAMPLES};
use crate::error::RecognitionError;
use crate::recognition::{EventSink, RecognitionEvent, Recognizer};

/// Error code reported when a session heard nothing worth transcribing.
pub const NO_SPEECH: &str = "no-speech";

const READ_TIMEOUT: Duration = Duration::from_millis(500);

// ─── Voice activity detection ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadStep {
    /// Keep reading. `keep` says whether this chunk belongs to the utterance.
    Continue { keep: bool },
    /// The speaker paused (or the capture cap was hit); transcribe.
    Done,
    /// Nothing loud enough was heard before the timeout.
    NoSpeech,
}

/// Energy-based endpointing, clocked by audio time rather than wall time.
#[derive(Debug)]
pub struct Vad {
    threshold: f32,
    min_speech: u64,
    trailing_silence: u64,
    no_speech_timeout: u64,
    max_capture: u64,
    elapsed: u64,
    speech_ms: Option<u64>,
    silence_ms: u64,
}

impl Vad {
    pub fn new(config: &WhisperConfig) -> Self {
        Self {
            threshold: config.silence_threshold,
            min_speech: config.min_speech.as_millis() as u64,
            trailing_silence: config.trailing_silence.as_millis() as u64,
            no_speech_timeout: config.no_speech_timeout.as_millis() as u64,
            max_capture: config.max_capture.as_millis() as u64,
            elapsed: 0,
            speech_ms: None,
            silence_ms: 0,
        }
    }

    /// Feed the RMS level of one chunk lasting `chunk_ms`.
    pub fn feed(&mut self, rms: f32, chunk_ms: u64) -> VadStep {
        self.elapsed += chunk_ms;

        let keep = if rms > self.threshold {
            self.silence_ms = 0;
            *self.speech_ms.get_or_insert(0) += chunk_ms;
            true
        } else if let Some(speech) = self.speech_ms {
            if speech >= self.min_speech {
                self.silence_ms += chunk_ms;
                if self.silence_ms >= self.trailing_silence {
                    return VadStep::Done;
                }
            }
            true
        } else {
            false
        };

        match self.speech_ms {
            None if self.elapsed >= self.no_speech_timeout => VadStep::NoSpeech,
            Some(_) if self.elapsed >= self.max_capture => VadStep::Done,
            _ => VadStep::Continue { keep },
        }
    }
}

// ─── Recognizer ────────────────────────────────────────────────────────────

/// Microphone + local Whisper server (`POST {url}/v1/audio/transcriptions`).
pub struct WhisperRecognizer {
    config: WhisperConfig,
    client: reqwest::Client,
    session: Mutex<Option<CancellationToken>>,
    /// Id of the most recently started session.
    current: Arc<AtomicU64>,
}

impl WhisperRecognizer {
    /// Fails when there is no usable input device.
    pub fn new(config: WhisperConfig) -> Result<Self, RecognitionError> {
        capture::check_input_device()?;
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            session: Mutex::new(None),
            current: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl Recognizer for WhisperRecognizer {
    fn start(&self, events: EventSink<RecognitionEvent>) {
        let token = CancellationToken::new();
        if let Some(previous) = self
            .session
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(token.clone())
        {
            previous.cancel();
        }

        let events = SessionEvents {
            id: self.current.fetch_add(1, Ordering::SeqCst) + 1,
            current: self.current.clone(),
            sink: events,
        };
        let config = self.config.clone();
        let client = self.client.clone();
        tokio::spawn(async move {
            events.emit(RecognitionEvent::Start);
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                r = session(&config, &client) => Some(r),
            };
            match outcome {
                None => debug!("stt: session stopped"),
                Some(Ok(text)) => {
                    info!("stt: heard {} chars", text.len());
                    events.emit(RecognitionEvent::Result(vec![vec![text]]));
                }
                Some(Err(SessionError::NoSpeech)) => {
                    events.emit(RecognitionEvent::Error(NO_SPEECH.to_string()));
                }
                Some(Err(SessionError::Failed(e))) => {
                    warn!("stt: {e}");
                    events.emit(RecognitionEvent::Error(e.to_string()));
                }
            }
            events.emit(RecognitionEvent::End);
        });
    }

    fn stop(&self) {
        if let Some(token) = self.session.lock().unwrap_or_else(|e| e.into_inner()).take() {
            token.cancel();
        }
    }
}

/// Event sink for one session; drops events once a newer session exists.
struct SessionEvents {
    id: u64,
    current: Arc<AtomicU64>,
    sink: EventSink<RecognitionEvent>,
}

impl SessionEvents {
    fn emit(&self, event: RecognitionEvent) {
        if self.current.load(Ordering::SeqCst) == self.id {
            (self.sink)(event);
        } else {
            debug!("stt: dropping {event:?} from superseded session {}", self.id);
        }
    }
}

enum SessionError {
    NoSpeech,
    Failed(RecognitionError),
}

impl From<RecognitionError> for SessionError {
    fn from(e: RecognitionError) -> Self {
        SessionError::Failed(e)
    }
}

async fn session(config: &WhisperConfig, client: &reqwest::Client) -> Result<String, SessionError> {
    let samples = listen(config).await?;
    let wav = write_wav(&samples, SAMPLE_RATE);
    debug!("stt: transcribing {} ms", duration_ms(samples.len()));
    let text = transcribe(client, config, wav).await?;
    if text.is_empty() {
        return Err(SessionError::NoSpeech);
    }
    Ok(text)
}

/// Capture until the VAD ends the utterance. Returns the kept samples.
async fn listen(config: &WhisperConfig) -> Result<Vec<i16>, SessionError> {
    let mut capture = AudioCapture::open().await?;
    let mut vad = Vad::new(config);
    let mut audio: Vec<i16> = Vec::new();
    let chunk_ms = duration_ms(CHUNK_SAMPLES);

    loop {
        let chunk = match tokio::time::timeout(READ_TIMEOUT, capture.read_chunk()).await {
            Ok(Ok(chunk)) => chunk,
            Ok(Err(e)) if audio.is_empty() => return Err(e.into()),
            Ok(Err(_)) => break,
            Err(_) => return Err(RecognitionError::Capture("read timeout".into()).into()),
        };

        match vad.feed(compute_rms(&chunk), chunk_ms) {
            VadStep::Continue { keep } => {
                if keep {
                    audio.extend_from_slice(&chunk);
                }
            }
            VadStep::Done => break,
            VadStep::NoSpeech => return Err(SessionError::NoSpeech),
        }
    }

    if audio.is_empty() {
        return Err(SessionError::NoSpeech);
    }
    Ok(audio)
}

async fn transcribe(
    client: &reqwest::Client,
    config: &WhisperConfig,
    wav: Vec<u8>,
) -> Result<String, RecognitionError> {
    let part = reqwest::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")?;
    let form = reqwest::multipart::Form::new()
        .part("file", part)
        .text("model", config.model.clone())
        .text("language", "en")
        .text("response_format", "json");

    let resp = client
        .post(format!("{}/v1/audio/transcriptions", config.url.trim_end_matches('/')))
        .multipart(form)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(RecognitionError::Server {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        });
    }

    let body: serde_json::Value = resp.json().await?;
    Ok(clean_transcript(body.get("text").and_then(|v| v.as_str()).unwrap_or("")))
}

fn clean_transcript(raw: &str) -> String {
    raw.replace("[BLANK_AUDIO]", "").trim().to_string()
}
