//! In-process stand-ins for the host capabilities, used by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use voxchat_core::types::ChatRequest;

use crate::backend::ChatBackend;
use crate::display::{Display, Message, Sender, VoiceIndicator};
use crate::error::{BackendError, SynthesisError};
use crate::recognition::{EventSink, RecognitionEvent, Recognizer};
use crate::synthesis::{Synthesizer, Utterance, Voice};

/// Poll `cond` while letting (paused) time advance in 1ms steps.
pub async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached within 10s of test time");
}

// ─── Recognizer ────────────────────────────────────────────────────────────

/// Reports `Start` synchronously on `start()`; results are injected by the test.
#[derive(Default)]
pub struct FakeRecognizer {
    starts: AtomicUsize,
    stops: AtomicUsize,
    sink: Mutex<Option<EventSink<RecognitionEvent>>>,
}

impl FakeRecognizer {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: RecognitionEvent) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    /// A final transcript followed by the end of the session.
    pub fn hear(&self, transcript: &str) {
        self.emit(RecognitionEvent::Result(vec![vec![transcript.to_string()]]));
        self.emit(RecognitionEvent::End);
    }

    pub fn fail(&self, reason: &str) {
        self.emit(RecognitionEvent::Error(reason.to_string()));
        self.emit(RecognitionEvent::End);
    }
}

impl Recognizer for FakeRecognizer {
    fn start(&self, events: EventSink<RecognitionEvent>) {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.sink.lock().unwrap() = Some(events.clone());
        events(RecognitionEvent::Start);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.emit(RecognitionEvent::End);
    }
}

// ─── Synthesizer ───────────────────────────────────────────────────────────

/// Each utterance "plays" for a fixed latency unless cancelled.
pub struct FakeSynthesizer {
    voices: Vec<Voice>,
    latency: Duration,
    utterances: Mutex<Vec<Utterance>>,
    cancels: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    cancelled: Notify,
}

impl FakeSynthesizer {
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            voices: vec![
                Voice {
                    name: "Alex".into(),
                    locale: "en-US".into(),
                },
                Voice {
                    name: "Google US English".into(),
                    locale: "en-US".into(),
                },
            ],
            latency,
            utterances: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            cancelled: Notify::new(),
        }
    }

    pub fn without_voices() -> Self {
        Self {
            voices: Vec::new(),
            ..Self::with_latency(Duration::ZERO)
        }
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn spoken(&self) -> Vec<String> {
        self.utterances().into_iter().map(|u| u.text).collect()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    fn voices(&self) -> Vec<Voice> {
        self.voices.clone()
    }

    async fn speak(&self, utterance: Utterance) -> Result<(), SynthesisError> {
        self.utterances.lock().unwrap().push(utterance);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::select! {
            _ = tokio::time::sleep(self.latency) => {}
            _ = self.cancelled.notified() => {}
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_all(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
    }
}

// ─── Backend ───────────────────────────────────────────────────────────────

/// Answers from a script, after an optional latency. An exhausted script
/// answers with a network error.
pub struct FakeBackend {
    latency: Duration,
    script: Mutex<VecDeque<Result<String, BackendError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl FakeBackend {
    pub fn new(script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            latency: Duration::ZERO,
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError> {
        self.requests.lock().unwrap().push(request);
        tokio::time::sleep(self.latency).await;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Network("script exhausted".into())))
    }
}

// ─── Display ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    messages: Vec<Message>,
    working: Vec<bool>,
    voice: Vec<VoiceIndicator>,
}

/// Records everything rendered. Clones share the same record.
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingDisplay {
    pub fn texts(&self, sender: Sender) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.sender == sender)
            .map(|m| m.text.clone())
            .collect()
    }

    pub fn system(&self) -> Vec<String> {
        self.texts(Sender::System)
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().unwrap().messages.clone()
    }

    pub fn last_working(&self) -> Option<bool> {
        self.inner.lock().unwrap().working.last().copied()
    }

    pub fn last_voice(&self) -> Option<VoiceIndicator> {
        self.inner.lock().unwrap().voice.last().copied()
    }
}

impl Display for RecordingDisplay {
    fn append(&mut self, message: Message) {
        self.inner.lock().unwrap().messages.push(message);
    }

    fn working(&mut self, on: bool) {
        self.inner.lock().unwrap().working.push(on);
    }

    fn voice(&mut self, indicator: VoiceIndicator) {
        self.inner.lock().unwrap().voice.push(indicator);
    }
}
