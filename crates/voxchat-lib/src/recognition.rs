//! Speech input: wraps a recognition engine's start/result/error/end
//! lifecycle into a start/stop contract.
//!
//! The engine reports through an [`EventSink`]; the owner feeds those events
//! back into [`SpeechInput::handle`], which updates the listening state and
//! returns the [`InputNotice`] to act on. Recognition errors in auto-retry
//! mode schedule a cancellable restart that arrives as
//! [`InputEvent::RetryDue`] on the same sink.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Callback used by capabilities to deliver events.
pub type EventSink<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Raw lifecycle event from a recognition engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Start,
    /// Recognized segments, each a list of transcript alternatives.
    Result(Vec<Vec<String>>),
    Error(String),
    End,
}

/// Host speech-to-text capability.
pub trait Recognizer: Send + Sync {
    /// Begin a recognition session. Events for it go to `events`.
    fn start(&self, events: EventSink<RecognitionEvent>);

    /// Request the active session to end. It still reports `End`.
    fn stop(&self);
}

/// Everything the driver's owner must route back into [`SpeechInput::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Engine(RecognitionEvent),
    RetryDue,
}

/// What the driver reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputNotice {
    Listening,
    Result(String),
    Error(String),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenState {
    Idle,
    Listening,
}

pub struct SpeechInput {
    engine: Option<Arc<dyn Recognizer>>,
    events: EventSink<InputEvent>,
    state: ListenState,
    /// `start()` was issued and the engine has not reported back yet.
    starting: bool,
    auto_retry: bool,
    retry_delay: Duration,
    retry: Option<CancellationToken>,
}

impl SpeechInput {
    /// `engine` is `None` when the host has no recognition support; the
    /// driver is then permanently disabled.
    pub fn new(
        engine: Option<Arc<dyn Recognizer>>,
        events: EventSink<InputEvent>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            engine,
            events,
            state: ListenState::Idle,
            starting: false,
            auto_retry: false,
            retry_delay,
            retry: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    pub fn state(&self) -> ListenState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == ListenState::Listening
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// In auto-retry mode a recognition error schedules a restart.
    /// Leaving the mode drops any pending restart.
    pub fn set_auto_retry(&mut self, on: bool) {
        self.auto_retry = on;
        if !on {
            self.cancel_retry();
        }
    }

    /// No-op when disabled, already listening, or a start is in progress.
    pub fn start(&mut self) {
        let Some(engine) = &self.engine else {
            return;
        };
        if self.state == ListenState::Listening || self.starting {
            return;
        }

        debug!("input: starting recognition");
        self.starting = true;
        let events = self.events.clone();
        engine.start(Arc::new(move |event| events(InputEvent::Engine(event))));
    }

    /// No-op unless a session is active or starting.
    pub fn stop(&mut self) {
        let Some(engine) = &self.engine else {
            return;
        };
        if self.state == ListenState::Idle && !self.starting {
            return;
        }

        debug!("input: stopping recognition");
        engine.stop();
    }

    pub fn handle(&mut self, event: InputEvent) -> Option<InputNotice> {
        match event {
            InputEvent::Engine(RecognitionEvent::Start) => {
                self.starting = false;
                self.state = ListenState::Listening;
                Some(InputNotice::Listening)
            }
            InputEvent::Engine(RecognitionEvent::Result(segments)) => {
                self.starting = false;
                self.state = ListenState::Idle;
                let transcript = segments.into_iter().next()?.into_iter().next()?;
                Some(InputNotice::Result(transcript))
            }
            InputEvent::Engine(RecognitionEvent::Error(reason)) => {
                self.starting = false;
                self.state = ListenState::Idle;
                warn!("input: recognition error: {reason}");
                if self.auto_retry {
                    self.schedule_retry();
                }
                Some(InputNotice::Error(reason))
            }
            InputEvent::Engine(RecognitionEvent::End) => {
                self.starting = false;
                self.state = ListenState::Idle;
                Some(InputNotice::End)
            }
            InputEvent::RetryDue => {
                self.retry = None;
                if self.auto_retry {
                    debug!("input: retrying recognition");
                    self.start();
                }
                None
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.cancel_retry();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let events = self.events.clone();
        let delay = self.retry_delay;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => events(InputEvent::RetryDue),
            }
        });
        self.retry = Some(token);
    }

    fn cancel_retry(&mut self) {
        if let Some(token) = self.retry.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRecognizer;
    use std::sync::Mutex;

    struct Harness {
        engine: Arc<FakeRecognizer>,
        events: Arc<Mutex<Vec<InputEvent>>>,
        input: SpeechInput,
    }

    impl Harness {
        fn new() -> Self {
            let engine = Arc::new(FakeRecognizer::default());
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            let input = SpeechInput::new(
                Some(engine.clone()),
                Arc::new(move |e| sink.lock().unwrap().push(e)),
                Duration::from_millis(1000),
            );
            Self {
                engine,
                events,
                input,
            }
        }

        /// Feed every queued event back into the driver.
        fn pump(&mut self) -> Vec<InputNotice> {
            let queued: Vec<InputEvent> = self.events.lock().unwrap().drain(..).collect();
            queued
                .into_iter()
                .filter_map(|e| self.input.handle(e))
                .collect()
        }
    }

    #[tokio::test]
    async fn start_transitions_to_listening() {
        let mut h = Harness::new();
        h.input.start();
        assert_eq!(h.pump(), vec![InputNotice::Listening]);
        assert_eq!(h.input.state(), ListenState::Listening);
    }

    #[tokio::test]
    async fn start_while_listening_is_a_no_op() {
        let mut h = Harness::new();
        h.input.start();
        h.input.start();
        h.pump();
        h.input.start();
        assert_eq!(h.engine.starts(), 1);
    }

    #[tokio::test]
    async fn stop_when_idle_is_a_no_op() {
        let mut h = Harness::new();
        h.input.stop();
        assert_eq!(h.engine.stops(), 0);
        assert!(h.pump().is_empty());
        assert_eq!(h.input.state(), ListenState::Idle);
    }

    #[tokio::test]
    async fn stop_while_listening_ends_session() {
        let mut h = Harness::new();
        h.input.start();
        h.pump();
        h.input.stop();
        assert_eq!(h.engine.stops(), 1);
        assert_eq!(h.pump(), vec![InputNotice::End]);
        assert!(!h.input.is_listening());
    }

    #[tokio::test]
    async fn result_delivers_first_alternative_of_first_segment() {
        let mut h = Harness::new();
        h.input.start();
        h.pump();
        h.engine.emit(RecognitionEvent::Result(vec![
            vec!["hello there".into(), "hello bear".into()],
            vec!["second".into()],
        ]));
        assert_eq!(h.pump(), vec![InputNotice::Result("hello there".into())]);
        assert_eq!(h.input.state(), ListenState::Idle);
    }

    #[tokio::test]
    async fn empty_result_yields_no_transcript() {
        let mut h = Harness::new();
        h.input.start();
        h.pump();
        h.engine.emit(RecognitionEvent::Result(vec![]));
        assert!(h.pump().is_empty());
        assert_eq!(h.input.state(), ListenState::Idle);
    }

    #[tokio::test]
    async fn disabled_driver_never_starts() {
        let events: EventSink<InputEvent> = Arc::new(|_| {});
        let mut input = SpeechInput::new(None, events, Duration::from_millis(1000));
        input.start();
        input.stop();
        assert!(!input.is_available());
        assert_eq!(input.state(), ListenState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn error_in_auto_retry_mode_restarts_after_delay() {
        let mut h = Harness::new();
        h.input.set_auto_retry(true);
        h.input.start();
        h.pump();
        h.engine.emit(RecognitionEvent::Error("no-speech".into()));
        assert_eq!(h.pump(), vec![InputNotice::Error("no-speech".into())]);
        assert!(h.input.retry_pending());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(h.pump().is_empty());
        assert_eq!(h.engine.starts(), 1);

        tokio::time::sleep(Duration::from_millis(2)).await;
        h.pump();
        assert_eq!(h.engine.starts(), 2);
        assert!(!h.input.retry_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn error_without_auto_retry_stays_idle() {
        let mut h = Harness::new();
        h.input.start();
        h.pump();
        h.engine.emit(RecognitionEvent::Error("aborted".into()));
        h.pump();
        tokio::time::sleep(Duration::from_secs(5)).await;
        h.pump();
        assert_eq!(h.engine.starts(), 1);
        assert!(!h.input.retry_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_auto_retry_cancels_pending_restart() {
        let mut h = Harness::new();
        h.input.set_auto_retry(true);
        h.input.start();
        h.pump();
        h.engine.emit(RecognitionEvent::Error("network".into()));
        h.pump();
        h.input.set_auto_retry(false);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(h.pump().is_empty());
        assert_eq!(h.engine.starts(), 1);
    }
}
