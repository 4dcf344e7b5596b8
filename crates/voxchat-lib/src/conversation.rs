//! Turn orchestrator: one conversational turn at a time, interruptible.
//!
//! ```text
//!            toggle_voice / re-arm            result / submit
//!   Idle ─────────────────────▶ AwaitingInput ─────────────────▶ Processing
//!    ▲                               ▲                               │
//!    │ done (manual)                 │ done (auto, after delay)      │ reply
//!    └──────────── Speaking ◀────────┴───────────────────────────────┘
//! ```
//!
//! The orchestrator is a single tokio task that owns all conversation state
//! and consumes one event queue, so every handler runs to completion before
//! the next event. Recognition events, backend replies, speech completion and
//! re-arm timers all come back through that queue. [`Conversation`] is the
//! cloneable handle the UI talks to.
//!
//! `stop()` cancels speech and any pending re-arm or recognition retry. It
//! does not cancel a backend call in flight: a reply that lands after a stop
//! is still recorded and rendered, but never spoken and never re-arms input.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxchat_core::store::ConversationStore;
use voxchat_core::types::{
    ChatRequest, ConversationConfig, ConversationStatus, Phase, SpeechConfig, Turn,
    MSG_LISTENING, MSG_MISSING_KEY, MSG_NETWORK_ERROR, MSG_RECOGNITION_ERROR,
    MSG_RECOGNITION_UNSUPPORTED,
};

use crate::backend::ChatBackend;
use crate::display::{Display, Message, Sender, VoiceIndicator};
use crate::error::BackendError;
use crate::recognition::{InputEvent, InputNotice, Recognizer, SpeechInput};
use crate::synthesis::{SpeechOutput, Synthesizer};

/// Capabilities and settings for a conversation session.
pub struct Parts {
    pub backend: Arc<dyn ChatBackend>,
    /// `None` when the host has no speech recognition.
    pub recognizer: Option<Arc<dyn Recognizer>>,
    /// `None` when the host has no speech synthesis.
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    pub display: Box<dyn Display>,
    pub config: ConversationConfig,
    pub speech: SpeechConfig,
}

/// Cloneable handle to a running conversation. All methods are non-blocking.
#[derive(Clone)]
pub struct Conversation {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    status_rx: watch::Receiver<ConversationStatus>,
}

// ─── Internal types ────────────────────────────────────────────────────────

enum Cmd {
    SetCredential(String),
    Submit(String),
    ToggleVoice,
    Stop,
    Turns(oneshot::Sender<Vec<Turn>>),
}

type TurnId = u64;

enum Event {
    Input(InputEvent),
    Reply {
        turn: TurnId,
        result: Result<String, BackendError>,
    },
    SpeechDone {
        turn: TurnId,
    },
    Rearm,
}

/// Where a message to process came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Typed,
    Voice,
}

// ─── Handle ────────────────────────────────────────────────────────────────

impl Conversation {
    /// Spawn the orchestrator task. Must be called inside a tokio runtime.
    pub fn new(parts: Parts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConversationStatus::default());

        let orchestrator = TurnOrchestrator::new(parts, cmd_rx, status_tx);
        tokio::spawn(orchestrator.run());

        Self { cmd_tx, status_rx }
    }

    /// Credential sent with every backend request.
    pub fn set_credential(&self, credential: impl Into<String>) {
        let _ = self.cmd_tx.send(Cmd::SetCredential(credential.into()));
    }

    /// Manual submission (send button / Enter).
    pub fn submit(&self, message: impl Into<String>) {
        let _ = self.cmd_tx.send(Cmd::Submit(message.into()));
    }

    /// Voice-button press: flips auto-voice mode.
    pub fn toggle_voice(&self) {
        let _ = self.cmd_tx.send(Cmd::ToggleVoice);
    }

    /// Forced stop: silence, stop listening, leave auto-voice mode.
    pub fn stop(&self) {
        let _ = self.cmd_tx.send(Cmd::Stop);
    }

    /// Snapshot of the conversation log, oldest first.
    pub async fn turns(&self) -> Vec<Turn> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Turns(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub fn status(&self) -> ConversationStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConversationStatus> {
        self.status_rx.clone()
    }
}

// ─── Orchestrator task ─────────────────────────────────────────────────────

struct TurnOrchestrator {
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: mpsc::UnboundedReceiver<Event>,
    status_tx: watch::Sender<ConversationStatus>,

    backend: Arc<dyn ChatBackend>,
    input: SpeechInput,
    output: SpeechOutput,
    display: Box<dyn Display>,
    store: ConversationStore,
    config: ConversationConfig,

    credential: String,
    auto_voice: bool,
    phase: Phase,
    next_turn: TurnId,
    /// Turn whose reply is currently being spoken.
    speaking: Option<TurnId>,
    /// Backend requests still awaited. Stop forgets them, so their replies
    /// arrive as aborted.
    in_flight: BTreeSet<TurnId>,
    rearm: Option<CancellationToken>,
}

impl TurnOrchestrator {
    fn new(
        parts: Parts,
        cmd_rx: mpsc::UnboundedReceiver<Cmd>,
        status_tx: watch::Sender<ConversationStatus>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let input_tx = event_tx.clone();
        let input = SpeechInput::new(
            parts.recognizer,
            Arc::new(move |e| {
                let _ = input_tx.send(Event::Input(e));
            }),
            parts.config.recognition_retry_delay,
        );
        let output = SpeechOutput::new(parts.synthesizer, parts.speech);

        let mut display = parts.display;
        if !input.is_available() {
            info!("speech recognition unavailable; voice mode disabled");
            display.voice(VoiceIndicator::Disabled);
        }

        Self {
            cmd_rx,
            event_tx,
            event_rx,
            status_tx,
            backend: parts.backend,
            input,
            output,
            display,
            store: ConversationStore::new(),
            config: parts.config,
            credential: String::new(),
            auto_voice: false,
            phase: Phase::Idle,
            next_turn: 0,
            speaking: None,
            in_flight: BTreeSet::new(),
            rearm: None,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_cmd(cmd),
                    // Every handle dropped.
                    None => break,
                },
                Some(event) = self.event_rx.recv() => self.handle_event(event),
            }
            self.publish();
        }

        debug!("conversation: all handles dropped, shutting down");
        self.output.cancel();
        self.input.set_auto_retry(false);
        self.input.stop();
        self.cancel_rearm();
    }

    fn handle_cmd(&mut self, cmd: Cmd) {
        match cmd {
            Cmd::SetCredential(credential) => self.credential = credential,
            Cmd::Submit(message) => {
                // A typed message supersedes a capture in progress.
                self.input.stop();
                self.begin_turn(message, Origin::Typed);
            }
            Cmd::ToggleVoice => self.toggle_voice(),
            Cmd::Stop => self.stop(),
            Cmd::Turns(reply) => {
                let _ = reply.send(self.store.all().to_vec());
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Input(e) => {
                if let Some(notice) = self.input.handle(e) {
                    self.on_input(notice);
                }
            }
            Event::Reply { turn, result } => self.on_reply(turn, result),
            Event::SpeechDone { turn } => self.on_speech_done(turn),
            Event::Rearm => self.on_rearm(),
        }
    }

    // ── Input ───────────────────────────────────────────────────────

    fn toggle_voice(&mut self) {
        if !self.input.is_available() {
            self.system(MSG_RECOGNITION_UNSUPPORTED);
            return;
        }

        self.auto_voice = !self.auto_voice;
        self.input.set_auto_retry(self.auto_voice);
        info!("auto-voice {}", if self.auto_voice { "on" } else { "off" });

        if self.auto_voice {
            self.display.voice(VoiceIndicator::AutoMode);
            // Mid-turn, the end of the turn re-arms input.
            if matches!(self.phase, Phase::Idle | Phase::AwaitingInput) {
                self.phase = Phase::AwaitingInput;
                self.input.start();
            }
        } else {
            self.cancel_rearm();
            self.input.stop();
            self.display.voice(VoiceIndicator::Idle);
            if self.phase == Phase::AwaitingInput {
                self.phase = Phase::Idle;
            }
        }
    }

    fn on_input(&mut self, notice: InputNotice) {
        match notice {
            InputNotice::Listening => {
                self.phase = Phase::AwaitingInput;
                self.display.voice(VoiceIndicator::Listening);
                self.system(MSG_LISTENING);
            }
            InputNotice::Result(transcript) => {
                let indicator = self.idle_indicator();
                self.display.voice(indicator);
                debug!("heard {} chars", transcript.len());
                self.begin_turn(transcript, Origin::Voice);
            }
            InputNotice::Error(_) => {
                let indicator = self.idle_indicator();
                self.display.voice(indicator);
                self.system(MSG_RECOGNITION_ERROR);
                // In auto-voice mode the driver retries on its own.
                if !self.auto_voice && self.phase == Phase::AwaitingInput {
                    self.phase = Phase::Idle;
                }
            }
            InputNotice::End => {
                let indicator = self.idle_indicator();
                self.display.voice(indicator);
                if self.phase != Phase::AwaitingInput {
                    return;
                }
                if !self.auto_voice {
                    self.phase = Phase::Idle;
                } else if !self.input.retry_pending() && self.rearm.is_none() {
                    // Session ended without a transcript; listen again.
                    self.schedule_rearm(self.config.rearm_after_error);
                }
            }
        }
    }

    // ── Processing ──────────────────────────────────────────────────

    fn begin_turn(&mut self, message: String, origin: Origin) {
        let credential = self.credential.trim().to_string();
        let message = message.trim();

        if credential.is_empty() {
            self.system(MSG_MISSING_KEY);
            self.settle_phase();
            return;
        }
        if message.is_empty() {
            if origin == Origin::Voice && self.auto_voice {
                self.schedule_rearm(self.config.rearm_after_error);
            } else {
                self.settle_phase();
            }
            return;
        }

        self.store.append(Turn::user(message));
        self.display.append(Message::new(Sender::User, message));
        let history = self.store.recent_window(self.config.history_window).to_vec();

        let turn = self.next_turn;
        self.next_turn += 1;
        self.in_flight.insert(turn);
        self.phase = Phase::Processing;
        self.display.working(true);

        info!("turn {turn}: sending {} chars ({} context turns)", message.len(), history.len());

        let request = ChatRequest {
            api_key: credential,
            prompt: message.to_string(),
            history,
        };
        let backend = self.backend.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = backend.chat(request).await;
            let _ = event_tx.send(Event::Reply { turn, result });
        });
    }

    fn on_reply(&mut self, turn: TurnId, result: Result<String, BackendError>) {
        let aborted = !self.in_flight.remove(&turn);
        if self.in_flight.is_empty() {
            self.display.working(false);
        }

        match result {
            Ok(text) => {
                info!("turn {turn}: reply ({} chars)", text.len());
                self.store.append(Turn::assistant(text.as_str()));
                self.display.append(Message::new(Sender::Assistant, text.as_str()));

                if aborted {
                    debug!("turn {turn}: reply arrived after stop, not speaking");
                    self.settle_phase();
                    return;
                }

                if self.speaking.is_some() {
                    self.output.cancel();
                }
                self.phase = Phase::Speaking;
                self.speaking = Some(turn);
                let event_tx = self.event_tx.clone();
                self.output.speak(&text, move || {
                    let _ = event_tx.send(Event::SpeechDone { turn });
                });
            }
            Err(err) => {
                let shown = match err {
                    BackendError::Reported(message) => {
                        warn!("turn {turn}: backend error: {message}");
                        message
                    }
                    BackendError::Network(detail) => {
                        warn!("turn {turn}: network error: {detail}");
                        MSG_NETWORK_ERROR.to_string()
                    }
                };
                self.system(&shown);

                if aborted || self.speaking.is_some() || !self.in_flight.is_empty() {
                    self.settle_phase();
                    return;
                }
                self.finish_turn(self.config.rearm_after_error);
            }
        }
    }

    // ── Speaking ────────────────────────────────────────────────────

    fn on_speech_done(&mut self, turn: TurnId) {
        if self.speaking != Some(turn) {
            return;
        }
        debug!("turn {turn}: finished speaking");
        self.speaking = None;
        self.finish_turn(self.config.rearm_after_speech);
    }

    fn finish_turn(&mut self, rearm_delay: Duration) {
        // A newer turn is still waiting on the backend; its reply ends it.
        if !self.in_flight.is_empty() {
            self.phase = Phase::Processing;
            return;
        }
        if self.auto_voice {
            self.phase = Phase::AwaitingInput;
            self.schedule_rearm(rearm_delay);
        } else {
            self.phase = Phase::Idle;
        }
    }

    // ── Stop ────────────────────────────────────────────────────────

    fn stop(&mut self) {
        info!("forced stop");
        self.output.cancel();
        self.speaking = None;

        self.auto_voice = false;
        self.input.set_auto_retry(false);
        self.input.stop();
        self.cancel_rearm();

        self.in_flight.clear();
        self.display.working(false);
        let indicator = self.idle_indicator();
        self.display.voice(indicator);
        self.phase = Phase::Idle;
    }

    // ── Re-arm timer ────────────────────────────────────────────────

    fn schedule_rearm(&mut self, delay: Duration) {
        self.cancel_rearm();

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = event_tx.send(Event::Rearm);
                }
            }
        });
        self.rearm = Some(token);
    }

    fn cancel_rearm(&mut self) {
        if let Some(token) = self.rearm.take() {
            token.cancel();
        }
    }

    fn on_rearm(&mut self) {
        self.rearm = None;
        if !self.auto_voice {
            return;
        }
        debug!("re-arming speech input");
        self.phase = Phase::AwaitingInput;
        self.input.start();
    }

    // ── Helpers ─────────────────────────────────────────────────────

    /// After an aborted turn, fall back to whichever state still applies.
    fn settle_phase(&mut self) {
        self.phase = if self.speaking.is_some() {
            Phase::Speaking
        } else if !self.in_flight.is_empty() {
            Phase::Processing
        } else if self.input.is_listening() || self.rearm.is_some() {
            Phase::AwaitingInput
        } else {
            Phase::Idle
        };
    }

    fn idle_indicator(&self) -> VoiceIndicator {
        if !self.input.is_available() {
            VoiceIndicator::Disabled
        } else if self.auto_voice {
            VoiceIndicator::AutoMode
        } else {
            VoiceIndicator::Idle
        }
    }

    fn system(&mut self, text: &str) {
        self.display.append(Message::new(Sender::System, text));
    }

    fn publish(&self) {
        let status = ConversationStatus {
            phase: self.phase,
            auto_voice: self.auto_voice,
            listening: self.input.is_listening(),
            turns: self.store.len(),
        };
        self.status_tx.send_modify(|s| *s = status);
    }
}
