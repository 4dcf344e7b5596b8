//! Presentation surface where the orchestrator renders turns and indicators.

use voxchat_core::markdown::render_markdown;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
    /// Status and error lines. Never spoken.
    System,
}

/// A rendered chat line.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub html: String,
}

impl Message {
    pub fn new(sender: Sender, text: impl Into<String>) -> Self {
        let text = text.into();
        let html = render_markdown(&text);
        Self { sender, text, html }
    }
}

/// Voice-button state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceIndicator {
    Idle,
    Listening,
    AutoMode,
    /// Recognition is unavailable on this host.
    Disabled,
}

/// Host UI implemented by the embedding application.
pub trait Display: Send + 'static {
    fn append(&mut self, message: Message);

    /// Show or hide the typing indicator.
    fn working(&mut self, on: bool);

    fn voice(&mut self, indicator: VoiceIndicator);
}
