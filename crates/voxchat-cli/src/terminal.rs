//! Plain-terminal presentation: one line per message on stdout.

use std::io::Write;

use voxchat_lib::display::{Display, Message, Sender, VoiceIndicator};

#[derive(Default)]
pub struct TerminalDisplay {
    voice: Option<VoiceIndicator>,
}

impl TerminalDisplay {
    fn print(&self, line: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

fn prefix(sender: Sender) -> &'static str {
    match sender {
        Sender::User => "you",
        Sender::Assistant => "gemini",
        Sender::System => "*",
    }
}

impl Display for TerminalDisplay {
    fn append(&mut self, message: Message) {
        // Markdown is readable as-is in a terminal; the HTML rendering is for
        // richer hosts.
        self.print(&format!("{}> {}", prefix(message.sender), message.text));
    }

    fn working(&mut self, on: bool) {
        if on {
            self.print("...");
        }
    }

    fn voice(&mut self, indicator: VoiceIndicator) {
        if self.voice.replace(indicator) == Some(indicator) {
            return;
        }
        let label = match indicator {
            VoiceIndicator::Idle => "voice off",
            VoiceIndicator::Listening => "listening",
            VoiceIndicator::AutoMode => "voice on",
            VoiceIndicator::Disabled => return,
        };
        self.print(&format!("[{label}]"));
    }
}
