//! Shared types for the voxchat ecosystem.
//!
//! These types are used by voxchat-lib and voxchat-cli. Keeping them here
//! means consumers can depend on the data model and wire format without
//! pulling in tokio, rodio, or other heavy deps.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

// ─── Conversation types ────────────────────────────────────────────────────

/// Who produced a turn. Serialized with the backend's role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "gemini")]
    Assistant,
}

/// One exchanged message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

// ─── Wire types ────────────────────────────────────────────────────────────

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub prompt: String,
    /// Entries with a role other than `user` or `gemini` are skipped.
    #[serde(default, deserialize_with = "known_turns")]
    pub history: Vec<Turn>,
}

fn known_turns<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Turn>, D::Error> {
    #[derive(Deserialize)]
    struct RawTurn {
        #[serde(default)]
        role: String,
        #[serde(default)]
        text: String,
    }

    let raw = Vec::<RawTurn>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|t| match t.role.as_str() {
            "user" => Some(Turn::user(t.text)),
            "gemini" => Some(Turn::assistant(t.text)),
            _ => None,
        })
        .collect())
}

/// Reply from `POST /api/chat`: either `{response}` or `{error}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatReply {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            response: Some(text.into()),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            response: None,
            error: Some(message.into()),
        }
    }
}

// ─── User-facing messages ──────────────────────────────────────────────────

pub const MSG_MISSING_KEY: &str = "Please enter your Gemini API key.";
pub const MSG_NETWORK_ERROR: &str = "Network error.";
pub const MSG_RECOGNITION_ERROR: &str = "Speech recognition error.";
pub const MSG_LISTENING: &str = "Listening...";
pub const MSG_RECOGNITION_UNSUPPORTED: &str = "Speech recognition not supported";

// ─── Orchestrator state ────────────────────────────────────────────────────

/// Phase of the turn-taking loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    AwaitingInput,
    Processing,
    Speaking,
}

/// Observable orchestrator snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStatus {
    pub phase: Phase,
    pub auto_voice: bool,
    pub listening: bool,
    pub turns: usize,
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            auto_voice: false,
            listening: false,
            turns: 0,
        }
    }
}

// ─── Configuration ─────────────────────────────────────────────────────────

/// Number of turns sent to the backend as context.
pub const DEFAULT_HISTORY_WINDOW: usize = 8;

/// Turn orchestrator timing and context configuration.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub history_window: usize,
    /// Delay before re-arming input after a reply has been spoken.
    pub rearm_after_speech: Duration,
    /// Delay before re-arming input after a failed turn.
    pub rearm_after_error: Duration,
    /// Delay before retrying recognition after a recognition error.
    pub recognition_retry_delay: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            rearm_after_speech: Duration::from_millis(10),
            rearm_after_error: Duration::from_millis(100),
            recognition_retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Speech output configuration: utterance parameters and voice preference.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
    /// Pause between sentence units.
    pub sentence_pause: Duration,
    /// Preferred voice: name must contain this substring...
    pub preferred_voice: String,
    /// ...and match this locale exactly.
    pub preferred_locale: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            rate: 0.95,
            pitch: 1.08,
            volume: 1.0,
            sentence_pause: Duration::from_millis(10),
            preferred_voice: "Google".into(),
            preferred_locale: "en-US".into(),
        }
    }
}

/// Kokoro synthesis server configuration.
#[derive(Debug, Clone)]
pub struct KokoroConfig {
    pub url: String,
    pub voice: String,
    pub speed: f32,
}

impl Default for KokoroConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001".into(),
            voice: "af_heart".into(),
            speed: 1.0,
        }
    }
}

/// Whisper transcription server and VAD configuration.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub url: String,
    pub model: String,
    pub silence_threshold: f32,
    pub min_speech: Duration,
    pub trailing_silence: Duration,
    pub no_speech_timeout: Duration,
    pub max_capture: Duration,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:2022".into(),
            model: "base".into(),
            silence_threshold: 0.004,
            min_speech: Duration::from_millis(180),
            trailing_silence: Duration::from_millis(700),
            no_speech_timeout: Duration::from_millis(7_000),
            max_capture: Duration::from_millis(12_000),
        }
    }
}

/// Chat API server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub gemini_url: String,
}

pub const GEMINI_API_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            gemini_url: GEMINI_API_URL.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_uses_backend_role_names() {
        let json = serde_json::to_value(Turn::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "gemini", "text": "hi" }));
        let json = serde_json::to_value(Turn::user("yo")).unwrap();
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn reply_omits_absent_fields() {
        let json = serde_json::to_string(&ChatReply::failure("boom")).unwrap();
        assert_eq!(json, r#"{"error":"boom"}"#);
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let req: ChatRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        assert!(req.api_key.is_empty());
        assert!(req.history.is_empty());
    }

    #[test]
    fn history_skips_unknown_roles() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"prompt":"hi","history":[
                {"role":"user","text":"a"},
                {"role":"system","text":"b"},
                {"text":"c"},
                {"role":"gemini","text":"d"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.history, vec![Turn::user("a"), Turn::assistant("d")]);
    }
}
