//! Error types for the voice chat engine

use thiserror::Error;

/// Failure of a chat backend call.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend answered with an `error` field. Shown to the user verbatim.
    #[error("{0}")]
    Reported(String),

    /// Unreachable, timed out, or the body could not be understood.
    /// Only the generic network message is shown; the detail is logged.
    #[error("network error: {0}")]
    Network(String),
}

/// Failure of a single utterance in a synthesis engine.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no audio output device: {0}")]
    Output(String),

    #[error("synthesis request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("synthesis server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("playback thread is gone")]
    PlaybackClosed,
}

/// Failure inside a recognition engine session.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("no microphone found. Please connect an audio input device.")]
    NoInputDevice,

    #[error("audio capture error: {0}")]
    Capture(String),

    #[error("transcription request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("transcription failed ({status}): {body}")]
    Server { status: u16, body: String },
}

/// Failure talking to the upstream Gemini model. The Display text is what the
/// chat API returns in its `error` field.
#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Request failed with status code {code}: {body}")]
    Status { code: u16, body: String },

    #[error("No generated text found in response.")]
    NoText,

    #[error("Error during API call: {0}")]
    Transport(String),
}
