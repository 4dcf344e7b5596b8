//! voxchat-lib: voice chat engine.
//!
//! Turn orchestration over three asynchronous capabilities (speech input,
//! the chat backend, speech output), concrete Kokoro/Whisper adapters, and
//! the HTTP chat API. Depends on voxchat-core for pure types and text
//! processing.

pub mod backend;
pub mod capture;
pub mod conversation;
pub mod display;
pub mod error;
pub mod gemini;
pub mod recognition;
pub mod server;
pub mod stt;
pub mod synthesis;
pub mod tts;

#[cfg(test)]
pub(crate) mod testing;

// Re-export voxchat-core for convenience
pub use voxchat_core;
