//! voxchat-core: pure types, text processing and the conversation log.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod markdown;
pub mod store;
pub mod text_prep;
pub mod types;
pub mod wav;
