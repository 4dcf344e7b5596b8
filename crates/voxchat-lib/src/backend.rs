//! Chat backend client: one JSON request per turn.

use async_trait::async_trait;
use tracing::debug;

use voxchat_core::types::{ChatReply, ChatRequest};

use crate::error::BackendError;

/// The remote chat service.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send one prompt with its context and return the reply text.
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError>;
}

/// Talks to a voxchat chat API (`POST {server}/api/chat`).
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    pub fn new(server: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/api/chat", server.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn chat(&self, request: ChatRequest) -> Result<String, BackendError> {
        debug!(
            "backend: POST {} ({} chars, {} history turns)",
            self.url,
            request.prompt.len(),
            request.history.len()
        );

        let resp = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        // Error replies come with 4xx/5xx statuses but still carry a JSON body.
        let status = resp.status();
        let reply: ChatReply = resp
            .json()
            .await
            .map_err(|e| BackendError::Network(format!("unreadable body ({status}): {e}")))?;

        interpret_reply(reply)
    }
}

/// A non-empty `response` wins; otherwise an `error` is reported verbatim;
/// a body with neither is malformed.
pub fn interpret_reply(reply: ChatReply) -> Result<String, BackendError> {
    match reply {
        ChatReply {
            response: Some(text),
            ..
        } if !text.is_empty() => Ok(text),
        ChatReply {
            error: Some(message),
            ..
        } => Err(BackendError::Reported(message)),
        _ => Err(BackendError::Network(
            "reply carried neither response nor error".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_success() {
        let text = interpret_reply(ChatReply::success("Hi **there**")).unwrap();
        assert_eq!(text, "Hi **there**");
    }

    #[test]
    fn error_is_reported_verbatim() {
        let err = interpret_reply(ChatReply::failure("API key and prompt are required")).unwrap_err();
        assert!(matches!(err, BackendError::Reported(m) if m == "API key and prompt are required"));
    }

    #[test]
    fn empty_body_is_malformed() {
        let err = interpret_reply(ChatReply::default()).unwrap_err();
        assert!(matches!(err, BackendError::Network(_)));
    }

    #[test]
    fn empty_response_falls_through_to_error() {
        let reply = ChatReply {
            response: Some(String::new()),
            error: Some("upstream".into()),
        };
        assert!(matches!(interpret_reply(reply), Err(BackendError::Reported(_))));
    }

    #[test]
    fn url_is_derived_from_server() {
        assert_eq!(HttpBackend::new("http://localhost:5000/").url, "http://localhost:5000/api/chat");
    }
}
