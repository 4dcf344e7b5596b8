//! Upstream model client used by the chat API.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use voxchat_core::types::{Role, Turn};

use crate::error::GeminiError;

const ASSISTANT_INSTRUCTIONS: &str = "You are a helpful, conversational AI assistant. \
Format your response using Markdown for clarity and visual appeal. \
Use headings, bullet points, and bold where appropriate. \
Use the conversation history to answer follow-up questions naturally.\n\n";

/// Something that turns a full prompt into reply text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, GeminiError>;
}

/// Render the conversation as a transcript and prefix the assistant
/// instructions.
pub fn build_prompt(history: &[Turn], prompt: &str) -> String {
    let mut lines: Vec<String> = history
        .iter()
        .map(|turn| match turn.role {
            Role::User => format!("**User:** {}", turn.text),
            Role::Assistant => format!("**Gemini:** {}", turn.text),
        })
        .collect();
    lines.push(format!("**User:** {prompt}"));

    format!("{ASSISTANT_INSTRUCTIONS}{}", lines.join("\n\n"))
}

/// Concatenated text parts of the first candidate, trimmed. `None` when the
/// first candidate carries no content.
pub fn extract_text(body: &Value) -> Option<String> {
    let content = body.get("candidates")?.get(0)?.get("content")?;
    let text: String = content
        .get("parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    Some(text.trim().to_string())
}

/// Google Gemini `generateContent` over HTTPS.
pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
}

impl GeminiClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, GeminiError> {
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        debug!("gemini: POST {} chars", prompt.len());

        let resp = self
            .client
            .post(&self.url)
            .header("X-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| GeminiError::Transport(e.to_string()))?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(GeminiError::Status {
                code: status.as_u16(),
                body,
            });
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| GeminiError::Transport(e.to_string()))?;
        extract_text(&body).ok_or(GeminiError::NoText)
    }
}
