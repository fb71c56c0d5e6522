//! Chat completion proxy.
//!
//! The document text travels once, in the system message; earlier turns are
//! replayed verbatim ahead of the new prompt.

use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use chrono::Utc;
use docuchat_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::ChatConfig;
use crate::error::ApiError;
use crate::server::AppState;

const SYSTEM_PREAMBLE: &str = "You are a helpful AI assistant that can answer questions about \
documents. You have access to the following document content. Please provide accurate, helpful \
responses based on the document content provided. If the document doesn't contain information \
relevant to the question, say so clearly.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    document_content: Option<String>,
    #[serde(default)]
    conversation_history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: Option<CompletionMessage>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> std::result::Result<Json<ChatResponse>, ApiError> {
    let Json(req) = payload?;
    let prompt = req
        .prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::bad_request("Prompt is required"))?;
    let document = req
        .document_content
        .filter(|d| !d.is_empty())
        .ok_or_else(|| ApiError::bad_request("Document content is required"))?;

    let cfg = &state.cfg.chat;
    let api_key = cfg
        .api_key
        .as_deref()
        .ok_or_else(|| ApiError::internal("OpenAI API key not configured"))?;

    let messages = build_messages(&document, req.conversation_history, &prompt);
    info!(
        "Chat request: {} messages, {} chars of document",
        messages.len(),
        document.len()
    );

    let response = complete(&state.http, cfg, api_key, &messages)
        .await
        .map_err(|e| {
            error!("Chat completion failed: {}", e);
            ApiError::internal("Failed to get response from OpenAI")
        })?;
    Ok(Json(ChatResponse {
        success: true,
        response,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

/// System message with the document, then the prior turns, then the prompt.
pub fn build_messages(document: &str, history: Vec<ChatMessage>, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::new(
        "system",
        format!("{}\n\nDocument content:\n{}", SYSTEM_PREAMBLE, document),
    ));
    messages.extend(history);
    messages.push(ChatMessage::new("user", prompt));
    messages
}

async fn complete(
    http: &reqwest::Client,
    cfg: &ChatConfig,
    api_key: &str,
    messages: &[ChatMessage],
) -> Result<String> {
    let response = http
        .post(&cfg.api_url)
        .bearer_auth(api_key)
        .json(&CompletionRequest {
            model: &cfg.model,
            messages,
            max_tokens: cfg.max_tokens,
            temperature: cfg.temperature,
        })
        .send()
        .await
        .map_err(|e| Error::Upstream(format!("request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Upstream(format!("HTTP {}: {}", status, body)));
    }

    let completion: CompletionResponse = response
        .json()
        .await
        .map_err(|e| Error::Upstream(format!("unreadable body: {}", e)))?;
    debug!("Chat upstream returned {} choices", completion.choices.len());
    Ok(first_reply(completion))
}

fn first_reply(completion: CompletionResponse) -> String {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| "No response received".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_order() {
        let history = vec![
            ChatMessage::new("user", "What is it about?"),
            ChatMessage::new("assistant", "Cats."),
        ];
        let messages = build_messages("All about cats.", history, "Which cats?");

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.ends_with("Document content:\nAll about cats."));
        assert_eq!(messages[1].content, "What is it about?");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3], ChatMessage::new("user", "Which cats?"));
    }

    #[test]
    fn test_first_reply() {
        let completion: CompletionResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"Tabbies."}}]}"#,
        )
        .unwrap();
        assert_eq!(first_reply(completion), "Tabbies.");

        let empty: CompletionResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(first_reply(empty), "No response received");
    }

    #[test]
    fn test_request_fields_are_camel_case() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"prompt":"hi","documentContent":"doc","conversationHistory":[{"role":"user","content":"x"}]}"#,
        )
        .unwrap();
        assert_eq!(req.prompt.as_deref(), Some("hi"));
        assert_eq!(req.document_content.as_deref(), Some("doc"));
        assert_eq!(req.conversation_history.len(), 1);
    }
}
