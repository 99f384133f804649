use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One conversational turn. Lives only for the duration of a single exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub trip_id: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub keep_alive: Option<String>,
}

impl ChatRequest {
    /// Callers may only send user/assistant turns and the last one must be a non-empty user turn.
    pub fn validate(&self) -> Result<(), AppError> {
        let Some(last) = self.messages.last() else {
            return Err(AppError::validation("messages must not be empty"));
        };
        if self.messages.iter().any(|m| m.role == ChatRole::System) {
            return Err(AppError::validation(
                "system messages are supplied by the server",
            ));
        }
        if last.role != ChatRole::User || last.content.trim().is_empty() {
            return Err(AppError::validation(
                "the last message must be a non-empty user message",
            ));
        }
        if matches!(&self.model, Some(model) if model.trim().is_empty()) {
            return Err(AppError::validation("model must not be blank"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Generated {
    pub result: serde_json::Value,
    pub usage: Usage,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub running: bool,
    pub models: Vec<String>,
    pub model_count: usize,
    pub default_model: String,
}
