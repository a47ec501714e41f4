//! Chat-model capability handed to abilities.
//!
//! The execution loop never calls a provider itself; abilities reach it
//! through their agent context. Two in-process providers ship here: an
//! echoing provider used as the default and a scripted provider for tests.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LlmError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("request timed out")]
    Timeout,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

// ---------------------------------------------------------------------------
// ChatConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LlmProvider trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Implementation name as registered in the component registry.
    fn kind(&self) -> &str;

    async fn chat(&self, prompt: &str, config: &ChatConfig) -> Result<String, LlmError>;
}

// ---------------------------------------------------------------------------
// EchoProvider
// ---------------------------------------------------------------------------

/// Returns the prompt, optionally prefixed. Useful as an offline default.
#[derive(Debug, Clone, Default)]
pub struct EchoProvider {
    prefix: String,
}

impl EchoProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn kind(&self) -> &str {
        "echo"
    }

    async fn chat(&self, prompt: &str, _config: &ChatConfig) -> Result<String, LlmError> {
        Ok(format!("{}{}", self.prefix, prompt))
    }
}

// ---------------------------------------------------------------------------
// ScriptedProvider
// ---------------------------------------------------------------------------

/// Pops pre-configured replies in order, falling back to a fixed reply.
/// Every prompt is captured for assertions.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    captured: Mutex<Vec<String>>,
    fallback: String,
}

impl ScriptedProvider {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            captured: Mutex::new(Vec::new()),
            fallback: fallback.into(),
        }
    }

    pub async fn push_reply(&self, reply: Result<String, LlmError>) {
        self.replies.lock().await.push_back(reply);
    }

    pub async fn captured_prompts(&self) -> Vec<String> {
        self.captured.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn kind(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, prompt: &str, _config: &ChatConfig) -> Result<String, LlmError> {
        self.captured.lock().await.push(prompt.to_string());
        match self.replies.lock().await.pop_front() {
            Some(reply) => reply,
            None => Ok(self.fallback.clone()),
        }
    }
}
