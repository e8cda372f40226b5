//! The model-client seam: send a rendered prompt, get raw text back.
//!
//! Vendor adapters live outside this crate; the core only needs the
//! text-in/text-out contract plus usage metadata, and the transient/fatal
//! error split that drives the generator's retry loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ops::Add;
use thiserror::Error;

/// Rendered request payload handed to a [`ModelClient`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    pub temperature: f32,
    /// Free-form routing hints (model name, stop sequences, ...). Opaque to
    /// the core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: 0.0,
            metadata: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub usage: LmUsage,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: LmUsage::default(),
        }
    }
}

/// Token accounting, summed across retries and across a batch.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Add for LmUsage {
    type Output = LmUsage;

    fn add(self, other: LmUsage) -> Self {
        LmUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

/// Client-side failure classification. The generator retries `Transient`
/// with backoff and surfaces `Request` immediately.
#[derive(Error, Debug, Clone)]
pub enum ModelError {
    #[error("transient model failure: {0}")]
    Transient(String),

    #[error("request rejected: {0}")]
    Request(String),
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;

    fn name(&self) -> &str {
        "model"
    }
}
