use std::time::Duration;

use async_trait::async_trait;

use crate::common::error::InferenceError;

/// Options passed through to the text-generation provider
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub max_tokens: u32,
    pub temperature: f32,
    /// Ask the provider for a JSON object response when it supports it
    pub json_response: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 256,
            temperature: 0.0,
            json_response: true,
        }
    }
}

// Inference-side ports
#[async_trait]
pub trait TextGenerationPort: Send + Sync {
    async fn generate_text(&self, prompt: &str, options: &GenerationOptions) -> Result<String, InferenceError>;
}

#[async_trait]
pub trait SleeperPort: Send + Sync {
    async fn sleep(&self, duration: Duration);
}
