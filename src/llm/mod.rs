//! LLM integration.
//!
//! Responders only need opaque text generation: a system prompt and the
//! user's content in, reply text out. Any failure surfaces as [`LlmError`]
//! and is handled by the caller.

mod anthropic;

pub use anthropic::AnthropicProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::LlmConfig;
use crate::error::LlmError;

/// Text-in/text-out language model.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    async fn generate(&self, system_prompt: &str, user_content: &str) -> Result<String, LlmError>;
}

/// Create the configured LLM provider.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = AnthropicProvider::new(config)?;
    tracing::info!("Using Anthropic (model: {})", config.model);
    Ok(Arc::new(provider))
}
