pub mod gateway;
pub mod generic_provider;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;

pub use gateway::{GatewayReply, InvokeRequest, LlmGateway, ReplyOrigin};

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Failure reaching or understanding a language-model provider.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no language-model provider is configured")]
    Unconfigured,
    #[error("{provider}: request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider}: API error ({status}): {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("{provider}: could not decode response: {source}")]
    Decode {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider}: response contained no text")]
    EmptyResponse { provider: String },
    #[error("{provider}: no reply within {secs}s")]
    Timeout { provider: String, secs: u64 },
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    // Execute a conversation against a model and return the first text reply.
    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError>;
}
