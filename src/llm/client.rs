use super::error::CallError;
use super::types::{LLMRequest, LLMResponse};
use async_trait::async_trait;

/// Transport for one chat-completion exchange
///
/// Implementations perform exactly one network request per `chat` call.
/// Retries, rate limiting and timeouts are layered on top by
/// [`InferenceClient`](super::InferenceClient).
#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, CallError>;

    fn name(&self) -> &str;
}
