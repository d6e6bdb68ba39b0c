//! Client trait over unary and streaming completion calls

use crate::error::Result;
use crate::sse::CompletionStream;
use crate::types::{CompletionRequest, CompletionResponse};
use async_trait::async_trait;

/// Unified trait for completion clients
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a completion request
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Stream a completion request
    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream>;

    /// Get the client type for debugging/logging
    fn client_type(&self) -> &str;

    /// Get the endpoint requests are sent to
    fn endpoint(&self) -> &str;
}
