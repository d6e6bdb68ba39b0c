//! # Bailian completion client
//!
//! An async client for the Bailian hosted completion service.
//!
//! ## Features
//!
//! - **Token management**: access tokens are created through the signed
//!   identity service API, cached, and refreshed ahead of expiry
//! - **Unary completions**: one request, one JSON response envelope
//! - **Streaming completions**: Server-Sent Events decoded into a
//!   backpressured `Stream` of response envelopes, cancelled on drop
//! - **Embeddings**: text embeddings through the identity service API
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bailian::prelude::*;
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Token creation reads ACCESS_KEY_ID, ACCESS_KEY_SECRET and AGENT_KEY
//!     let tokens = AccessTokenClient::from_env()?;
//!     let client = CompletionClient::from_provider(CompletionConfig::new(), &tokens).await?;
//!
//!     let response = client
//!         .complete(CompletionRequest::new("your-app-id", "Hello"))
//!         .await?;
//!     if response.success {
//!         println!("{}", response.text().unwrap_or_default());
//!     }
//!
//!     let mut stream = client
//!         .stream(CompletionRequest::new("your-app-id", "Tell me a story"))
//!         .await?;
//!     while let Some(chunk) = stream.next().await {
//!         println!("{}", chunk?.text().unwrap_or_default());
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod completion;
pub mod config;
pub mod error;
pub mod llm_client;
pub mod pop;
pub mod signature;
pub mod sse;
pub mod token;
pub mod tracing_ext;
pub mod types;

// Re-exports for convenience
pub use completion::CompletionClient;
pub use config::{ClientSettings, CompletionConfig, Credentials};
pub use error::{Error, Result};
pub use llm_client::LlmClient;
pub use pop::{PopClient, TextEmbedding, TextType};
pub use sse::CompletionStream;
pub use token::{AccessTokenClient, StaticToken, TokenIssuer, TokenProvider};
pub use types::{
    ChatMessage, ChatQaMessage, CompletionRequest, CompletionResponse, DocReferenceType,
    ModelParameters,
};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::completion::CompletionClient;
    pub use crate::config::{CompletionConfig, Credentials};
    pub use crate::error::{Error, Result};
    pub use crate::llm_client::LlmClient;
    pub use crate::sse::CompletionStream;
    pub use crate::token::{AccessTokenClient, TokenProvider};
    pub use crate::types::*;
}
