//! Request and response data types for the completion service
//!
//! Field names follow the service's PascalCase wire format.

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Decode an explicit `null` as the type's default value
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Generate a correlation id: a random UUID without separators
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// How document references are returned alongside a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocReferenceType {
    /// Plain references
    Simple,
    /// References with citation indices
    Indexed,
}

/// A question/answer pair of caller-maintained history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatQaMessage {
    /// User utterance
    pub user: String,
    /// Bot reply
    pub bot: String,
}

impl ChatQaMessage {
    /// Create a history entry
    pub fn new(user: impl Into<String>, bot: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            bot: bot.into(),
        }
    }
}

/// Role of a chat message sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
    /// Any other role name, passed through verbatim
    #[serde(untagged)]
    Other(String),
}

/// A message of chat-style history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatMessage {
    /// Role of the sender
    pub role: Role,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Model parameters for a completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModelParameters {
    /// Top-k sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    /// Random seed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i32>,
    /// Send the prompt to the model without templating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_raw_prompt: Option<bool>,
    /// Temperature for sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens for completion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    /// Result format (`text` or `message`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_format: Option<String>,
    /// Stop sequences
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    /// Stream deltas instead of the accumulated text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incremental_output: Option<bool>,
}

/// Completion request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletionRequest {
    /// Correlation id; generated when empty
    #[serde(default)]
    pub request_id: String,
    /// Application id
    pub app_id: String,
    /// Prompt text
    #[serde(default)]
    pub prompt: String,
    /// Session id for server-maintained history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Top-p sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    /// Whether the response is streamed; set by the client per call
    #[serde(default)]
    pub stream: bool,
    /// Return intermediate agent thoughts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_thoughts: Option<bool>,
    /// Free-form business parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biz_params: Option<serde_json::Map<String, serde_json::Value>>,
    /// Document reference format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_reference_type: Option<DocReferenceType>,
    /// Caller-maintained question/answer history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ChatQaMessage>>,
    /// Chat-style message history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    /// Model parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<ModelParameters>,
    /// Restrict retrieval to documents with these tag ids
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_tag_ids: Option<Vec<i64>>,
    /// Restrict retrieval to documents with these tag codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_tag_codes: Option<Vec<String>>,
}

impl CompletionRequest {
    /// Create a prompt request for an application
    pub fn new(app_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Create a chat request for an application
    pub fn chat(app_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            app_id: app_id.into(),
            messages: Some(messages),
            ..Default::default()
        }
    }

    /// Set the correlation id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Set the session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set top-p
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Request intermediate thoughts
    pub fn with_thoughts(mut self, has_thoughts: bool) -> Self {
        self.has_thoughts = Some(has_thoughts);
        self
    }

    /// Set business parameters
    pub fn with_biz_params(mut self, biz_params: serde_json::Map<String, serde_json::Value>) -> Self {
        self.biz_params = Some(biz_params);
        self
    }

    /// Set the document reference format
    pub fn with_doc_reference_type(mut self, doc_reference_type: DocReferenceType) -> Self {
        self.doc_reference_type = Some(doc_reference_type);
        self
    }

    /// Set question/answer history
    pub fn with_history(mut self, history: Vec<ChatQaMessage>) -> Self {
        self.history = Some(history);
        self
    }

    /// Set model parameters
    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Set document tag ids
    pub fn with_doc_tag_ids(mut self, doc_tag_ids: Vec<i64>) -> Self {
        self.doc_tag_ids = Some(doc_tag_ids);
        self
    }

    /// Set document tag codes
    pub fn with_doc_tag_codes(mut self, doc_tag_codes: Vec<String>) -> Self {
        self.doc_tag_codes = Some(doc_tag_codes);
        self
    }
}

/// Intermediate agent step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Thought {
    /// Reasoning text
    pub thought: Option<String>,
    /// Action type
    pub action_type: Option<String>,
    /// Action name
    pub action_name: Option<String>,
    /// Action
    pub action: Option<String>,
    /// Streamed action input
    pub action_input_stream: Option<String>,
    /// Action input
    pub action_input: Option<String>,
    /// Response
    pub response: Option<String>,
    /// Observation
    pub observation: Option<String>,
}

/// Retrieved document cited by a completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DocReference {
    /// Citation index
    pub index_id: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Document id
    pub doc_id: Option<String>,
    /// Document name
    pub doc_name: Option<String>,
    /// Document URL
    pub doc_url: Option<String>,
    /// Cited text
    pub text: Option<String>,
    /// Business id
    pub biz_id: Option<String>,
}

/// Token usage of one model call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Usage {
    /// Input tokens
    #[serde(deserialize_with = "null_as_default")]
    pub input_tokens: i32,
    /// Output tokens
    #[serde(deserialize_with = "null_as_default")]
    pub output_tokens: i32,
    /// Model id
    pub model_id: Option<String>,
}

/// Message of a choice
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResponseMessage {
    /// Role of the sender
    #[serde(deserialize_with = "null_as_default")]
    pub role: String,
    /// Content
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
}

/// Choice in a message-format completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Choice {
    /// Finish reason
    pub finish_reason: Option<String>,
    /// Message content
    pub message: Option<ResponseMessage>,
}

/// Payload of a completion response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompletionData {
    /// Response id
    pub response_id: Option<String>,
    /// Session id
    pub session_id: Option<String>,
    /// Generated text
    pub text: Option<String>,
    /// Intermediate thoughts
    #[serde(deserialize_with = "null_as_default")]
    pub thoughts: Vec<Thought>,
    /// Document references
    #[serde(deserialize_with = "null_as_default")]
    pub doc_references: Vec<DocReference>,
    /// Token usage
    #[serde(deserialize_with = "null_as_default")]
    pub usage: Vec<Usage>,
    /// Choices
    #[serde(deserialize_with = "null_as_default")]
    pub choices: Vec<Choice>,
}

/// Completion response envelope
///
/// `success == false` is an application-level failure, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CompletionResponse {
    /// Whether the call succeeded
    #[serde(deserialize_with = "null_as_default")]
    pub success: bool,
    /// Error code
    pub code: Option<String>,
    /// Error message
    pub message: Option<String>,
    /// Correlation id
    pub request_id: Option<String>,
    /// Payload
    pub data: Option<CompletionData>,
}

impl CompletionResponse {
    /// Generated text, if any
    pub fn text(&self) -> Option<&str> {
        self.data.as_ref()?.text.as_deref()
    }
}
