//! Identity service (RPC style) client: token issuing and text embeddings

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::signature::{self, CanonicalRequest};
use chrono::Utc;
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// API version sent in `x-acs-version`
pub const API_VERSION: &str = "2023-06-01";

/// Response header carrying the service-side request id
pub const REQUEST_ID_HEADER: &str = "x-acs-request-id";

/// Response envelope shared by all identity service actions
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PopEnvelope<T> {
    /// Whether the call succeeded
    #[serde(default, deserialize_with = "crate::types::null_as_default")]
    pub success: bool,
    /// Error code
    pub code: Option<String>,
    /// Error message
    pub message: Option<String>,
    /// Request id
    pub request_id: Option<String>,
    /// Payload
    pub data: Option<T>,
}

/// Decoded envelope plus the transport-level request id
#[derive(Debug, Clone)]
pub struct PopResponse<T> {
    /// Value of the `x-acs-request-id` header
    pub request_id_header: Option<String>,
    /// Response body
    pub body: PopEnvelope<T>,
}

impl<T> PopResponse<T> {
    /// Request id from the envelope, falling back to the response header
    pub fn request_id(&self) -> String {
        self.body
            .request_id
            .clone()
            .or_else(|| self.request_id_header.clone())
            .unwrap_or_default()
    }
}

/// Issued access token
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenData {
    /// Bearer token
    pub token: String,
    /// Expiry as Unix epoch seconds
    pub expired_time: i64,
}

/// Kind of text being embedded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextType {
    /// Search query
    Query,
    /// Document to be indexed
    Document,
}

impl TextType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Document => "document",
        }
    }
}

/// Embedding of one input text
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextEmbedding {
    /// Position of the text in the request
    pub text_index: u32,
    /// Embedding vector
    pub embedding: Vec<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct EmbeddingsData {
    #[serde(deserialize_with = "crate::types::null_as_default")]
    embeddings: Vec<TextEmbedding>,
}

/// Signed client for the identity service
pub struct PopClient {
    /// HTTP client
    client: Client,
    /// Credentials used to sign calls
    credentials: Credentials,
}

impl PopClient {
    /// Create a new identity service client
    pub fn new(credentials: Credentials) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            credentials,
        })
    }

    /// Create a client from environment credentials
    pub fn from_env() -> Result<Self> {
        Self::new(Credentials::from_env()?)
    }

    /// Get the credentials
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Create an access token for the configured agent key
    pub async fn create_token(&self) -> Result<PopResponse<TokenData>> {
        let mut params = BTreeMap::new();
        params.insert("AgentKey".to_string(), self.credentials.agent_key.clone());
        self.call("CreateToken", params).await
    }

    /// Embed a batch of texts
    pub async fn create_text_embeddings(
        &self,
        inputs: &[String],
        text_type: Option<TextType>,
    ) -> Result<Vec<TextEmbedding>> {
        if inputs.is_empty() {
            return Err(Error::invalid_input("at least one input text is required"));
        }

        let mut params = BTreeMap::new();
        params.insert("AgentKey".to_string(), self.credentials.agent_key.clone());
        params.insert("Input".to_string(), serde_json::to_string(inputs)?);
        if let Some(text_type) = text_type {
            params.insert("TextType".to_string(), text_type.as_str().to_string());
        }

        let response: PopResponse<EmbeddingsData> =
            self.call("CreateTextEmbeddings", params).await?;
        if !response.body.success {
            return Err(Error::Pop {
                action: "CreateTextEmbeddings".to_string(),
                code: response.body.code.clone().unwrap_or_default(),
                message: response.body.message.clone().unwrap_or_default(),
                request_id: response.request_id(),
            });
        }

        Ok(response
            .body
            .data
            .map(|data| data.embeddings)
            .unwrap_or_default())
    }

    /// Issue a signed RPC call
    ///
    /// A non-2xx status is an error; a 2xx envelope is returned as-is for the
    /// caller to inspect its success flag.
    pub async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: BTreeMap<String, String>,
    ) -> Result<PopResponse<T>> {
        let mut url = self.base_url()?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(Error::config(format!("identity endpoint has no host: {url}"))),
        };
        url.set_path("/");
        url.set_query(Some(&signature::canonical_query(&params)));

        let payload_hash = signature::sha256_hex(b"");
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host);
        headers.insert("x-acs-action".to_string(), action.to_string());
        headers.insert("x-acs-content-sha256".to_string(), payload_hash.clone());
        headers.insert(
            "x-acs-date".to_string(),
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        );
        headers.insert(
            "x-acs-signature-nonce".to_string(),
            Uuid::new_v4().simple().to_string(),
        );
        headers.insert("x-acs-version".to_string(), API_VERSION.to_string());

        let authorization = signature::authorization(
            &self.credentials.access_key_id,
            self.credentials.access_key_secret(),
            &CanonicalRequest {
                method: "POST",
                path: "/",
                query: &params,
                headers: &headers,
                payload_hash: &payload_hash,
            },
        )?;

        let mut request = self.client.post(url).header(AUTHORIZATION, authorization);
        // reqwest derives `host` from the URL
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            request = request.header(name.as_str(), value.as_str());
        }

        debug!(action, "calling identity service");
        let response = request.send().await?;

        let status = response.status();
        let request_id_header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await?;

        if !status.is_success() {
            debug!(action, %status, request_id = ?request_id_header, "identity service call failed");
            return Err(Error::status(status, body));
        }

        Ok(PopResponse {
            request_id_header,
            body: serde_json::from_str(&body)?,
        })
    }

    fn base_url(&self) -> Result<Url> {
        let endpoint = self.credentials.resolved_endpoint();
        let raw = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };
        Url::parse(&raw)
            .map_err(|e| Error::config(format!("invalid identity endpoint {endpoint}: {e}")))
    }
}

impl std::fmt::Debug for PopClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PopClient")
            .field("credentials", &self.credentials)
            .finish()
    }
}
