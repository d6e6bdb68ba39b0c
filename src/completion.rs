//! Completion service client with streaming support

use crate::config::CompletionConfig;
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use crate::sse::CompletionStream;
use crate::token::TokenProvider;
use crate::types::{new_request_id, CompletionRequest, CompletionResponse};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

/// Path of the completion API, relative to the endpoint
pub const COMPLETIONS_PATH: &str = "/v2/app/completions";

/// Completion service client
///
/// Holds an already-resolved access token. Token refresh is the caller's
/// business: see [`crate::token::AccessTokenClient`].
pub struct CompletionClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: CompletionConfig,
    /// Bearer token
    token: SecretString,
}

impl CompletionClient {
    /// Create a new completion client with the given configuration and token
    pub fn new(config: CompletionConfig, token: impl Into<String>) -> Result<Self> {
        // No client-wide timeout: it would also cut off long-lived streams
        let client = Client::builder().build()?;

        Ok(Self {
            client,
            config,
            token: SecretString::from(token.into()),
        })
    }

    /// Create a client whose token is resolved once from `provider`
    pub async fn from_provider(
        config: CompletionConfig,
        provider: &dyn TokenProvider,
    ) -> Result<Self> {
        let token = provider.token().await?;
        Self::new(config, token.expose_secret())
    }

    /// Replace the bearer token, e.g. after a refresh
    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = SecretString::from(token.into());
    }

    /// Get the configuration
    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    /// Build an authenticated completion request
    ///
    /// Assigns a correlation id when the request has none and forces the
    /// request's stream flag to `streaming`.
    pub fn build_request(
        &self,
        request: &mut CompletionRequest,
        streaming: bool,
    ) -> Result<reqwest::Request> {
        if request.request_id.is_empty() {
            request.request_id = new_request_id();
        }
        request.stream = streaming;

        let url = format!("{}{}", self.config.resolved_endpoint(), COMPLETIONS_PATH);
        let body = serde_json::to_vec(request)?;

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8")
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.token.expose_secret()),
            );
        if streaming {
            builder = builder.header(ACCEPT, "text/event-stream");
        }

        Ok(builder.body(body).build()?)
    }

    /// Send a completion request
    ///
    /// A response with `success == false` is returned as `Ok`; only transport,
    /// status and decode failures are errors.
    pub async fn complete(&self, mut request: CompletionRequest) -> Result<CompletionResponse> {
        let mut http_request = self.build_request(&mut request, false)?;
        *http_request.timeout_mut() = Some(self.config.timeout);

        debug!(request_id = %request.request_id, "sending completion request");
        let response = self.client.execute(http_request).await?;

        let status = response.status();
        let body = response.text().await?;
        if status != StatusCode::OK {
            debug!(request_id = %request.request_id, %status, "completion request failed");
            return Err(Error::status(status, body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// Stream a completion request
    ///
    /// Returns once the initial status has been checked; the connection
    /// stays open until the returned stream ends or is dropped.
    pub async fn stream(&self, mut request: CompletionRequest) -> Result<CompletionStream> {
        let http_request = self.build_request(&mut request, true)?;

        debug!(request_id = %request.request_id, "sending stream completion request");
        let response = self.client.execute(http_request).await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await?;
            debug!(request_id = %request.request_id, %status, "stream completion request failed");
            return Err(Error::status(status, body));
        }

        Ok(CompletionStream::from_body(response.bytes_stream()))
    }
}

impl std::fmt::Debug for CompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionClient")
            .field("config", &self.config)
            .field("token", &"***REDACTED***")
            .finish()
    }
}

#[async_trait]
impl LlmClient for CompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        CompletionClient::complete(self, request).await
    }

    async fn stream(&self, request: CompletionRequest) -> Result<CompletionStream> {
        CompletionClient::stream(self, request).await
    }

    fn client_type(&self) -> &str {
        "bailian"
    }

    fn endpoint(&self) -> &str {
        self.config.resolved_endpoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::StaticToken;
    use futures::StreamExt;
    use mockito::Matcher;
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    fn client_for(server: &mockito::ServerGuard) -> CompletionClient {
        CompletionClient::new(CompletionConfig::new().with_endpoint(server.url()), "tok-1").unwrap()
    }

    fn body_json(request: &reqwest::Request) -> serde_json::Value {
        let bytes = request.body().and_then(|body| body.as_bytes()).unwrap();
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn test_build_request_headers_and_url() {
        let client = CompletionClient::new(CompletionConfig::new(), "tok-1").unwrap();
        let mut request = CompletionRequest::new("app-1", "hello");

        let unary = client.build_request(&mut request, false).unwrap();
        assert_eq!(unary.method(), &reqwest::Method::POST);
        assert_eq!(unary.url().as_str(), "https://bailian.aliyuncs.com/v2/app/completions");
        assert_eq!(unary.headers()[CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(unary.headers()[AUTHORIZATION], "Bearer tok-1");
        assert!(unary.headers().get(ACCEPT).is_none());

        let streaming = client.build_request(&mut request, true).unwrap();
        assert_eq!(streaming.headers()[ACCEPT], "text/event-stream");
        assert_eq!(streaming.headers()[AUTHORIZATION], "Bearer tok-1");
    }

    #[test]
    fn test_build_request_generates_request_id() {
        let client = CompletionClient::new(CompletionConfig::new(), "tok").unwrap();
        let mut request = CompletionRequest::new("app-1", "hello");

        let built = client.build_request(&mut request, false).unwrap();
        assert_eq!(request.request_id.len(), 32);
        assert!(!request.request_id.contains('-'));
        assert_eq!(body_json(&built)["RequestId"], request.request_id.as_str());

        // A second build keeps the id it was given
        let first = request.request_id.clone();
        client.build_request(&mut request, false).unwrap();
        assert_eq!(request.request_id, first);
    }

    #[test]
    fn test_build_request_keeps_caller_request_id() {
        let client = CompletionClient::new(CompletionConfig::new(), "tok").unwrap();
        let mut request = CompletionRequest::new("app-1", "hello").with_request_id("my-trace-id");

        let built = client.build_request(&mut request, true).unwrap();
        assert_eq!(request.request_id, "my-trace-id");
        assert_eq!(body_json(&built)["RequestId"], "my-trace-id");
    }

    #[test]
    fn test_build_request_stream_flag_matches_mode() {
        let client = CompletionClient::new(CompletionConfig::new(), "tok").unwrap();

        let mut request = CompletionRequest::new("app-1", "hello");
        request.stream = true;
        let built = client.build_request(&mut request, false).unwrap();
        assert_eq!(body_json(&built)["Stream"], false);
        assert!(!request.stream);

        let built = client.build_request(&mut request, true).unwrap();
        assert_eq!(body_json(&built)["Stream"], true);
    }

    #[test]
    fn test_build_request_malformed_endpoint() {
        let client =
            CompletionClient::new(CompletionConfig::new().with_endpoint("not a url"), "tok").unwrap();
        let mut request = CompletionRequest::new("app-1", "hello");

        let err = client.build_request(&mut request, false).unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_complete_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", COMPLETIONS_PATH)
            .match_header("authorization", "Bearer tok-1")
            .match_header("content-type", "application/json; charset=utf-8")
            .match_body(Matcher::PartialJson(json!({"AppId": "app-1", "Stream": false})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Success":true,"RequestId":"r1","Data":{"ResponseId":"x","Text":"hi"}}"#)
            .create_async()
            .await;

        let response = client_for(&server)
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.text(), Some("hi"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_complete_returns_failed_envelope_as_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(200)
            .with_body(r#"{"Success":false,"Code":"InvalidApiKey","Message":"bad token","RequestId":"r2"}"#)
            .create_async()
            .await;

        let response = client_for(&server)
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap();

        assert!(!response.success);
        assert_eq!(response.code.as_deref(), Some("InvalidApiKey"));
        assert_eq!(response.message.as_deref(), Some("bad token"));
    }

    #[tokio::test]
    async fn test_complete_non_200_keeps_raw_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(401)
            .with_body(r#"{"Success":false,"Message":"token expired"}"#)
            .create_async()
            .await;

        let err = client_for(&server)
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap_err();

        match err {
            Error::Status { status, ref body } => {
                assert_eq!(status, 401);
                assert_eq!(body, r#"{"Success":false,"Message":"token expired"}"#);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("token expired"));
    }

    #[tokio::test]
    async fn test_complete_non_json_error_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let err = client_for(&server)
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(502));
        assert!(err.to_string().contains("<html>Bad Gateway</html>"));
    }

    #[tokio::test]
    async fn test_complete_decode_failure_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server)
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_complete_times_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(200)
            .with_chunked_body(|writer| {
                std::thread::sleep(Duration::from_millis(500));
                writer.write_all(br#"{"Success":true}"#)
            })
            .create_async()
            .await;

        let config = CompletionConfig::new()
            .with_endpoint(server.url())
            .with_timeout(Duration::from_millis(50));
        let client = CompletionClient::new(config, "tok").unwrap();

        let err = client
            .complete(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Http(_)));
    }

    #[tokio::test]
    async fn test_stream_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", COMPLETIONS_PATH)
            .match_header("accept", "text/event-stream")
            .match_header("authorization", "Bearer tok-1")
            .match_body(Matcher::PartialJson(json!({"Stream": true})))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"Success\":true,\"Data\":{\"Text\":\"Hel\"}}\n\n",
                "data: {\"error\":\"ignored\"}\n\n",
                "data: {\"Success\":true,\"Data\":{\"Text\":\"Hello\"}}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let stream = client_for(&server)
            .stream(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap();

        let texts: Vec<String> = stream
            .map(|item| item.unwrap().text().unwrap_or_default().to_string())
            .collect()
            .await;
        assert_eq!(texts, vec!["Hel", "Hello"]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_stream_non_200_is_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let err = client_for(&server)
            .stream(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), Some(429));
        assert_eq!(
            err.to_string(),
            "Failed to complete request, code: 429, message: rate limited"
        );
    }

    #[tokio::test]
    async fn test_stream_ignores_unary_timeout() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .with_status(200)
            .with_chunked_body(|writer| {
                writer.write_all(b"data: {\"Success\":true,\"Data\":{\"Text\":\"a\"}}\n")?;
                std::thread::sleep(Duration::from_millis(300));
                writer.write_all(b"data: {\"Success\":true,\"Data\":{\"Text\":\"b\"}}\ndata: [DONE]\n")
            })
            .create_async()
            .await;

        let config = CompletionConfig::new()
            .with_endpoint(server.url())
            .with_timeout(Duration::from_millis(50));
        let client = CompletionClient::new(config, "tok").unwrap();

        let items: Vec<_> = client
            .stream(CompletionRequest::new("app-1", "hello"))
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(|item| item.is_ok()));
    }

    #[tokio::test]
    async fn test_from_provider_and_trait_object() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", COMPLETIONS_PATH)
            .match_header("authorization", "Bearer static-token")
            .with_status(200)
            .with_body(r#"{"Success":true,"Data":{"Text":"ok"}}"#)
            .create_async()
            .await;

        let provider = StaticToken::new("static-token");
        let client = CompletionClient::from_provider(
            CompletionConfig::new().with_endpoint(server.url()),
            &provider,
        )
        .await
        .unwrap();

        let client: Arc<dyn LlmClient> = Arc::new(client);
        assert_eq!(client.client_type(), "bailian");
        assert_eq!(client.endpoint(), server.url());

        let response = client.complete(CompletionRequest::new("app-1", "hi")).await.unwrap();
        assert_eq!(response.text(), Some("ok"));
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = CompletionClient::new(CompletionConfig::new(), "very-secret-token").unwrap();
        assert!(!format!("{:?}", client).contains("very-secret-token"));
    }
}
