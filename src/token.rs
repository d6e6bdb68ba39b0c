//! Access token acquisition and caching
//!
//! Tokens are cached per [`AccessTokenClient`] and refreshed once the current
//! one is within the refresh skew of its expiry. By default concurrent callers
//! that all see a stale token may each refresh it and the last write wins;
//! [`AccessTokenClient::with_single_flight`] serialises refreshes instead.

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::pop::{PopClient, PopResponse, TokenData};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use secrecy::SecretString;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default margin before expiry at which a token is refreshed
pub const DEFAULT_REFRESH_SKEW: Duration = Duration::from_secs(600);

/// Source of bearer tokens for completion calls
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get a currently valid token
    async fn token(&self) -> Result<SecretString>;
}

/// Performs the token creation call against the identity service
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Create a new token
    async fn issue_token(&self) -> Result<PopResponse<TokenData>>;
}

#[async_trait]
impl TokenIssuer for PopClient {
    async fn issue_token(&self) -> Result<PopResponse<TokenData>> {
        self.create_token().await
    }
}

/// A cached token and its expiry
#[derive(Clone)]
pub struct TokenRecord {
    /// Token value
    pub value: SecretString,
    /// Expiry as Unix epoch seconds
    pub expires_at: i64,
}

impl TokenRecord {
    /// Whether the token may still be used at `now`, given the refresh skew
    pub fn is_fresh(&self, now: i64, skew_secs: i64) -> bool {
        now < self.expires_at.saturating_sub(skew_secs)
    }
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("value", &"***REDACTED***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token provider backed by the identity service, with a local cache
pub struct AccessTokenClient<I = PopClient> {
    issuer: I,
    cache: RwLock<Option<TokenRecord>>,
    refresh_skew: Duration,
    refresh_lock: Option<Mutex<()>>,
}

impl AccessTokenClient<PopClient> {
    /// Create a token client for the given credentials
    pub fn new(credentials: Credentials) -> Result<Self> {
        Ok(Self::with_issuer(PopClient::new(credentials)?))
    }

    /// Create a token client from environment credentials
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_issuer(PopClient::from_env()?))
    }
}

impl<I: TokenIssuer> AccessTokenClient<I> {
    /// Create a token client over any issuer
    pub fn with_issuer(issuer: I) -> Self {
        Self {
            issuer,
            cache: RwLock::new(None),
            refresh_skew: DEFAULT_REFRESH_SKEW,
            refresh_lock: None,
        }
    }

    /// Set the margin before expiry at which tokens are refreshed
    pub fn with_refresh_skew(mut self, skew: Duration) -> Self {
        self.refresh_skew = skew;
        self
    }

    /// Allow at most one refresh in flight; other callers wait for its result
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.refresh_lock = enabled.then(|| Mutex::new(()));
        self
    }

    /// Get the issuer
    pub fn issuer(&self) -> &I {
        &self.issuer
    }

    /// Return the cached token, creating a new one if it is missing or stale
    pub async fn get_token(&self) -> Result<SecretString> {
        if let Some(token) = self.fresh_token() {
            return Ok(token);
        }

        match &self.refresh_lock {
            Some(lock) => {
                let _guard = lock.lock().await;
                if let Some(token) = self.fresh_token() {
                    return Ok(token);
                }
                self.refresh().await
            }
            None => self.refresh().await,
        }
    }

    /// Create a token without consulting or updating the cache
    pub async fn create_token(&self) -> Result<TokenRecord> {
        let response = self.issuer.issue_token().await?;

        if !response.body.success {
            let request_id = response.request_id();
            let message = response.body.message.unwrap_or_default();
            warn!(%request_id, %message, "token creation rejected");
            return Err(Error::token_creation(message, request_id));
        }

        let request_id = response.request_id();
        let data = response
            .body
            .data
            .ok_or_else(|| Error::token_creation("response carried no token", request_id))?;

        Ok(TokenRecord {
            value: SecretString::from(data.token),
            expires_at: data.expired_time,
        })
    }

    /// The cached record, fresh or not
    pub fn cached(&self) -> Option<TokenRecord> {
        self.cache.read().clone()
    }

    /// Drop the cached token so the next call creates a new one
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    fn fresh_token(&self) -> Option<SecretString> {
        let now = Utc::now().timestamp();
        let skew = i64::try_from(self.refresh_skew.as_secs()).unwrap_or(i64::MAX);
        self.cache
            .read()
            .as_ref()
            .filter(|record| record.is_fresh(now, skew))
            .map(|record| record.value.clone())
    }

    async fn refresh(&self) -> Result<SecretString> {
        let record = self.create_token().await?;
        debug!(expires_at = record.expires_at, "created access token");

        let token = record.value.clone();
        *self.cache.write() = Some(record);
        Ok(token)
    }
}

impl<I> std::fmt::Debug for AccessTokenClient<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessTokenClient")
            .field("cache", &*self.cache.read())
            .field("refresh_skew", &self.refresh_skew)
            .field("single_flight", &self.refresh_lock.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<I: TokenIssuer> TokenProvider for AccessTokenClient<I> {
    async fn token(&self) -> Result<SecretString> {
        self.get_token().await
    }
}

/// A fixed token, for callers that obtain tokens elsewhere
#[derive(Clone)]
pub struct StaticToken(SecretString);

impl StaticToken {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self(SecretString::from(token.into()))
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticToken(***REDACTED***)")
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<SecretString> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pop::{PopEnvelope, REQUEST_ID_HEADER};
    use secrecy::ExposeSecret;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type Reply = Result<PopResponse<TokenData>>;

    /// Issuer that replays canned replies and counts calls
    #[derive(Default)]
    struct MockIssuer {
        calls: AtomicUsize,
        replies: parking_lot::Mutex<VecDeque<Reply>>,
        fallback_expiry_offset: Option<i64>,
        delay: Option<Duration>,
    }

    impl MockIssuer {
        /// Every call issues `tok-N` expiring `offset` seconds from now
        fn expiring_in(offset: i64) -> Self {
            Self {
                fallback_expiry_offset: Some(offset),
                ..Default::default()
            }
        }

        fn with_replies(replies: Vec<Reply>) -> Self {
            Self {
                replies: parking_lot::Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn success(token: &str, expired_time: i64) -> Reply {
        Ok(PopResponse {
            request_id_header: None,
            body: PopEnvelope {
                success: true,
                code: None,
                message: None,
                request_id: Some("req".to_string()),
                data: Some(TokenData {
                    token: token.to_string(),
                    expired_time,
                }),
            },
        })
    }

    #[async_trait]
    impl TokenIssuer for MockIssuer {
        async fn issue_token(&self) -> Result<PopResponse<TokenData>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(reply) = self.replies.lock().pop_front() {
                return reply;
            }
            let offset = self.fallback_expiry_offset.expect("no reply left");
            success(&format!("tok-{n}"), Utc::now().timestamp() + offset)
        }
    }

    #[test]
    fn test_record_freshness() {
        let record = TokenRecord {
            value: SecretString::from("t".to_string()),
            expires_at: 10_000,
        };
        assert!(record.is_fresh(9_399, 600));
        assert!(!record.is_fresh(9_400, 600));
        assert!(!record.is_fresh(20_000, 600));
        assert!(record.is_fresh(9_999, 0));
    }

    #[tokio::test]
    async fn test_fresh_token_is_cached() {
        let client = AccessTokenClient::with_issuer(MockIssuer::expiring_in(3600));

        let first = client.get_token().await.unwrap();
        let second = client.get_token().await.unwrap();

        assert_eq!(first.expose_secret(), "tok-1");
        assert_eq!(second.expose_secret(), "tok-1");
        assert_eq!(client.issuer().calls(), 1);
    }

    #[tokio::test]
    async fn test_token_within_skew_is_refreshed() {
        let client = AccessTokenClient::with_issuer(MockIssuer::expiring_in(300));

        let first = client.get_token().await.unwrap();
        assert_eq!(client.issuer().calls(), 1);

        let second = client.get_token().await.unwrap();
        assert_eq!(client.issuer().calls(), 2);
        assert_eq!(first.expose_secret(), "tok-1");
        assert_eq!(second.expose_secret(), "tok-2");
        assert_eq!(client.cached().unwrap().value.expose_secret(), "tok-2");
    }

    #[tokio::test]
    async fn test_custom_skew() {
        let client = AccessTokenClient::with_issuer(MockIssuer::expiring_in(300))
            .with_refresh_skew(Duration::from_secs(60));

        client.get_token().await.unwrap();
        client.get_token().await.unwrap();
        assert_eq!(client.issuer().calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_cache_untouched() {
        let stale = Utc::now().timestamp() + 10;
        let client = AccessTokenClient::with_issuer(MockIssuer::with_replies(vec![
            success("old", stale),
            Err(Error::status(reqwest::StatusCode::SERVICE_UNAVAILABLE, "down")),
        ]));

        client.get_token().await.unwrap();
        let err = client.get_token().await.unwrap_err();

        assert_eq!(err.status_code(), Some(503));
        let cached = client.cached().unwrap();
        assert_eq!(cached.value.expose_secret(), "old");
        assert_eq!(cached.expires_at, stale);
    }

    #[tokio::test]
    async fn test_rejected_envelope_uses_header_request_id() {
        let client = AccessTokenClient::with_issuer(MockIssuer::with_replies(vec![Ok(
            PopResponse {
                request_id_header: Some("hdr-9".to_string()),
                body: PopEnvelope {
                    success: false,
                    code: Some("Forbidden".to_string()),
                    message: Some("agent key disabled".to_string()),
                    request_id: None,
                    data: None,
                },
            },
        )]));

        let err = client.get_token().await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to create token, reason: agent key disabled RequestId: hdr-9"
        );
        assert!(client.cached().is_none());
    }

    #[tokio::test]
    async fn test_success_without_data_is_error() {
        let client = AccessTokenClient::with_issuer(MockIssuer::with_replies(vec![Ok(
            PopResponse {
                request_id_header: None,
                body: PopEnvelope {
                    success: true,
                    code: None,
                    message: None,
                    request_id: Some("r-1".to_string()),
                    data: None,
                },
            },
        )]));

        let err = client.get_token().await.unwrap_err();
        assert!(matches!(err, Error::TokenCreation { ref request_id, .. } if request_id == "r-1"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let client = AccessTokenClient::with_issuer(MockIssuer::expiring_in(3600));

        client.get_token().await.unwrap();
        client.invalidate();
        let token = client.get_token().await.unwrap();

        assert_eq!(token.expose_secret(), "tok-2");
        assert_eq!(client.issuer().calls(), 2);
    }

    #[tokio::test]
    async fn test_single_flight_refreshes_once() {
        let issuer = MockIssuer {
            delay: Some(Duration::from_millis(50)),
            ..MockIssuer::expiring_in(3600)
        };
        let client = Arc::new(AccessTokenClient::with_issuer(issuer).with_single_flight(true));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.get_token().await })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().expose_secret(), "tok-1");
        }

        assert_eq!(client.issuer().calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_without_single_flight_still_succeeds() {
        let issuer = MockIssuer {
            delay: Some(Duration::from_millis(20)),
            ..MockIssuer::expiring_in(3600)
        };
        let client = Arc::new(AccessTokenClient::with_issuer(issuer));

        let (a, b) = tokio::join!(client.get_token(), client.get_token());
        assert!(a.is_ok() && b.is_ok());

        let calls = client.issuer().calls();
        assert!((1..=2).contains(&calls));
        // Whichever refresh finished last owns the cache
        let cached = client.cached().unwrap();
        assert!(cached.value.expose_secret().starts_with("tok-"));
    }

    #[tokio::test]
    async fn test_static_token_provider() {
        let provider: Box<dyn TokenProvider> = Box::new(StaticToken::new("fixed"));
        assert_eq!(provider.token().await.unwrap().expose_secret(), "fixed");
        assert!(!format!("{:?}", StaticToken::new("fixed")).contains("fixed"));
    }

    #[tokio::test]
    async fn test_end_to_end_with_identity_service() {
        let mut server = mockito::Server::new_async().await;
        let expires = Utc::now().timestamp() + 86_400;
        let mock = server
            .mock("POST", "/")
            .match_query(mockito::Matcher::UrlEncoded("AgentKey".into(), "agent-1".into()))
            .match_header("x-acs-action", "CreateToken")
            .with_status(200)
            .with_header(REQUEST_ID_HEADER, "hdr-1")
            .with_body(format!(
                r#"{{"Success":true,"Data":{{"Token":"live-token","ExpiredTime":{expires}}}}}"#
            ))
            .expect(1)
            .create_async()
            .await;

        let credentials = Credentials::new("LTAI-id", "secret", "agent-1").with_endpoint(server.url());
        let client = AccessTokenClient::new(credentials).unwrap();

        assert_eq!(client.get_token().await.unwrap().expose_secret(), "live-token");
        assert_eq!(client.token().await.unwrap().expose_secret(), "live-token");
        assert_eq!(client.cached().unwrap().expires_at, expires);
        mock.assert_async().await;
    }
}
