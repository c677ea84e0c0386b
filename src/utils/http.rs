//! HTTP transport used by the backend clients.
//!
//! [`Transport`] is the seam between the clients and the network. The
//! production [`HttpTransport`] wraps a shared reqwest client with a per-host
//! rate limiter and transient-error retries; tests substitute
//! [`crate::sources::MockTransport`].

use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::retry::{with_retry, RetryConfig};
use crate::sources::SourceError;

/// A successful HTTP response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportResponse {
    pub body: String,
    /// Header names are lower-case
    pub headers: HashMap<String, String>,
}

impl TransportResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Look up a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Minimal HTTP interface the backend clients are written against
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn get(&self, url: &str) -> Result<TransportResponse, SourceError>;

    /// POST a form-encoded body
    async fn post(&self, url: &str, body: &str) -> Result<TransportResponse, SourceError>;
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// reqwest-backed transport with rate limiting and retries
#[derive(Clone)]
pub struct HttpTransport {
    client: Arc<Client>,
    limiter: Option<Arc<DirectLimiter>>,
    retry: RetryConfig,
    headers: Vec<(String, String)>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("rate_limited", &self.limiter.is_some())
            .field("retry", &self.retry)
            .field(
                "headers",
                &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport with default settings
    pub fn new() -> Result<Self, SourceError> {
        Self::with_user_agent(concat!(
            env!("CARGO_PKG_NAME"),
            "/",
            env!("CARGO_PKG_VERSION")
        ))
    }

    /// Create a transport with a custom user agent
    pub fn with_user_agent(user_agent: &str) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SourceError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self::from_client(Arc::new(client)))
    }

    /// Create from an existing reqwest Client
    pub fn from_client(client: Arc<Client>) -> Self {
        Self {
            client,
            limiter: Some(Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(3u32))))),
            retry: RetryConfig::default(),
            headers: Vec::new(),
        }
    }

    /// Allow at most `requests_per_second`; zero disables limiting
    pub fn rate_limit(mut self, requests_per_second: u32) -> Self {
        self.limiter = NonZeroU32::new(requests_per_second)
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Send `name: value` with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse, SourceError> {
        with_retry(self.retry, || {
            let method = method.clone();
            async move {
                if let Some(limiter) = &self.limiter {
                    limiter.until_ready().await;
                }

                let mut request = self.client.request(method, url);
                for (name, value) in &self.headers {
                    request = request.header(name.as_str(), value.as_str());
                }
                if let Some(body) = body {
                    request = request
                        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                        .body(body.to_string());
                }

                tracing::debug!(%url, "HTTP request");
                let response = request.send().await?;
                Self::read_response(url, response).await
            }
        })
        .await
    }

    async fn read_response(
        url: &str,
        response: reqwest::Response,
    ) -> Result<TransportResponse, SourceError> {
        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers
                .get(RETRY_AFTER.as_str())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(SourceError::RateLimit(retry_after));
        }

        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Api {
                status: status.as_u16(),
                message: body.chars().take(300).collect(),
            });
        }

        Ok(TransportResponse { body, headers })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, SourceError> {
        self.execute(Method::GET, url, None).await
    }

    async fn post(&self, url: &str, body: &str) -> Result<TransportResponse, SourceError> {
        self.execute(Method::POST, url, Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new()
            .unwrap()
            .rate_limit(0)
            .retry(RetryConfig::none())
    }

    #[tokio::test]
    async fn test_get_returns_body_and_lowercase_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search")
            .with_status(200)
            .with_header("X-RateLimit-Remaining", "41")
            .with_body("hello")
            .create_async()
            .await;

        let response = transport()
            .get(&format!("{}/search", server.url()))
            .await
            .unwrap();

        assert_eq!(response.body, "hello");
        assert_eq!(response.header("x-ratelimit-remaining"), Some("41"));
        assert_eq!(response.header("X-RATELIMIT-REMAINING"), Some("41"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_sends_form_body_and_custom_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fetch")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_header("x-api-key", "secret")
            .match_body("id=1,2")
            .with_status(200)
            .with_body("<xml/>")
            .create_async()
            .await;

        let response = transport()
            .header("X-Api-Key", "secret")
            .post(&format!("{}/fetch", server.url()), "id=1,2")
            .await
            .unwrap();

        assert_eq!(response.body, "<xml/>");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_codes_map_to_errors() {
        let mut server = mockito::Server::new_async().await;
        let _limited = server
            .mock("GET", "/limited")
            .with_status(429)
            .with_header("Retry-After", "7")
            .create_async()
            .await;
        let _missing = server.mock("GET", "/missing").with_status(404).create_async().await;
        let _denied = server
            .mock("GET", "/denied")
            .with_status(401)
            .with_body("bad key")
            .create_async()
            .await;

        let transport = transport();
        let url = server.url();

        assert!(matches!(
            transport.get(&format!("{}/limited", url)).await,
            Err(SourceError::RateLimit(Some(7)))
        ));
        assert!(matches!(
            transport.get(&format!("{}/missing", url)).await,
            Err(SourceError::NotFound(_))
        ));
        match transport.get(&format!("{}/denied", url)).await {
            Err(SourceError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let transport = transport().retry(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(5),
        });

        let result = transport.get(&format!("{}/flaky", server.url())).await;
        assert!(matches!(result, Err(SourceError::Api { status: 503, .. })));
        mock.assert_async().await;
    }
}
