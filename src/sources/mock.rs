//! Mock transport for testing purposes.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::sources::SourceError;
use crate::utils::{Transport, TransportResponse};

/// A request seen by the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone)]
enum Reply {
    Ok(TransportResponse),
    Status(u16),
}

/// A transport that answers from canned responses and records every request.
///
/// Responses are routed by URL substring; the first matching route wins. The
/// request body is included in the match text, so POST routes can match on
/// form parameters.
#[derive(Debug, Default)]
pub struct MockTransport {
    routes: Mutex<Vec<(String, Reply)>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Create a new mock transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer requests containing `pattern` with `body`.
    pub fn on(self, pattern: &str, body: impl Into<String>) -> Self {
        self.on_response(pattern, TransportResponse::new(body))
    }

    /// Answer requests containing `pattern` with a full response.
    pub fn on_response(self, pattern: &str, response: TransportResponse) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Ok(response)));
        self
    }

    /// Fail requests containing `pattern` with an HTTP status.
    pub fn fail(self, pattern: &str, status: u16) -> Self {
        self.routes
            .lock()
            .unwrap()
            .push((pattern.to_string(), Reply::Status(status)));
        self
    }

    /// All requests so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Number of requests whose URL or body contains `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url.contains(pattern) || r.body.as_deref().is_some_and(|b| b.contains(pattern)))
            .count()
    }

    fn answer(
        &self,
        method: &'static str,
        url: &str,
        body: Option<&str>,
    ) -> Result<TransportResponse, SourceError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.map(str::to_string),
        });

        let target = format!("{} {}", url, body.unwrap_or_default());
        let routes = self.routes.lock().unwrap();
        let reply = routes
            .iter()
            .find(|(pattern, _)| target.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Ok(response)) => Ok(response),
            Some(Reply::Status(429)) => Err(SourceError::RateLimit(None)),
            Some(Reply::Status(404)) => Err(SourceError::NotFound(url.to_string())),
            Some(Reply::Status(status)) => Err(SourceError::Api {
                status,
                message: "mock failure".to_string(),
            }),
            None => Err(SourceError::NotFound(format!("no mock route for {}", url))),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str) -> Result<TransportResponse, SourceError> {
        self.answer("GET", url, None)
    }

    async fn post(&self, url: &str, body: &str) -> Result<TransportResponse, SourceError> {
        self.answer("POST", url, Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_and_records() {
        let mock = MockTransport::new()
            .on("esearch", "<ids/>")
            .fail("efetch", 500);

        let response = mock.get("https://x/esearch.fcgi?term=a").await.unwrap();
        assert_eq!(response.body, "<ids/>");

        let err = mock.post("https://x/efetch.fcgi", "id=1").await.unwrap_err();
        assert!(matches!(err, SourceError::Api { status: 500, .. }));

        assert!(mock.get("https://x/elink.fcgi").await.is_err());

        assert_eq!(mock.request_count(), 3);
        assert_eq!(mock.count_matching("id=1"), 1);
        assert_eq!(mock.requests()[1].method, "POST");
    }
}
