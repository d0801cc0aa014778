//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy},
};
use rand::Rng;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::circuit::{CircuitBreaker, CircuitState};

/// Reqwest-based HTTP client implementation
///
/// Provides HTTP operations with:
/// - Connection pooling via reqwest
/// - Retry of timeouts, connect errors, 5xx and 429 with exponential backoff and full jitter
/// - `Retry-After` honoured on throttled responses
/// - A circuit breaker that fails fast after sustained throttling
///
/// When retries are exhausted on a retryable *status*, the last response is
/// returned so callers can map it; transport failures surface as errors.
pub struct ReqwestHttpClient {
    client: Client,
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(120))
    }

    /// Create a new HTTP client with custom timeout
    ///
    /// Chunk uploads can be slow on poor links, hence the generous default.
    pub fn with_timeout(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(16)
            .user_agent(concat!("docpub/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default reqwest client");
                Client::new()
            });

        Self::with_client(client)
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    /// Replace the policy used by [`HttpClient::execute`].
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Arc::new(breaker);
        self
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> reqwest::Method {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: &HttpRequest) -> reqwest::RequestBuilder {
        let method = Self::convert_method(request.method);
        let mut req = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = &request.body {
            req = req.body(body.clone());
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        req
    }

    async fn read_response(response: reqwest::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response.bytes().await.map_err(Self::map_transport_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    fn map_transport_error(e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout(e.to_string())
        } else if e.is_connect() {
            BridgeError::Connection(e.to_string())
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }

    fn jitter() -> f64 {
        rand::thread_rng().gen::<f64>()
    }

    /// Execute request with retry logic
    async fn execute_with_retry_internal(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if let CircuitState::Open { remaining } = self.breaker.state() {
                return Err(BridgeError::CircuitOpen(format!(
                    "service is throttling requests, retry in {}s",
                    remaining.as_secs().max(1)
                )));
            }

            debug!(
                attempt = attempt + 1,
                max_attempts,
                method = request.method.as_str(),
                url = %request.url,
                "Executing HTTP request"
            );

            let is_last = attempt + 1 >= max_attempts;

            let delay = match self.build_request(&request).send().await {
                Ok(raw) => {
                    let response = Self::read_response(raw).await?;

                    if response.is_throttled() {
                        self.breaker.record_throttled();
                    } else {
                        self.breaker.record_success();
                    }

                    let retryable = response.is_throttled() || response.is_server_error();
                    if !retryable || is_last {
                        return Ok(response);
                    }

                    warn!(
                        status = response.status,
                        attempt = attempt + 1,
                        "HTTP request failed with retryable status"
                    );
                    policy.delay_for(attempt, response.retry_after(), Self::jitter())
                }
                Err(e) => {
                    let error = Self::map_transport_error(e);
                    warn!(error = %error, attempt = attempt + 1, "HTTP request failed");

                    if !error.is_transient() || is_last {
                        return Err(error);
                    }
                    policy.delay_for(attempt, None, Self::jitter())
                }
            };

            debug!(delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.execute_with_retry(request, self.policy.clone()).await
    }

    async fn execute_with_retry(
        &self,
        request: HttpRequest,
        policy: RetryPolicy,
    ) -> Result<HttpResponse> {
        self.execute_with_retry_internal(request, policy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            use_jitter: true,
        }
    }

    #[tokio::test]
    async fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Patch),
            reqwest::Method::PATCH
        );
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/item"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().with_policy(fast_policy(4));
        let response = client
            .execute(HttpRequest::new(
                HttpMethod::Get,
                format!("{}/item", server.uri()),
            ))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text().unwrap(), "ok");
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_returns_last_response_when_retries_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().with_policy(fast_policy(2));
        let response = client
            .execute(HttpRequest::new(HttpMethod::Get, server.uri()))
            .await
            .unwrap();

        assert_eq!(response.status, 500);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("Content-Range", "bytes 0-3/4"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new().with_policy(fast_policy(4));
        let request = HttpRequest::new(HttpMethod::Put, server.uri())
            .header("Content-Range", "bytes 0-3/4")
            .body(bytes::Bytes::from_static(b"abcd"));
        let response = client.execute(request).await.unwrap();

        assert_eq!(response.status, 400);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_sustained_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .mount(&server)
            .await;

        let client = ReqwestHttpClient::new()
            .with_policy(fast_policy(1))
            .with_circuit_breaker(CircuitBreaker::new(2, Duration::from_secs(60)));

        for _ in 0..2 {
            let response = client
                .execute(HttpRequest::new(HttpMethod::Get, server.uri()))
                .await
                .unwrap();
            assert_eq!(response.status, 429);
        }

        let err = client
            .execute(HttpRequest::new(HttpMethod::Get, server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::CircuitOpen(_)));
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
