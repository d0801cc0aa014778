//! Microsoft Graph client
//!
//! Adds a current bearer token to every request and replays a request once
//! after a `401`, using a token renewed through the
//! [`AccessTokenProvider`]. Retries of transient failures and throttling are
//! the transport's job (see `bridge_desktop::ReqwestHttpClient`).

use crate::error::{GraphError, Result};
use crate::types::ErrorEnvelope;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::AccessTokenProvider;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Microsoft Graph v1.0 endpoint
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct GraphClient {
    http_client: Arc<dyn HttpClient>,
    tokens: Arc<dyn AccessTokenProvider>,
    base_url: String,
}

impl GraphClient {
    pub fn new(http_client: Arc<dyn HttpClient>, tokens: Arc<dyn AccessTokenProvider>) -> Self {
        Self {
            http_client,
            tokens,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Point the client at another Graph-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Build a request against a Graph path such as `/sites/root`.
    pub fn request(&self, method: HttpMethod, path: &str) -> HttpRequest {
        HttpRequest::new(method, self.url(path))
            .header("Accept", "application/json")
            .timeout(DEFAULT_TIMEOUT)
    }

    /// Send with a bearer token. Any status is returned as a response except
    /// a `401` that survives one token renewal.
    #[instrument(skip(self, request), fields(method = request.method.as_str(), url = %request.url))]
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let token = self.tokens.access_token().await?;
        let response = self
            .http_client
            .execute(request.clone().bearer_token(token.as_str()))
            .await?;

        if response.status != 401 {
            return Ok(response);
        }

        warn!("Graph rejected the access token, renewing once");
        let renewed = self.tokens.refresh_after_rejection(&token).await?;
        let response = self
            .http_client
            .execute(request.bearer_token(renewed))
            .await?;

        if response.status == 401 {
            return Err(GraphError::Unauthorized(describe(&response)));
        }
        Ok(response)
    }

    /// Send without credentials, for pre-authenticated upload URLs.
    pub async fn execute_anonymous(&self, request: HttpRequest) -> Result<HttpResponse> {
        Ok(self.http_client.execute(request).await?)
    }

    /// GET a Graph path and decode a successful JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, resource: &str) -> Result<T> {
        let response = self.execute(self.request(HttpMethod::Get, path)).await?;
        let response = ensure_success(response, resource)?;
        parse(&response)
    }
}

/// Turn a non-success response into the matching [`GraphError`].
pub fn ensure_success(response: HttpResponse, resource: &str) -> Result<HttpResponse> {
    if response.is_success() {
        return Ok(response);
    }

    let message = describe(&response);
    debug!(status = response.status, resource, "Graph request failed");
    Err(match response.status {
        401 => GraphError::Unauthorized(message),
        403 => GraphError::Forbidden(message),
        404 => GraphError::NotFound {
            resource: resource.to_string(),
        },
        409 => GraphError::Conflict(message),
        429 | 503 => GraphError::Throttled {
            status_code: response.status,
            retry_after_seconds: response.retry_after().map(|d| d.as_secs()),
        },
        status_code => GraphError::Api {
            status_code,
            message,
        },
    })
}

pub fn parse<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    response
        .json()
        .map_err(|e| GraphError::Parse(e.to_string()))
}

fn describe(response: &HttpResponse) -> String {
    match serde_json::from_slice::<ErrorEnvelope>(&response.body) {
        Ok(envelope) => format!("{}: {}", envelope.error.code, envelope.error.message),
        Err(_) => {
            let text = String::from_utf8_lossy(&response.body);
            let text = text.trim();
            if text.is_empty() {
                format!("HTTP {}", response.status)
            } else {
                text.chars().take(200).collect()
            }
        }
    }
}

/// Percent-encode each segment of a `/`-separated drive path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use core_auth::Result as AuthResult;
    use mockall::{mock, Sequence};

    mock! {
        pub Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    mock! {
        pub Tokens {}

        #[async_trait]
        impl AccessTokenProvider for Tokens {
            async fn access_token(&self) -> AuthResult<String>;
            async fn refresh_after_rejection(&self, rejected_token: &str) -> AuthResult<String>;
        }
    }

    fn bearer(request: &HttpRequest) -> Option<&str> {
        request.header_value("Authorization")
    }

    #[tokio::test]
    async fn test_adds_bearer_token() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| bearer(req) == Some("Bearer at-1") && req.url.ends_with("/sites/root"))
            .times(1)
            .returning(|_| Ok(HttpResponse::new(200, r#"{"id":"site-1"}"#)));

        let mut tokens = MockTokens::new();
        tokens
            .expect_access_token()
            .times(1)
            .returning(|| Ok("at-1".to_string()));
        tokens.expect_refresh_after_rejection().never();

        let client = GraphClient::new(Arc::new(http), Arc::new(tokens));
        let site: crate::types::Site = client.get_json("/sites/root", "site").await.unwrap();
        assert_eq!(site.id, "site-1");
    }

    #[tokio::test]
    async fn test_single_replay_after_401() {
        let mut seq = Sequence::new();
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| bearer(req) == Some("Bearer stale"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(401, "")));
        http.expect_execute()
            .withf(|req| bearer(req) == Some("Bearer fresh"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(HttpResponse::new(200, "{}")));

        let mut tokens = MockTokens::new();
        tokens
            .expect_access_token()
            .returning(|| Ok("stale".to_string()));
        tokens
            .expect_refresh_after_rejection()
            .withf(|token| token == "stale")
            .times(1)
            .returning(|_| Ok("fresh".to_string()));

        let client = GraphClient::new(Arc::new(http), Arc::new(tokens));
        let response = client
            .execute(client.request(HttpMethod::Get, "/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_second_401_is_unauthorized() {
        let mut http = MockHttp::new();
        http.expect_execute().times(2).returning(|_| {
            Ok(HttpResponse::new(
                401,
                r#"{"error":{"code":"InvalidAuthenticationToken","message":"expired"}}"#,
            ))
        });

        let mut tokens = MockTokens::new();
        tokens.expect_access_token().returning(|| Ok("a".to_string()));
        tokens
            .expect_refresh_after_rejection()
            .times(1)
            .returning(|_| Ok("b".to_string()));

        let client = GraphClient::new(Arc::new(http), Arc::new(tokens));
        let err = client
            .execute(client.request(HttpMethod::Get, "/me"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::Unauthorized(ref m) if m.contains("InvalidAuthenticationToken")));
    }

    #[tokio::test]
    async fn test_anonymous_has_no_token() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .withf(|req| bearer(req).is_none())
            .times(1)
            .returning(|_| Ok(HttpResponse::new(202, "{}")));

        let client = GraphClient::new(Arc::new(http), Arc::new(MockTokens::new()));
        let request = HttpRequest::new(HttpMethod::Put, "https://upload.example/session/1");
        assert_eq!(client.execute_anonymous(request).await.unwrap().status, 202);
    }

    #[test]
    fn test_status_mapping() {
        let not_found = ensure_success(HttpResponse::new(404, ""), "folder Docs").unwrap_err();
        assert!(matches!(not_found, GraphError::NotFound { ref resource } if resource == "folder Docs"));

        let throttled = ensure_success(
            HttpResponse::new(429, "").with_header("Retry-After", "12"),
            "upload",
        )
        .unwrap_err();
        assert!(matches!(
            throttled,
            GraphError::Throttled {
                status_code: 429,
                retry_after_seconds: Some(12)
            }
        ));

        let api = ensure_success(
            HttpResponse::new(400, r#"{"error":{"code":"invalidRequest","message":"bad"}}"#),
            "x",
        )
        .unwrap_err();
        assert_eq!(api.to_string(), "Microsoft Graph error (status 400): invalidRequest: bad");
    }

    #[test]
    fn test_encode_path() {
        assert_eq!(encode_path("Shared Docs/Q1 #1/a.md"), "Shared%20Docs/Q1%20%231/a.md");
        assert_eq!(encode_path("/a//b/"), "a/b");
    }
}
