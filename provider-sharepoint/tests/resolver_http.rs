//! Repository resolution over real HTTP against a mock Graph server.

use async_trait::async_trait;
use bridge_desktop::ReqwestHttpClient;
use bridge_traits::RetryPolicy;
use core_auth::{AccessTokenProvider, Result as AuthResult};
use provider_sharepoint::{GraphClient, GraphError, RepositoryResolver};
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ADDRESS: &str = "https://contoso.test/sites/docs";

struct StaticTokens;

#[async_trait]
impl AccessTokenProvider for StaticTokens {
    async fn access_token(&self) -> AuthResult<String> {
        Ok("graph-token".to_string())
    }

    async fn refresh_after_rejection(&self, _rejected_token: &str) -> AuthResult<String> {
        Ok("graph-token".to_string())
    }
}

fn resolver(server: &MockServer, library: &str) -> RepositoryResolver {
    let http = ReqwestHttpClient::new().with_policy(RetryPolicy::no_retry());
    let client = GraphClient::new(Arc::new(http), Arc::new(StaticTokens))
        .with_base_url(format!("{}/v1.0", server.uri()));
    RepositoryResolver::new(Arc::new(client), ADDRESS, library)
}

async fn mount_site(server: &MockServer, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/contoso.test:/sites/docs"))
        .and(header("Authorization", "Bearer graph-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "contoso.test,site-guid,web-guid",
            "displayName": "Docs",
            "webUrl": ADDRESS
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_drives(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/contoso.test,site-guid,web-guid/drives"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "id": "d-shared", "name": "Documents" },
                { "id": "d-policies", "name": "Policies" }
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_resolves_named_library_once() {
    let server = MockServer::start().await;
    mount_site(&server, 1).await;
    mount_drives(&server).await;

    let resolver = resolver(&server, "policies");
    let first = resolver.resolve().await.unwrap();
    let second = resolver.resolve().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.site_id, "contoso.test,site-guid,web-guid");
    assert_eq!(first.drive_id, "d-policies");
    assert_eq!(first.drive_name, "Policies");
    assert!(!first.used_default_drive);
}

#[tokio::test]
async fn test_concurrent_resolution_shares_one_lookup() {
    let server = MockServer::start().await;
    mount_site(&server, 1).await;
    mount_drives(&server).await;

    let resolver = Arc::new(resolver(&server, "Documents"));
    let mut handles = Vec::new();
    for _ in 0..6 {
        let resolver = Arc::clone(&resolver);
        handles.push(tokio::spawn(async move { resolver.resolve().await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().drive_id, "d-shared");
    }
}

#[tokio::test]
async fn test_missing_library_falls_back_to_default_drive() {
    let server = MockServer::start().await;
    mount_site(&server, 1).await;
    mount_drives(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/contoso.test,site-guid,web-guid/drive"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "id": "d-shared", "name": "Documents" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let repository = resolver(&server, "Board Packs").resolve().await.unwrap();

    assert_eq!(repository.drive_id, "d-shared");
    assert!(repository.used_default_drive);
}

#[tokio::test]
async fn test_missing_site_is_not_found_and_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/contoso.test:/sites/docs"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "itemNotFound", "message": "Requested site could not be found" }
        })))
        .expect(2)
        .mount(&server)
        .await;

    let resolver = resolver(&server, "Documents");
    for _ in 0..2 {
        let err = resolver.resolve().await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }
}

#[tokio::test]
async fn test_forbidden_site_is_reported_as_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/sites/contoso.test:/sites/docs"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": "accessDenied", "message": "Access denied" }
        })))
        .mount(&server)
        .await;

    let err = resolver(&server, "Documents").resolve().await.unwrap_err();
    assert!(matches!(err, GraphError::Forbidden(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn test_verify_access_lists_one_child() {
    let server = MockServer::start().await;
    mount_site(&server, 1).await;
    mount_drives(&server).await;
    Mock::given(method("GET"))
        .and(path("/v1.0/drives/d-shared/root/children"))
        .and(query_param("$top", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "item-1", "name": "Welcome.docx" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repository = resolver(&server, "Documents").verify_access().await.unwrap();
    assert_eq!(repository.drive_name, "Documents");
}
