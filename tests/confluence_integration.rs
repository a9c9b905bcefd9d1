//! Integration tests for the REST client.
//!
//! These tests verify listing, pagination, auth detection and attachment
//! streaming against a mock HTTP server.

use std::time::Duration;

use serde_json::json;
use space_export_core::confluence::{ApiError, Attachment, ConfluenceClient, ContentApi};
use space_export_core::download::{Classify, FailureType};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// `user:pass` in base64.
const BASIC_AUTH: &str = "Basic dXNlcjpwYXNz";

fn client(server: &MockServer) -> ConfluenceClient {
    ConfluenceClient::new(&server.uri(), "user", "pass").expect("client should build")
}

fn page_json(id: usize, title: &str) -> serde_json::Value {
    json!({
        "id": id.to_string(),
        "title": title,
        "_links": { "webui": format!("/display/IPH/{title}") }
    })
}

#[tokio::test]
async fn test_root_pages_requests_root_depth_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/space/IPH/content/page"))
        .and(query_param("depth", "root"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [page_json(101, "IPH")],
            "_links": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let roots = client(&server)
        .root_pages("IPH")
        .await
        .expect("listing should succeed");

    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].id, "101");
    assert_eq!(roots[0].title, "IPH");
    assert_eq!(roots[0].parent_id, None);
    assert_eq!(roots[0].webui.as_deref(), Some("/display/IPH/IPH"));
}

#[tokio::test]
async fn test_child_pages_follows_pagination() {
    let server = MockServer::start().await;
    let first: Vec<_> = (0..50).map(|i| page_json(1000 + i, &format!("P{i}"))).collect();
    let second: Vec<_> = (50..52).map(|i| page_json(1000 + i, &format!("P{i}"))).collect();

    Mock::given(method("GET"))
        .and(path("/rest/api/content/7/child/page"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": first,
            "_links": { "next": "/rest/api/content/7/child/page?start=50&limit=50" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/7/child/page"))
        .and(query_param("start", "50"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": second,
            "_links": {}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let children = client(&server)
        .child_pages("7")
        .await
        .expect("listing should succeed");

    assert_eq!(children.len(), 52);
    assert_eq!(children[0].title, "P0");
    assert_eq!(children[51].title, "P51");
    assert!(children.iter().all(|p| p.parent_id.as_deref() == Some("7")));
}

#[tokio::test]
async fn test_attachments_parse_size_and_download_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/400/child/attachment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {
                    "id": "att1",
                    "title": "pic1.png",
                    "extensions": { "fileSize": 5 },
                    "_links": { "download": "/download/attachments/400/pic1.png?version=1" }
                },
                { "id": "att2", "title": "orphan.txt", "_links": {} }
            ]
        })))
        .mount(&server)
        .await;

    let attachments = client(&server)
        .attachments("400")
        .await
        .expect("listing should succeed");

    assert_eq!(
        attachments,
        vec![Attachment {
            id: "att1".to_string(),
            title: "pic1.png".to_string(),
            file_size: Some(5),
            download: "/download/attachments/400/pic1.png?version=1".to_string(),
        }]
    );
}

#[tokio::test]
async fn test_unauthorized_response_needs_auth() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/1/child/page"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let error = client(&server).child_pages("1").await.unwrap_err();

    assert!(matches!(error, ApiError::AuthRequired { status: 401, .. }));
    assert_eq!(error.failure_type(), FailureType::NeedsAuth);
}

#[tokio::test]
async fn test_html_login_page_is_treated_as_expired_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/1/child/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><form id=\"login\"></form></html>",
            "text/html; charset=UTF-8",
        ))
        .mount(&server)
        .await;

    let error = client(&server).child_pages("1").await.unwrap_err();

    assert!(matches!(error, ApiError::AuthRequired { status: 0, .. }));
}

#[tokio::test]
async fn test_login_page_with_wrong_content_type_is_expired_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/1/child/page"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "\n<!DOCTYPE html><html><body>Log in</body></html>",
            "application/json",
        ))
        .mount(&server)
        .await;

    let error = client(&server).child_pages("1").await.unwrap_err();

    assert!(matches!(error, ApiError::AuthRequired { status: 0, .. }));
    assert_eq!(error.failure_type(), FailureType::NeedsAuth);
}

#[tokio::test]
async fn test_rate_limited_response_carries_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/1/child/page"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let error = client(&server).child_pages("1").await.unwrap_err();

    assert_eq!(error.failure_type(), FailureType::RateLimited);
    assert_eq!(error.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_server_error_is_transient_and_not_found_is_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/1/child/page"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/api/content/2/child/page"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let api = client(&server);
    let unavailable = api.child_pages("1").await.unwrap_err();
    let missing = api.child_pages("2").await.unwrap_err();

    assert_eq!(unavailable.failure_type(), FailureType::Transient);
    assert_eq!(missing.failure_type(), FailureType::Permanent);
}

#[tokio::test]
async fn test_download_attachment_streams_bytes_to_file() {
    let server = MockServer::start().await;
    let content: Vec<u8> = (0..=255u8).cycle().take(64 * 1024).collect();
    Mock::given(method("GET"))
        .and(path("/download/attachments/400/pic1.png"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(content.clone()),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("failed to create temp dir");
    let dest = dir.path().join(".pic1.png.part");
    let attachment = Attachment {
        id: "att1".to_string(),
        title: "pic1.png".to_string(),
        file_size: Some(content.len() as u64),
        download: "/download/attachments/400/pic1.png?version=1".to_string(),
    };

    let written = client(&server)
        .download_attachment(&attachment, &dest)
        .await
        .expect("download should succeed");

    assert_eq!(written, content.len() as u64);
    assert_eq!(std::fs::read(&dest).expect("read back"), content);
}

#[tokio::test]
async fn test_reauthenticate_probes_current_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/user/current"))
        .and(header("authorization", BASIC_AUTH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "username": "user" })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .reauthenticate()
        .await
        .expect("probe should succeed");
}

#[tokio::test]
async fn test_reauthenticate_with_rejected_credentials_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/api/user/current"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let error = client(&server).reauthenticate().await.unwrap_err();
    assert_eq!(error.failure_type(), FailureType::NeedsAuth);
}
