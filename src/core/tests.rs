use super::middleware::AuthMiddleware;
use super::{build_client, error_from_response, is_transient_status};
use crate::testutil::test_key;
use httpmock::prelude::*;
use serde_json::json;

#[test]
fn transient_statuses() {
    assert!(is_transient_status(408));
    assert!(is_transient_status(429));
    assert!(is_transient_status(500));
    assert!(is_transient_status(503));
    assert!(!is_transient_status(400));
    assert!(!is_transient_status(403));
    assert!(!is_transient_status(404));
}

#[tokio::test]
async fn middleware_attaches_bearer_token() {
    let server = MockServer::start();

    let token_mock = server.mock(|when, then| {
        when.method(POST).path("/token");
        then.status(200).json_body(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        }));
    });

    let api_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/ping")
            .header("authorization", "Bearer test-token");
        then.status(200).body("pong");
    });

    let middleware = AuthMiddleware::new(test_key(server.url("/token")));
    assert_eq!(middleware.project_id(), "test-project");

    let client = build_client(middleware);
    let response = client.get(server.url("/ping")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);

    token_mock.assert();
    api_mock.assert();
}

#[tokio::test]
async fn error_body_message_is_extracted() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/fail");
        then.status(403).json_body(json!({
            "error": { "code": 403, "message": "Missing permission", "status": "PERMISSION_DENIED" }
        }));
    });

    let response = reqwest::get(server.url("/fail")).await.unwrap();
    let (status, message) = error_from_response(response, "request failed").await;
    assert_eq!(status, 403);
    assert!(message.contains("Missing permission"));
}

#[tokio::test]
async fn non_json_error_falls_back_to_status_line() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/fail");
        then.status(502).body("bad gateway");
    });

    let response = reqwest::get(server.url("/fail")).await.unwrap();
    let (status, message) = error_from_response(response, "request failed").await;
    assert_eq!(status, 502);
    assert!(message.contains("502"));
}
