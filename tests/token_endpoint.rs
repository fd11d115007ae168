//! HTTP token endpoint against a mock server.

use std::sync::Arc;

use hass_socket::{AuthSession, Credential, Error, HttpTokenEndpoint, TokenEndpoint};
use parking_lot::Mutex;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn expired(server: &MockServer) -> Credential {
    Credential::new(
        server.uri(),
        Some("https://app.example.com/".to_owned()),
        "old-access",
        -10,
        "refresh-1",
    )
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .and(body_string_contains("client_id="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-access",
            "expires_in": 1800,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let credential = expired(&server);
    let refreshed = HttpTokenEndpoint::new()
        .refresh(&credential)
        .await
        .expect("refresh");

    assert_eq!(refreshed.access_token, "new-access");
    assert_eq!(refreshed.refresh_token, "refresh-1");
    assert_eq!(refreshed.client_id, credential.client_id);
    assert!(!refreshed.is_expired());
}

#[tokio::test]
async fn test_rejected_refresh_is_invalid_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let result = HttpTokenEndpoint::new().refresh(&expired(&server)).await;
    assert!(matches!(result, Err(Error::InvalidAuth { .. })));
}

#[tokio::test]
async fn test_server_error_is_not_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = HttpTokenEndpoint::new()
        .refresh(&expired(&server))
        .await
        .expect_err("refresh should fail");
    assert!(!err.is_auth_error());
}

#[tokio::test]
async fn test_out_of_range_lifetime_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-access",
            "expires_in": i64::MAX
        })))
        .mount(&server)
        .await;

    let result = HttpTokenEndpoint::new().refresh(&expired(&server)).await;
    assert!(matches!(result, Err(Error::Protocol { .. })));
}

#[tokio::test]
async fn test_session_refreshes_once_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-access",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;

    let saved = Arc::new(Mutex::new(Vec::new()));
    let session = Arc::new(
        AuthSession::new(expired(&server))
            .with_endpoint(Arc::new(HttpTokenEndpoint::new()))
            .with_store(Arc::new({
                let saved = Arc::clone(&saved);
                move |credential: Option<&Credential>| {
                    saved.lock().push(credential.map(|c| c.access_token.clone()));
                }
            })),
    );

    let (a, b) = tokio::join!(session.access_token(), session.access_token());
    assert_eq!(a.expect("a"), "new-access");
    assert_eq!(b.expect("b"), "new-access");
    assert_eq!(*saved.lock(), vec![Some("new-access".to_owned())]);
}

#[tokio::test]
async fn test_revoke_posts_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/revoke"))
        .and(body_string_contains("token=refresh-1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let session = AuthSession::new(expired(&server))
        .with_endpoint(Arc::new(HttpTokenEndpoint::new()));
    session.revoke().await.expect("revoke");
    assert!(session.credential().is_none());
}
