//! Client-side Google token handling against a relay's OAuth endpoints.

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use chatrelay_core::relay::{ConnectionState, RelayTokenClient, TokenCache};

const FAR_FUTURE_MS: i64 = 4_102_444_800_000;

async fn relay_with_tokens(expires_at: i64) -> MockServer {
    let server = MockServer::builder().start().await;
    Mock::given(method("GET"))
        .and(path("/api/google-oauth/get-tokens"))
        .and(query_param("sessionId", "s1"))
        .and(query_param("chatbotId", "b1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "tokens": { "accessToken": "ya29", "refreshToken": "r1", "expiresAt": expires_at }
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_live_token_is_used_without_refresh() {
    let server = relay_with_tokens(FAR_FUTURE_MS).await;
    Mock::given(method("POST"))
        .and(path("/api/google-oauth/refresh-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let google = RelayTokenClient::new(server.uri(), "s1", "b1");
    let cache = TokenCache::new();
    assert!(google.load_into(&cache).await.unwrap());
    assert_eq!(cache.state("s1"), ConnectionState::Authenticated);

    let token = cache.valid_access_token(google.pairing_key(), &google).await;
    assert_eq!(token.as_deref(), Some("ya29"));
}

#[tokio::test]
async fn test_expired_token_refreshes_through_relay() {
    let server = relay_with_tokens(1).await;
    Mock::given(method("POST"))
        .and(path("/api/google-oauth/refresh-token"))
        .and(body_partial_json(json!({
            "refreshToken": "r1",
            "sessionId": "s1",
            "chatbotId": "b1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "accessToken": "ya29-new",
            "expiresAt": FAR_FUTURE_MS
        })))
        .expect(1)
        .mount(&server)
        .await;

    let google = RelayTokenClient::new(server.uri(), "s1", "b1");
    let cache = TokenCache::new();
    google.load_into(&cache).await.unwrap();

    let token = cache.valid_access_token("s1", &google).await;
    assert_eq!(token.as_deref(), Some("ya29-new"));
    let tokens = cache.tokens("s1").unwrap();
    assert_eq!(tokens.refresh_token, "r1");
    assert_eq!(tokens.expires_at, FAR_FUTURE_MS);

    // The second turn reuses the refreshed token
    let token = cache.valid_access_token("s1", &google).await;
    assert_eq!(token.as_deref(), Some("ya29-new"));
}

#[tokio::test]
async fn test_failed_refresh_disconnects() {
    let server = relay_with_tokens(1).await;
    Mock::given(method("POST"))
        .and(path("/api/google-oauth/refresh-token"))
        .respond_with(
            ResponseTemplate::new(502)
                .set_body_json(json!({ "success": false, "error": "invalid_grant" })),
        )
        .mount(&server)
        .await;

    let google = RelayTokenClient::new(server.uri(), "s1", "b1");
    let cache = TokenCache::new();
    google.load_into(&cache).await.unwrap();

    assert!(cache.valid_access_token("s1", &google).await.is_none());
    assert_eq!(cache.state("s1"), ConnectionState::Unauthenticated);
    assert!(cache.tokens("s1").is_none());
}

#[tokio::test]
async fn test_no_tokens_stored() {
    let server = MockServer::builder().start().await;
    Mock::given(method("GET"))
        .and(path("/api/google-oauth/get-tokens"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({ "success": false, "error": "No tokens found" })),
        )
        .mount(&server)
        .await;

    let google = RelayTokenClient::new(server.uri(), "s1", "b1");
    let cache = TokenCache::new();
    assert!(!google.load_into(&cache).await.unwrap());
    assert!(cache.valid_access_token("s1", &google).await.is_none());
}

#[tokio::test]
async fn test_relay_error_is_reported() {
    let server = MockServer::builder().start().await;
    Mock::given(method("GET"))
        .and(path("/api/google-oauth/get-tokens"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": "backend down" })),
        )
        .mount(&server)
        .await;

    let google = RelayTokenClient::new(server.uri(), "s1", "b1");
    let err = google.fetch_tokens().await.unwrap_err();
    assert_eq!(err.status_code(), 500);
    assert_eq!(err.public_message(), "backend down");
}
