//! Integration tests for the authenticated request wrapper

mod common;

use std::time::Duration as StdDuration;

use futures::future::join_all;
use mindfuel_core::{ApiError, SessionState};
use reqwest::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{expired_tokens, harness, live_tokens, tokens_json};

const CONCURRENT_CALLERS: usize = 8;

#[tokio::test]
async fn test_attaches_bearer_token() {
    let server = MockServer::start().await;
    let tokens = live_tokens("ada@example.com", "refresh-1");

    Mock::given(method("GET"))
        .and(path("/moods"))
        .and(header("authorization", format!("Bearer {}", tokens.access_token).as_str()))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "mood": "calm" }])))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&tokens).unwrap();

    let moods: Value = h.api.get("/moods").await.unwrap();
    assert_eq!(moods[0]["mood"], "calm");
}

#[tokio::test]
async fn test_unauthenticated_request_has_no_bearer() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/public/quotes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "quote": "Breathe." })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    let quote: Value = h.api.get("/public/quotes").await.unwrap();
    assert_eq!(quote["quote"], "Breathe.");

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_unusable_access_token_is_not_sent() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/moods"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server);
    let mut tokens = live_tokens("ada@example.com", "refresh-1");
    // Still decodes as live, but cannot be a header value
    tokens.access_token.push('\n');
    h.manager.set_session(&tokens).unwrap();

    let err = h.api.get::<Value>("/moods").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidToken(_)));
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    let tokens = live_tokens("ada@example.com", "refresh-1");

    Mock::given(method("POST"))
        .and(path("/moods"))
        .and(body_json(json!({ "mood": "happy", "intensity": 7 })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "m1" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&tokens).unwrap();
    let created: Value = h
        .api
        .post("/moods", Some(&json!({ "mood": "happy", "intensity": 7 })))
        .await
        .unwrap();
    assert_eq!(created["id"], "m1");
}

#[tokio::test]
async fn test_empty_success_body() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/moods/m1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();
    let result: Value = h.api.delete("/moods/m1").await.unwrap();
    assert_eq!(result, Value::Null);
}

#[tokio::test]
async fn test_401_refreshes_and_retries_once() {
    let server = MockServer::start().await;
    let stale = live_tokens("ada@example.com", "refresh-1");
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("GET"))
        .and(path("/moods"))
        .and(header("authorization", format!("Bearer {}", stale.access_token).as_str()))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid token" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "refresh-1" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tokens": tokens_json(&fresh) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/moods"))
        .and(header("authorization", format!("Bearer {}", fresh.access_token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&stale).unwrap();

    let moods: Value = h.api.get("/moods").await.unwrap();
    assert_eq!(moods, json!([]));
    assert_eq!(h.manager.refresh_token().as_deref(), Some("refresh-2"));
    assert_eq!(h.manager.state(), SessionState::Authenticated);
}

#[tokio::test]
async fn test_second_401_surfaces_http_error_without_loop() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("GET"))
        .and(path("/moods"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Nope" })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tokens": tokens_json(&fresh) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();

    let err = h.api.get::<Value>("/moods").await.unwrap_err();
    assert!(matches!(err, ApiError::Http { .. }));
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(err.to_string(), "HTTP error! status: 401");
    assert!(h.navigator.redirects().is_empty());
}

#[tokio::test]
async fn test_401_without_refresh_token_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/moods"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "message": "Not authenticated" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server);
    let err = h.api.get::<Value>("/moods").await.unwrap_err();
    assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
    assert_eq!(err.to_string(), "Not authenticated");
}

#[tokio::test]
async fn test_error_body_message_and_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/sleep"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({ "message": "Date out of range" })),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();

    let err = h.api.get::<Value>("/sleep").await.unwrap_err();
    assert_eq!(err.to_string(), "Date out of range");
    assert_eq!(err.status(), Some(StatusCode::UNPROCESSABLE_ENTITY));

    let err = h.api.get::<Value>("/chat").await.unwrap_err();
    assert_eq!(err.to_string(), "HTTP error! status: 503");
}

#[tokio::test]
async fn test_expired_token_refreshes_before_request() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tokens": tokens_json(&fresh) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .and(header("authorization", format!("Bearer {}", fresh.access_token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "firstName": "Ada" })))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&expired_tokens("ada@example.com", "refresh-1")).unwrap();

    let profile: Value = h.api.get("/profile").await.unwrap();
    assert_eq!(profile["firstName"], "Ada");
    assert!(h.manager.is_live());
}

#[tokio::test]
async fn test_rejected_refresh_clears_session_and_redirects() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/moods"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({ "detail": "Invalid refresh token" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();

    let err = h.api.get::<Value>("/moods").await.unwrap_err();
    assert!(matches!(err, ApiError::SessionExpired(_)));
    assert!(err.is_auth_failure());

    assert_eq!(h.manager.access_token(), None);
    assert_eq!(h.manager.refresh_token(), None);
    assert_eq!(h.manager.state(), SessionState::Unauthenticated);
    assert_eq!(h.navigator.redirects(), vec!["/login"]);
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_call() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "tokens": tokens_json(&fresh) }))
                .set_delay(StdDuration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&expired_tokens("ada@example.com", "refresh-1")).unwrap();

    let outcomes = join_all((0..CONCURRENT_CALLERS).map(|_| h.manager.refresh_shared())).await;

    assert_eq!(outcomes.len(), CONCURRENT_CALLERS);
    for outcome in &outcomes {
        assert_eq!(outcome.as_ref().unwrap(), &fresh);
    }
    assert_eq!(h.manager.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_concurrent_refresh_failures_share_one_outcome() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(StdDuration::from_millis(200)))
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&expired_tokens("ada@example.com", "refresh-1")).unwrap();

    let outcomes = join_all((0..CONCURRENT_CALLERS).map(|_| h.manager.refresh_shared())).await;
    let first = outcomes[0].as_ref().unwrap_err();
    for outcome in &outcomes {
        let err = outcome.as_ref().unwrap_err();
        assert!(std::sync::Arc::ptr_eq(first, err));
    }
    // One attempt, one redirect
    assert_eq!(h.navigator.redirects(), vec!["/login"]);
}

#[tokio::test]
async fn test_concurrent_requests_with_expired_token() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "tokens": tokens_json(&fresh) }))
                .set_delay(StdDuration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/moods"))
        .and(header("authorization", format!("Bearer {}", fresh.access_token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(CONCURRENT_CALLERS as u64)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&expired_tokens("ada@example.com", "refresh-1")).unwrap();

    let results = join_all((0..CONCURRENT_CALLERS).map(|_| h.api.get::<Value>("/moods"))).await;
    assert!(results.iter().all(|r| r.is_ok()));
}

#[tokio::test]
async fn test_sequential_refreshes_each_hit_backend() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tokens": tokens_json(&fresh) })),
        )
        .expect(2)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();

    h.manager.refresh_shared().await.unwrap();
    h.manager.refresh_shared().await.unwrap();
}

#[tokio::test]
async fn test_expiry_watch_stops_after_logout() {
    let server = MockServer::start().await;
    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();
    h.manager.initialize().await;

    let watch = h.manager.spawn_expiry_watch(StdDuration::from_millis(20));
    h.manager.logout().await.unwrap();

    tokio::time::timeout(StdDuration::from_secs(2), watch)
        .await
        .expect("watch task should end")
        .unwrap();
}

#[tokio::test]
async fn test_expiry_watch_refreshes_expired_token() {
    let server = MockServer::start().await;
    let fresh = live_tokens("ada@example.com", "refresh-2");

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "tokens": tokens_json(&fresh) })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let h = harness(&server);
    h.manager.set_session(&live_tokens("ada@example.com", "refresh-1")).unwrap();
    assert_eq!(h.manager.initialize().await, SessionState::Authenticated);

    // Access token lapses while the session is still authenticated
    h.manager.set_session(&expired_tokens("ada@example.com", "refresh-1")).unwrap();
    let watch = h.manager.spawn_expiry_watch(StdDuration::from_millis(20));

    tokio::time::timeout(StdDuration::from_secs(2), async {
        while h.manager.refresh_token().as_deref() != Some("refresh-2") {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
    })
    .await
    .expect("watch should refresh");

    assert!(h.manager.is_live());
    watch.abort();
}
