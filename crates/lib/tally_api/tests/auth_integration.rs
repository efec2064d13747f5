//! Integration tests: build the router over an in-memory store and drive it
//! with `oneshot` requests.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tally_api::{AppState, router};
use tally_core::auth::clock::ManualClock;
use tally_core::auth::jwt::AccessKey;
use tally_core::auth::{SessionOptions, SessionService};
use tally_core::store::CredentialStore;
use tally_core::store::kv::KvStore;
use tower::ServiceExt;

struct TestApp {
    app: Router,
    clock: Arc<ManualClock>,
    state: AppState,
}

/// Route service logs through the test harness. `RUST_LOG` selects the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn test_app() -> TestApp {
    init_tracing();
    let start = DateTime::<Utc>::from_timestamp(1_750_000_000, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let store: Arc<dyn CredentialStore> = Arc::new(KvStore::in_memory());
    let service = SessionService::builder(
        store,
        AccessKey::Secret(b"access-test-secret".to_vec()),
        b"refresh-test-secret".to_vec(),
    )
    .options(SessionOptions::default().with_salt_password_round(4))
    .clock(clock.clone())
    .build()
    .expect("build service");
    let state = AppState::new(service);
    TestApp {
        app: router(state.clone()),
        clock,
        state,
    }
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(req).await.expect("request");
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("parse JSON")
    };
    (status, json)
}

async fn signup_and_login(app: &Router, user: &str, password: &str) -> Value {
    let creds = json!({ "userId": user, "password": password });
    let (status, _) = send(app, Method::POST, "/auth/signup", None, Some(creds.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = send(app, Method::POST, "/auth/login", None, Some(creds)).await;
    assert_eq!(status, StatusCode::OK);
    body
}

#[tokio::test]
async fn signup_conflicts_on_existing_user() {
    let t = test_app();
    let creds = json!({ "userId": "alice", "password": "pw1" });

    let (status, body) = send(&t.app, Method::POST, "/auth/signup", None, Some(creds.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["userId"], "alice");

    let (status, body) = send(&t.app, Method::POST, "/auth/signup", None, Some(creds)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn signup_rejects_empty_user_id() {
    let t = test_app();
    let creds = json!({ "userId": "  ", "password": "pw1" });
    let (status, body) = send(&t.app, Method::POST, "/auth/signup", None, Some(creds)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn login_returns_token_pair_with_lifetimes() {
    let t = test_app();
    let body = signup_and_login(&t.app, "alice", "pw1").await;

    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["accessToken"]["expiresIn"], 600);
    assert_eq!(body["refreshToken"]["expiresIn"], 30 * 24 * 3600);
    assert!(body["accessToken"]["token"].as_str().is_some_and(|t| !t.is_empty()));
    assert!(body["refreshToken"]["token"].as_str().is_some_and(|t| !t.is_empty()));
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let t = test_app();
    signup_and_login(&t.app, "alice", "pw1").await;

    let wrong_pw = json!({ "userId": "alice", "password": "nope" });
    let unknown = json!({ "userId": "bob", "password": "pw1" });
    let (s1, b1) = send(&t.app, Method::POST, "/auth/login", None, Some(wrong_pw)).await;
    let (s2, b2) = send(&t.app, Method::POST, "/auth/login", None, Some(unknown)).await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(b1, b2);
}

#[tokio::test]
async fn access_gate_guards_protected_routes() {
    let t = test_app();
    let tokens = signup_and_login(&t.app, "alice", "pw1").await;
    let access = tokens["accessToken"]["token"].as_str().unwrap();
    let refresh = tokens["refreshToken"]["token"].as_str().unwrap();

    let (status, _) = send(&t.app, Method::GET, "/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A refresh token is not an access token.
    let (status, _) = send(&t.app, Method::GET, "/auth/me", Some(refresh), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&t.app, Method::GET, "/auth/me", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["expiresAt"], tokens["accessToken"]["expiresAt"]);
}

#[tokio::test]
async fn alice_session_lifecycle() {
    let t = test_app();
    let tokens = signup_and_login(&t.app, "alice", "pw1").await;
    let access = tokens["accessToken"]["token"].as_str().unwrap().to_string();
    let refresh = tokens["refreshToken"]["token"].as_str().unwrap().to_string();

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/auth/validate",
        None,
        Some(json!({ "token": access })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "alice");

    t.clock.advance(Duration::minutes(11));

    let (status, body) = send(&t.app, Method::GET, "/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token expired");

    let validate_refresh = json!({ "token": refresh, "kind": "refresh" });
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/auth/validate",
        None,
        Some(validate_refresh.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["userId"], "alice");

    // A fresh access token from the still-valid refresh token.
    let (status, body) = send(
        &t.app,
        Method::POST,
        "/auth/refresh",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let fresh = body["accessToken"]["token"].as_str().unwrap().to_string();
    let (status, _) = send(&t.app, Method::GET, "/auth/me", Some(&fresh), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &t.app,
        Method::POST,
        "/auth/logout",
        None,
        Some(json!({ "refreshToken": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) =
        send(&t.app, Method::POST, "/auth/validate", None, Some(validate_refresh)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn logout_all_revokes_every_session() {
    let t = test_app();
    let first = signup_and_login(&t.app, "alice", "pw1").await;
    let creds = json!({ "userId": "alice", "password": "pw1" });
    let (_, second) = send(&t.app, Method::POST, "/auth/login", None, Some(creds)).await;

    let access = second["accessToken"]["token"].as_str().unwrap();
    let (status, body) = send(&t.app, Method::POST, "/auth/logout-all", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["revoked"], 2);

    for tokens in [&first, &second] {
        let refresh = tokens["refreshToken"]["token"].as_str().unwrap();
        let (status, _) = send(
            &t.app,
            Method::POST,
            "/auth/refresh",
            None,
            Some(json!({ "refreshToken": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn change_password_requires_current_password() {
    let t = test_app();
    let tokens = signup_and_login(&t.app, "alice", "pw1").await;
    let access = tokens["accessToken"]["token"].as_str().unwrap();

    let wrong = json!({ "oldPassword": "nope", "newPassword": "pw2" });
    let (status, _) = send(&t.app, Method::PUT, "/auth/password", Some(access), Some(wrong)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let right = json!({ "oldPassword": "pw1", "newPassword": "pw2" });
    let (status, _) = send(&t.app, Method::PUT, "/auth/password", Some(access), Some(right)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let old = json!({ "userId": "alice", "password": "pw1" });
    let (status, _) = send(&t.app, Method::POST, "/auth/login", None, Some(old)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let new = json!({ "userId": "alice", "password": "pw2" });
    let (status, _) = send(&t.app, Method::POST, "/auth/login", None, Some(new)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn config_round_trips_per_user() {
    let t = test_app();
    let tokens = signup_and_login(&t.app, "alice", "pw1").await;
    let access = tokens["accessToken"]["token"].as_str().unwrap();

    let (status, body) = send(&t.app, Method::GET, "/auth/config", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"], Value::Null);

    let blob = json!({ "config": { "currency": "EUR", "theme": "dark" } });
    let (status, _) = send(&t.app, Method::PUT, "/auth/config", Some(access), Some(blob.clone())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&t.app, Method::GET, "/auth/config", Some(access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, blob);
}

#[tokio::test]
async fn shutdown_cancels_in_flight_work() {
    let t = test_app();
    t.state.shutdown.cancel();

    let creds = json!({ "userId": "alice", "password": "pw1" });
    let (status, body) = send(&t.app, Method::POST, "/auth/signup", None, Some(creds)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "unavailable");
}
