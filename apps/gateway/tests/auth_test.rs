mod common;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;

use gateway::auth::session::{SessionError, SessionState};
use gateway::auth::throttle::{LoginThrottle, MAX_FAILED_ATTEMPTS};
use gateway::auth::token::{self, SessionToken};
use gateway::db::kv::{KeyValueStore, KvError, MemoryStore};

fn sign_up_body(email: &str, user_name: &str) -> serde_json::Value {
    json!({
        "email": email,
        "password": "secret1",
        "passwordConf": "secret1",
        "userName": user_name,
        "firstName": "Alice",
        "lastName": "Liddell",
    })
}

fn bearer_token(value: &str) -> SessionToken {
    let raw = value.strip_prefix("Bearer ").expect("Bearer scheme");
    token::validate(raw, common::SIGNING_KEY).expect("signed by the gateway")
}

// ---------------------------------------------------------------------------
// POST /v1/users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_up_creates_account_and_session() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .post("/v1/users")
        .json(&sign_up_body("alice@example.com", "alice"))
        .await;

    resp.assert_status(StatusCode::CREATED);
    let header = resp.header("authorization");
    let token = bearer_token(header.to_str().unwrap());
    assert_eq!(token.as_str().len(), 88);

    let body: serde_json::Value = resp.json();
    assert_eq!(body["userName"], "alice");
    assert_eq!(body["firstName"], "Alice");
    assert!(body["photoURL"].as_str().unwrap().contains("gravatar.com"));
    assert!(body.get("passwordHash").is_none());
    assert!(body.get("email").is_none());

    let session: SessionState = state.sessions.get(&token).await.unwrap();
    assert_eq!(session.user.user_name, "alice");
}

#[tokio::test]
async fn sign_up_rejects_duplicate_email() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    server
        .post("/v1/users")
        .json(&sign_up_body("alice@example.com", "alice"))
        .await
        .assert_status(StatusCode::CREATED);

    let resp = server
        .post("/v1/users")
        .json(&sign_up_body("ALICE@example.com", "alice2"))
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["message"], "email is already registered");
}

#[tokio::test]
async fn sign_up_reports_invalid_fields() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .post("/v1/users")
        .json(&json!({
            "email": "alice@example.com",
            "password": "secret1",
            "passwordConf": "secret2",
            "userName": "alice",
        }))
        .await;

    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["details"][0]["field"], "passwordConf");
}

#[tokio::test]
async fn sign_up_requires_json_content_type() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.post("/v1/users").text("email=alice").await;
    resp.assert_status(StatusCode::UNSUPPORTED_MEDIA_TYPE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "UNSUPPORTED_MEDIA_TYPE");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server
        .post("/v1/sessions")
        .bytes(Bytes::from_static(b"{\"email\": "))
        .content_type("application/json")
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/v1/users").await;
    resp.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["code"], "METHOD_NOT_ALLOWED");

    server
        .get("/v1/sessions")
        .await
        .assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

// ---------------------------------------------------------------------------
// POST /v1/sessions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_in_with_valid_credentials() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let user = common::create_user(&state, "bob@example.com", "bob").await;

    let resp = server
        .post("/v1/sessions")
        .json(&json!({ "email": "bob@example.com", "password": common::PASSWORD }))
        .await;

    resp.assert_status(StatusCode::CREATED);
    let token = bearer_token(resp.header("authorization").to_str().unwrap());
    let session: SessionState = state.sessions.get(&token).await.unwrap();
    assert_eq!(session.user.id, user.id);

    let body: serde_json::Value = resp.json();
    assert_eq!(body["id"], user.id);
}

#[tokio::test]
async fn failures_share_one_response_and_take_the_minimum_delay() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    common::create_user(&state, "bob@example.com", "bob").await;

    for creds in [
        json!({ "email": "bob@example.com", "password": "wrong" }),
        json!({ "email": "nobody@example.com", "password": "wrong" }),
    ] {
        let started = Instant::now();
        let resp = server.post("/v1/sessions").json(&creds).await;
        assert!(started.elapsed() >= common::FAILURE_DELAY);

        resp.assert_status(StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = resp.json();
        assert_eq!(
            body,
            json!({ "error": { "code": "UNAUTHORIZED", "message": "Cannot authenticate" } })
        );
    }

    // Unknown identities do not get a counter.
    assert_eq!(
        state
            .throttle
            .current_failure_count("nobody@example.com")
            .await
            .unwrap(),
        0
    );
}

/// Store whose failure counters cannot be written.
struct BrokenCounters(MemoryStore);

#[async_trait]
impl KeyValueStore for BrokenCounters {
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        self.0.set_ex(key, value, ttl_secs).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        self.0.get(key).await
    }

    async fn get_refresh(&self, key: &str, ttl_secs: u64) -> Result<Option<String>, KvError> {
        self.0.get_refresh(key, ttl_secs).await
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.0.del(key).await
    }

    async fn incr_with_ttl(&self, key: &str, _ttl_secs: u64) -> Result<i64, KvError> {
        Err(KvError::NotAnInteger(key.to_string()))
    }
}

#[tokio::test]
async fn counter_store_failure_looks_like_any_other_failure() {
    let mut state = common::test_state();
    state.throttle = LoginThrottle::new(Arc::new(BrokenCounters(MemoryStore::new())));
    let app = gateway::routes::router().with_state(state.clone());
    let server = TestServer::new(app).unwrap();
    common::create_user(&state, "erin@example.com", "erin").await;

    let started = Instant::now();
    let resp = server
        .post("/v1/sessions")
        .json(&json!({ "email": "erin@example.com", "password": "wrong" }))
        .await;
    assert!(started.elapsed() >= common::FAILURE_DELAY);

    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(
        body,
        json!({ "error": { "code": "UNAUTHORIZED", "message": "Cannot authenticate" } })
    );
}

#[tokio::test]
async fn lockout_after_repeated_wrong_passwords() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    common::create_user(&state, "carol@example.com", "carol").await;

    for _ in 0..MAX_FAILED_ATTEMPTS {
        server
            .post("/v1/sessions")
            .json(&json!({ "email": "carol@example.com", "password": "wrong" }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // Correct password is refused while locked.
    server
        .post("/v1/sessions")
        .json(&json!({ "email": "carol@example.com", "password": common::PASSWORD }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert!(state.throttle.is_locked("carol@example.com").await.unwrap());
}

#[tokio::test]
async fn success_clears_failure_count() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    common::create_user(&state, "dave@example.com", "dave").await;

    for _ in 0..MAX_FAILED_ATTEMPTS - 1 {
        server
            .post("/v1/sessions")
            .json(&json!({ "email": "dave@example.com", "password": "wrong" }))
            .await;
    }
    server
        .post("/v1/sessions")
        .json(&json!({ "email": "dave@example.com", "password": common::PASSWORD }))
        .await
        .assert_status(StatusCode::CREATED);

    assert_eq!(
        state
            .throttle
            .current_failure_count("dave@example.com")
            .await
            .unwrap(),
        0
    );
}

// ---------------------------------------------------------------------------
// DELETE /v1/sessions/{which}
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_out_deletes_the_session() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let user = common::create_user(&state, "erin@example.com", "erin").await;
    let token = common::session_for(&state, &user).await;

    let resp = server
        .delete("/v1/sessions/mine")
        .authorization_bearer(token.as_str())
        .await;
    resp.assert_status_ok();
    resp.assert_text("signed out");

    assert!(matches!(
        state.sessions.get::<SessionState>(&token).await,
        Err(SessionError::NotFound)
    ));
}

#[tokio::test]
async fn sign_out_of_another_session_is_forbidden() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let user = common::create_user(&state, "erin@example.com", "erin").await;
    let token = common::session_for(&state, &user).await;

    server
        .delete("/v1/sessions/1234")
        .authorization_bearer(token.as_str())
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Session is untouched.
    assert!(state.sessions.get::<SessionState>(&token).await.is_ok());
}

#[tokio::test]
async fn sign_out_without_token_is_unauthorized() {
    let (app, _state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.delete("/v1/sessions/mine").await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"]["message"], "Cannot authenticate");
}

#[tokio::test]
async fn forged_token_is_unauthorized() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();
    let user = common::create_user(&state, "erin@example.com", "erin").await;
    let token = common::session_for(&state, &user).await;

    let forged = token::create("some other key").unwrap();
    server
        .delete("/v1/sessions/mine")
        .authorization_bearer(forged.as_str())
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    assert!(state.sessions.get::<SessionState>(&token).await.is_ok());
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reflects_broker_connection() {
    let (app, state) = common::test_app();
    let server = TestServer::new(app).unwrap();

    let resp = server.get("/health").await;
    resp.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["broker"], "disconnected");

    state.broker.set_connected(true);
    let resp = server.get("/health").await;
    resp.assert_status_ok();
    let body: serde_json::Value = resp.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
}
