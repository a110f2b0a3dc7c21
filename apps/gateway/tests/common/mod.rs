#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use gateway::auth::password::hash_password;
use gateway::auth::session::{begin_session, SessionState, SessionStore};
use gateway::auth::throttle::LoginThrottle;
use gateway::auth::token::SessionToken;
use gateway::bridge::BrokerStatus;
use gateway::config::Config;
use gateway::db::kv::{KeyValueStore, MemoryStore};
use gateway::db::users::{MemoryUserStore, UserStore};
use gateway::gateway::Hub;
use gateway::models::user::{NewUser, User, UserProfile, DEFAULT_USER_TYPE};
use gateway::proxy::ProxyDirector;
use gateway::AppState;

pub const SIGNING_KEY: &str = "integration-test-signing-key";
pub const PASSWORD: &str = "correct horse";
pub const FAILURE_DELAY: Duration = Duration::from_millis(20);

pub fn test_config(reservation_addrs: Vec<String>) -> Config {
    Config {
        session_key: SIGNING_KEY.to_string(),
        redis_url: "redis://unused".to_string(),
        nats_url: "nats://unused".to_string(),
        queue_name: "reservationQueue".to_string(),
        reservation_addrs,
        port: 0,
        session_ttl_secs: 3600,
        broker_retry: Duration::from_millis(50),
        auth_failure_delay: FAILURE_DELAY,
    }
}

/// AppState over in-memory stores, proxying to `reservation_addrs`.
pub fn test_state_with_targets(reservation_addrs: Vec<String>) -> AppState {
    let config = test_config(reservation_addrs);
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());

    AppState {
        sessions: SessionStore::new(kv.clone(), config.session_ttl_secs),
        throttle: LoginThrottle::new(kv),
        users,
        hub: Hub::spawn(),
        proxy: Arc::new(ProxyDirector::new(config.reservation_addrs.clone())),
        http: reqwest::Client::new(),
        broker: BrokerStatus::new(),
        config: Arc::new(config),
    }
}

pub fn test_state() -> AppState {
    // Nothing listens on the discard port.
    test_state_with_targets(vec!["127.0.0.1:9".to_string()])
}

pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    let app = gateway::routes::router().with_state(state.clone());
    (app, state)
}

pub async fn create_user(state: &AppState, email: &str, user_name: &str) -> User {
    state
        .users
        .insert(NewUser {
            email: email.to_string(),
            password_hash: hash_password(PASSWORD).expect("hash"),
            user_name: user_name.to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            photo_url: String::new(),
            user_type: DEFAULT_USER_TYPE.to_string(),
        })
        .await
        .expect("insert user")
}

/// Start a session for `user` directly against the store.
pub async fn session_for(state: &AppState, user: &User) -> SessionToken {
    begin_session(
        SIGNING_KEY,
        &state.sessions,
        &SessionState::new(UserProfile::from(user)),
    )
    .await
    .expect("begin session")
}

/// `auth` query value for a token; padding must be percent-encoded.
pub fn auth_query(token: &SessionToken) -> String {
    format!("auth={}", token.as_str().replace('=', "%3D"))
}
