pub mod auth;
pub mod bridge;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod proxy;
pub mod routes;

use std::sync::Arc;

use auth::session::SessionStore;
use auth::throttle::LoginThrottle;
use bridge::BrokerStatus;
use config::Config;
use db::users::UserStore;
use gateway::Hub;
use proxy::ProxyDirector;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: SessionStore,
    pub throttle: LoginThrottle,
    pub users: Arc<dyn UserStore>,
    pub hub: Hub,
    pub proxy: Arc<ProxyDirector>,
    pub http: reqwest::Client,
    pub broker: BrokerStatus,
}
