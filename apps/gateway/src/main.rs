use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::auth::session::SessionStore;
use gateway::auth::throttle::LoginThrottle;
use gateway::bridge::nats::NatsConnector;
use gateway::bridge::{BrokerStatus, QueueBridge};
use gateway::config::Config;
use gateway::db::kv::{KeyValueStore, RedisStore};
use gateway::db::users::{MemoryUserStore, UserStore};
use gateway::gateway::Hub;
use gateway::proxy::ProxyDirector;
use gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let kv: Arc<dyn KeyValueStore> = Arc::new(
        RedisStore::connect(&config.redis_url)
            .await
            .expect("failed to connect to Redis"),
    );
    tracing::info!(redis = %config.redis_url, "key-value store connected");

    // Accounts live in the user service; until it is wired in, keep them in memory.
    let users: Arc<dyn UserStore> = Arc::new(MemoryUserStore::new());
    tracing::warn!("using in-memory user store");

    let hub = Hub::spawn();
    let broker = BrokerStatus::new();
    let bridge = QueueBridge::new(
        NatsConnector::new(&config.nats_url, &config.queue_name),
        hub.clone(),
        broker.clone(),
        config.broker_retry,
    )
    .spawn();

    let proxy = ProxyDirector::new(config.reservation_addrs.clone());
    tracing::info!(targets = ?proxy.targets(), "reservation proxy configured");

    let state = AppState {
        sessions: SessionStore::new(kv.clone(), config.session_ttl_secs),
        throttle: LoginThrottle::new(kv),
        users,
        hub: hub.clone(),
        proxy: Arc::new(proxy),
        http: reqwest::Client::new(),
        broker,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([axum::http::header::AUTHORIZATION]);

    let app = Router::new()
        .merge(gateway::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Events still in flight stay unacked and are redelivered.
    hub.shutdown().await;
    bridge.abort();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(?e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
