use std::time::Duration;

/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Key used to sign session tokens.
    pub session_key: String,
    /// Redis connection URL for sessions and login throttling.
    pub redis_url: String,
    /// NATS server the event queue lives on.
    pub nats_url: String,
    /// Name of the durable event queue.
    pub queue_name: String,
    /// Reservation service instances, used round-robin.
    pub reservation_addrs: Vec<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Sliding session lifetime.
    pub session_ttl_secs: u64,
    /// Delay between broker reconnect attempts.
    pub broker_retry: Duration,
    /// Minimum latency of a failed sign-in.
    pub auth_failure_delay: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        let reservation_addrs: Vec<String> = required_var("RESERVATION_ADDRS")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if reservation_addrs.is_empty() {
            panic!("RESERVATION_ADDRS must list at least one address");
        }

        Self {
            session_key: required_var("SESSION_KEY"),
            redis_url: var_or("REDIS_ADDR", "redis://localhost:6379/0"),
            nats_url: var_or("NATS_URL", "nats://localhost:4222"),
            queue_name: var_or("QUEUE_NAME", "reservationQueue"),
            reservation_addrs,
            port: parsed_var("PORT", 443),
            session_ttl_secs: parsed_var("SESSION_TTL_SECS", 3600),
            broker_retry: Duration::from_secs(parsed_var("BROKER_RETRY_SECS", 5)),
            auth_failure_delay: Duration::from_millis(parsed_var("AUTH_FAILURE_DELAY_MS", 1000)),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| panic!("{name} env var is required"))
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
