//! Request director: identity header and upstream selection.

use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::{HeaderMap, HeaderValue, Uri};
use gateway_common::{ForwardedUser, USER_HEADER};

use crate::auth::session::{self, SessionState, SessionStore};

pub struct ProxyDirector {
    targets: Vec<String>,
    next: AtomicUsize,
}

impl ProxyDirector {
    /// Round-robin over `targets`. Entries without a scheme get `http://`.
    ///
    /// # Panics
    ///
    /// Panics if `targets` is empty.
    pub fn new(targets: Vec<String>) -> Self {
        assert!(!targets.is_empty(), "proxy needs at least one target");
        let targets = targets
            .into_iter()
            .map(|t| {
                let t = t.trim().trim_end_matches('/');
                if t.contains("://") {
                    t.to_string()
                } else {
                    format!("http://{t}")
                }
            })
            .collect();
        Self {
            targets,
            next: AtomicUsize::new(0),
        }
    }

    pub fn single(target: impl Into<String>) -> Self {
        Self::new(vec![target.into()])
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Base URL for the next request.
    pub fn next_target(&self) -> &str {
        if self.targets.len() == 1 {
            return &self.targets[0];
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.targets.len();
        &self.targets[i]
    }

    /// Replace any client-supplied identity header with the caller's verified
    /// identity. Requests without a valid session are forwarded anonymously.
    pub async fn direct(
        &self,
        headers: &mut HeaderMap,
        uri: &Uri,
        signing_key: &str,
        sessions: &SessionStore,
    ) -> Option<ForwardedUser> {
        headers.remove(USER_HEADER);

        let state = match session::get_state::<SessionState>(headers, uri, signing_key, sessions).await
        {
            Ok((_, state)) => state,
            Err(e) => {
                tracing::debug!(error = %e, "forwarding without identity");
                return None;
            }
        };

        let user = ForwardedUser::from(&state.user);
        let value = match user.to_header_value() {
            Ok(json) => HeaderValue::from_bytes(json.as_bytes()),
            Err(e) => {
                tracing::error!(?e, "identity header encoding failed");
                return None;
            }
        };
        match value {
            Ok(value) => {
                headers.insert(USER_HEADER, value);
                Some(user)
            }
            Err(e) => {
                tracing::warn!(?e, user_id = user.user_id, "identity is not a valid header value");
                None
            }
        }
    }
}
