//! Token → connection map plus the per-user token index.
//!
//! The registry is plain data with no interior locking. It is owned by the
//! hub task, which applies one command at a time, so the two maps are always
//! observed in a consistent state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use super::hub::HubError;

pub type UserId = i64;

/// Identifies one registration of a token. A token that registers again
/// after removal gets a new id.
pub type ConnectionId = u64;

/// Sending half of a live connection, held by the registry.
///
/// Dropping the handle tells the connection's write pump to send a close
/// frame and stop, without draining frames still queued.
#[derive(Debug)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Arc<str>>,
    _close: oneshot::Sender<()>,
}

/// Receiving half of a live connection, drained by its write pump.
#[derive(Debug)]
pub struct Outbox {
    pub messages: mpsc::Receiver<Arc<str>>,
    /// Resolves (with an error) once the registry drops the handle.
    pub closed: oneshot::Receiver<()>,
}

/// Create a connection handle with a bounded delivery queue.
pub fn connection_channel(capacity: usize) -> (ConnectionHandle, Outbox) {
    let (tx, messages) = mpsc::channel(capacity);
    let (close_tx, closed) = oneshot::channel();
    (
        ConnectionHandle {
            tx,
            _close: close_tx,
        },
        Outbox { messages, closed },
    )
}

impl ConnectionHandle {
    fn try_deliver(&self, message: &Arc<str>) -> Result<(), &'static str> {
        self.tx.try_send(Arc::clone(message)).map_err(|e| match e {
            TrySendError::Full(_) => "outbound queue full",
            TrySendError::Closed(_) => "connection closed",
        })
    }
}

#[derive(Debug)]
struct ConnectionEntry {
    id: ConnectionId,
    user_id: UserId,
    handle: ConnectionHandle,
}

/// Outcome of a broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the message was queued on.
    pub delivered: usize,
    /// Tokens unregistered because delivery to them failed.
    pub dropped: Vec<String>,
    /// Targeted users with no live connection.
    pub unreachable: Vec<UserId>,
}

impl BroadcastReport {
    /// Treat any unreachable target as an error.
    pub fn ensure_complete(&self) -> Result<(), HubError> {
        if self.unreachable.is_empty() {
            Ok(())
        } else {
            Err(HubError::NoActiveConnection(self.unreachable.clone()))
        }
    }
}

/// Short, non-secret prefix of a token for log lines.
pub(crate) fn fingerprint(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<String, ConnectionEntry>,
    by_user: HashMap<UserId, HashSet<String>>,
    next_id: ConnectionId,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        token: String,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Result<ConnectionId, HubError> {
        if self.connections.contains_key(&token) {
            return Err(HubError::DuplicateToken);
        }
        if self
            .by_user
            .get(&user_id)
            .is_some_and(|tokens| tokens.contains(&token))
        {
            // The index still lists a token the connection map does not have.
            tracing::error!(
                user_id,
                token = fingerprint(&token),
                "token linked to user without a connection"
            );
            return Err(HubError::AlreadyLinked);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.by_user.entry(user_id).or_default().insert(token.clone());
        self.connections.insert(
            token,
            ConnectionEntry {
                id,
                user_id,
                handle,
            },
        );
        Ok(id)
    }

    /// Remove the registration `id` of `token`. A later registration under
    /// the same token is left alone and reported as `NotFound`.
    pub fn unregister_connection(&mut self, token: &str, id: ConnectionId) -> Result<UserId, HubError> {
        match self.connections.get(token) {
            Some(entry) if entry.id == id => self.unregister(token),
            _ => Err(HubError::NotFound),
        }
    }

    /// Remove a connection and close it. Returns the owning user.
    pub fn unregister(&mut self, token: &str) -> Result<UserId, HubError> {
        let entry = self.connections.remove(token).ok_or(HubError::NotFound)?;
        if let Some(tokens) = self.by_user.get_mut(&entry.user_id) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_user.remove(&entry.user_id);
            }
        }
        // Dropping the handle closes the connection.
        drop(entry.handle);
        Ok(entry.user_id)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.connections.contains_key(token)
    }

    pub fn tokens_for(&self, user_id: UserId) -> Vec<String> {
        self.by_user
            .get(&user_id)
            .map(|tokens| tokens.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Queue `message` on every connection. Failed connections are removed.
    pub fn broadcast_all(&mut self, message: &Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for (token, entry) in &self.connections {
            match entry.handle.try_deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    tracing::debug!(token = fingerprint(token), reason, "delivery failed");
                    report.dropped.push(token.clone());
                }
            }
        }
        self.drop_failed(&report.dropped);
        report
    }

    /// Queue `message` on every connection of the given users.
    ///
    /// An empty list targets every connected user. Users without a connection
    /// are reported, and delivery to the others still happens.
    pub fn broadcast_to_users(&mut self, user_ids: &[UserId], message: &Arc<str>) -> BroadcastReport {
        let targets: Vec<UserId> = if user_ids.is_empty() {
            self.by_user.keys().copied().collect()
        } else {
            let mut seen = HashSet::new();
            user_ids.iter().copied().filter(|id| seen.insert(*id)).collect()
        };

        let mut report = BroadcastReport::default();
        for user_id in targets {
            let Some(tokens) = self.by_user.get(&user_id).filter(|t| !t.is_empty()) else {
                report.unreachable.push(user_id);
                continue;
            };
            for token in tokens {
                let Some(entry) = self.connections.get(token) else {
                    tracing::error!(user_id, token = fingerprint(token), "indexed token has no connection");
                    continue;
                };
                match entry.handle.try_deliver(message) {
                    Ok(()) => report.delivered += 1,
                    Err(reason) => {
                        tracing::debug!(user_id, token = fingerprint(token), reason, "delivery failed");
                        report.dropped.push(token.clone());
                    }
                }
            }
        }
        self.drop_failed(&report.dropped);
        report
    }

    fn drop_failed(&mut self, tokens: &[String]) {
        for token in tokens {
            if let Ok(user_id) = self.unregister(token) {
                tracing::info!(user_id, token = fingerprint(token), "connection dropped after failed delivery");
            }
        }
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let indexed: usize = self.by_user.values().map(HashSet::len).sum();
        indexed == self.connections.len()
            && self.by_user.iter().all(|(user_id, tokens)| {
                !tokens.is_empty()
                    && tokens.iter().all(|t| {
                        self.connections
                            .get(t)
                            .is_some_and(|entry| entry.user_id == *user_id)
                    })
            })
    }
}
