//! Broadcast engine: a single task that owns the connection registry.
//!
//! Every registry change and every broadcast goes through [`Hub`], which
//! forwards it as a command to the task. Commands are applied one at a time,
//! so concurrent callers never see a half-applied change.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::registry::{
    fingerprint, BroadcastReport, ConnectionHandle, ConnectionId, ConnectionRegistry, UserId,
};

const COMMAND_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("a connection is already registered for this token")]
    DuplicateToken,
    #[error("token is already linked to this user")]
    AlreadyLinked,
    #[error("no connection registered for this token")]
    NotFound,
    #[error("no active connection for users {0:?}")]
    NoActiveConnection(Vec<UserId>),
    #[error("broadcast engine is not running")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
}

enum Command {
    Register {
        token: String,
        user_id: UserId,
        handle: ConnectionHandle,
        reply: oneshot::Sender<Result<ConnectionId, HubError>>,
    },
    Unregister {
        token: String,
        /// Only remove this registration of the token.
        id: Option<ConnectionId>,
        reply: oneshot::Sender<Result<UserId, HubError>>,
    },
    BroadcastAll {
        message: Arc<str>,
        reply: oneshot::Sender<BroadcastReport>,
    },
    BroadcastToUsers {
        user_ids: Vec<UserId>,
        message: Arc<str>,
        reply: oneshot::Sender<BroadcastReport>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the broadcast engine task.
#[derive(Clone, Debug)]
pub struct Hub {
    tx: mpsc::Sender<Command>,
}

impl Hub {
    /// Start the engine. It stops on [`Hub::shutdown`] or once every handle
    /// has been dropped.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        tokio::spawn(run(rx, ConnectionRegistry::new()));
        Self { tx }
    }

    pub async fn register(
        &self,
        token: impl Into<String>,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Result<ConnectionId, HubError> {
        let token = token.into();
        self.request(|reply| Command::Register {
            token,
            user_id,
            handle,
            reply,
        })
        .await?
    }

    /// Remove whatever connection is registered under `token`.
    pub async fn unregister(&self, token: impl Into<String>) -> Result<UserId, HubError> {
        let token = token.into();
        self.request(|reply| Command::Unregister {
            token,
            id: None,
            reply,
        })
        .await?
    }

    /// Remove the connection only if it is still registration `id`.
    pub async fn unregister_connection(
        &self,
        token: impl Into<String>,
        id: ConnectionId,
    ) -> Result<UserId, HubError> {
        let token = token.into();
        self.request(|reply| Command::Unregister {
            token,
            id: Some(id),
            reply,
        })
        .await?
    }

    pub async fn broadcast_all(&self, message: impl Into<Arc<str>>) -> Result<BroadcastReport, HubError> {
        let message = message.into();
        self.request(|reply| Command::BroadcastAll { message, reply })
            .await
    }

    pub async fn broadcast_to_users(
        &self,
        user_ids: Vec<UserId>,
        message: impl Into<Arc<str>>,
    ) -> Result<BroadcastReport, HubError> {
        let message = message.into();
        self.request(|reply| Command::BroadcastToUsers {
            user_ids,
            message,
            reply,
        })
        .await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    /// Stop the engine and close every registered connection. Later calls
    /// on any handle fail with [`HubError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.request(|reply| Command::Shutdown { reply }).await;
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }
}

async fn run(mut rx: mpsc::Receiver<Command>, mut registry: ConnectionRegistry) {
    tracing::debug!("broadcast engine started");
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register {
                token,
                user_id,
                handle,
                reply,
            } => {
                let result = registry.register(token.clone(), user_id, handle);
                match &result {
                    Ok(id) => tracing::info!(
                        user_id,
                        token = fingerprint(&token),
                        id,
                        connections = registry.connection_count(),
                        "connection registered"
                    ),
                    Err(e) => tracing::warn!(user_id, token = fingerprint(&token), error = %e, "register rejected"),
                }
                let _ = reply.send(result);
            }
            Command::Unregister { token, id, reply } => {
                let result = match id {
                    Some(id) => registry.unregister_connection(&token, id),
                    None => registry.unregister(&token),
                };
                if let Ok(user_id) = &result {
                    tracing::info!(
                        user_id,
                        token = fingerprint(&token),
                        connections = registry.connection_count(),
                        "connection unregistered"
                    );
                }
                let _ = reply.send(result);
            }
            Command::BroadcastAll { message, reply } => {
                let report = registry.broadcast_all(&message);
                tracing::debug!(delivered = report.delivered, dropped = report.dropped.len(), "broadcast to all");
                let _ = reply.send(report);
            }
            Command::BroadcastToUsers {
                user_ids,
                message,
                reply,
            } => {
                let report = registry.broadcast_to_users(&user_ids, &message);
                if !report.unreachable.is_empty() {
                    tracing::warn!(unreachable = ?report.unreachable, "no active connection for some users");
                }
                tracing::debug!(delivered = report.delivered, dropped = report.dropped.len(), "broadcast to users");
                let _ = reply.send(report);
            }
            Command::Stats { reply } => {
                let _ = reply.send(HubStats {
                    connections: registry.connection_count(),
                    users: registry.user_count(),
                });
            }
            Command::Shutdown { reply } => {
                tracing::info!(connections = registry.connection_count(), "broadcast engine shutting down");
                drop(registry);
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::debug!("broadcast engine stopped");
}
