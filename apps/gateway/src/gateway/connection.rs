//! Per-connection pumps.
//!
//! The write pump drains the connection's [`Outbox`] onto the socket and
//! keeps the peer alive with pings. The read loop only watches for liveness;
//! inbound payloads are ignored.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use super::hub::{Hub, HubError};
use super::registry::{connection_channel, fingerprint, Outbox, UserId};

/// Time allowed to write one frame.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Time allowed between frames from the peer, pongs included.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Ping interval. Must be shorter than [`PONG_WAIT`].
pub const PING_PERIOD: Duration = Duration::from_secs(54);
/// Largest frame accepted from the peer.
pub const MAX_MESSAGE_SIZE: usize = 512;
/// Outbound frames queued per connection before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 256;

/// Close code sent when the connection conflicts with an existing one.
const CLOSE_POLICY_VIOLATION: u16 = 1008;
/// Close code sent when the broadcast engine is gone.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Register the socket under `token` and run it until either side goes away.
pub async fn serve(socket: WebSocket, hub: Hub, token: String, user_id: UserId) {
    let (ws_tx, ws_rx) = socket.split();
    run(ws_tx, ws_rx, hub, token, user_id).await;
}

async fn run<W, R>(mut ws_tx: W, ws_rx: R, hub: Hub, token: String, user_id: UserId)
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Debug + Send,
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let (handle, outbox) = connection_channel(OUTBOX_CAPACITY);

    let id = match hub.register(token.clone(), user_id, handle).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(user_id, token = fingerprint(&token), error = %e, "connection refused");
            let code = match e {
                HubError::Closed => CLOSE_INTERNAL_ERROR,
                _ => CLOSE_POLICY_VIOLATION,
            };
            let _ = send_close(&mut ws_tx, code, &e.to_string()).await;
            return;
        }
    };

    let mut writer = tokio::spawn(write_pump(ws_tx, outbox));
    let writer_finished = read_loop(ws_rx, &mut writer).await;

    match hub.unregister_connection(token.clone(), id).await {
        Ok(_) => {}
        // Already removed by a failed delivery or a sign-out.
        Err(HubError::NotFound) => {}
        Err(e) => tracing::warn!(user_id, error = %e, "unregister failed"),
    }

    if !writer_finished && time::timeout(WRITE_WAIT, &mut writer).await.is_err() {
        writer.abort();
    }
    tracing::debug!(user_id, token = fingerprint(&token), "connection finished");
}

/// Returns `true` when the loop ended because the write pump stopped.
async fn read_loop<R>(mut ws_rx: R, writer: &mut JoinHandle<()>) -> bool
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        tokio::select! {
            _ = &mut *writer => return true,
            frame = time::timeout(PONG_WAIT, ws_rx.next()) => match frame {
                Err(_) => {
                    tracing::debug!("peer idle past read deadline");
                    return false;
                }
                Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return false,
                Ok(Some(Err(e))) => {
                    tracing::debug!(?e, "ws read error");
                    return false;
                }
                Ok(Some(Ok(_))) => {}
            },
        }
    }
}

async fn write_pump<W>(mut ws_tx: W, outbox: Outbox)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Debug,
{
    let Outbox {
        mut messages,
        mut closed,
    } = outbox;
    let mut ping = time::interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        let frame = tokio::select! {
            biased;
            _ = &mut closed => break,
            message = messages.recv() => match message {
                Some(text) => Message::Text(text.as_ref().into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match time::timeout(WRITE_WAIT, ws_tx.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(?e, "ws write error");
                return;
            }
            Err(_) => {
                tracing::debug!("ws write deadline exceeded");
                return;
            }
        }
    }

    let _ = time::timeout(WRITE_WAIT, ws_tx.send(Message::Close(None))).await;
}

async fn send_close<W>(ws_tx: &mut W, code: u16, reason: &str) -> Result<(), W::Error>
where
    W: Sink<Message> + Unpin,
{
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }));
    ws_tx.send(close_msg).await
}
