//! Relay of backend events from the durable queue to connected clients.
//!
//! The bridge consumes with manual acknowledgement. A message is acked only
//! after the broadcast engine has accepted it, so a crash between receipt and
//! hand-off leaves it on the queue for redelivery. Connection loss is retried
//! forever with a fixed backoff; [`BrokerStatus`] reports the outage to the
//! health endpoint in the meantime.

pub mod nats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_common::EventEnvelope;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time;

use crate::gateway::{BroadcastReport, Hub, HubError};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("broker connection failed: {0}")]
    Connect(#[source] BoxError),
    #[error("queue setup failed: {0}")]
    Setup(#[source] BoxError),
    #[error("receive failed: {0}")]
    Receive(#[source] BoxError),
    #[error("ack failed: {0}")]
    Ack(#[source] BoxError),
    #[error("broker closed the delivery stream")]
    StreamClosed,
}

/// Opens a consumer on the durable queue.
#[async_trait]
pub trait QueueConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn QueueConsumer>, BridgeError>;
}

#[async_trait]
pub trait QueueConsumer: Send {
    /// Next delivery. `Ok(None)` means the broker ended the stream.
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>, BridgeError>;
}

/// One message received from the queue, not yet acknowledged.
#[async_trait]
pub trait Delivery: Send {
    fn payload(&self) -> &[u8];
    async fn ack(&mut self) -> Result<(), BridgeError>;
}

/// Whether the bridge currently holds a broker connection.
#[derive(Clone, Debug, Default)]
pub struct BrokerStatus(Arc<AtomicBool>);

impl BrokerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.0.store(connected, Ordering::Release);
    }
}

enum Routed {
    Delivered,
    HubClosed,
}

pub struct QueueBridge<C> {
    connector: C,
    hub: Hub,
    status: BrokerStatus,
    retry_delay: Duration,
}

impl<C: QueueConnector> QueueBridge<C> {
    pub fn new(connector: C, hub: Hub, status: BrokerStatus, retry_delay: Duration) -> Self {
        Self {
            connector,
            hub,
            status,
            retry_delay,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Consume until the broadcast engine stops, reconnecting on any broker
    /// failure.
    pub async fn run(self) {
        loop {
            match self.connector.connect().await {
                Ok(mut consumer) => {
                    self.status.set_connected(true);
                    tracing::info!("queue consumer started");
                    let result = self.consume(consumer.as_mut()).await;
                    self.status.set_connected(false);
                    match result {
                        Ok(()) => {
                            tracing::info!("broadcast engine stopped, queue consumer exiting");
                            return;
                        }
                        Err(e) => tracing::warn!(error = %e, "queue consumer lost"),
                    }
                }
                Err(e) => tracing::warn!(error = %e, "broker unavailable"),
            }
            tracing::info!(retry_in = ?self.retry_delay, "reconnecting to broker");
            time::sleep(self.retry_delay).await;
        }
    }

    async fn consume(&self, consumer: &mut dyn QueueConsumer) -> Result<(), BridgeError> {
        loop {
            let mut delivery = consumer.next().await?.ok_or(BridgeError::StreamClosed)?;
            match self.route(delivery.payload()).await {
                Routed::Delivered => delivery.ack().await?,
                // Left unacked; the broker redelivers it to the next consumer.
                Routed::HubClosed => return Ok(()),
            }
        }
    }

    async fn route(&self, payload: &[u8]) -> Routed {
        let Ok(text) = std::str::from_utf8(payload) else {
            tracing::warn!(len = payload.len(), "discarding non-UTF-8 event");
            return Routed::Delivered;
        };
        let result = match EventEnvelope::recipients(payload) {
            Ok(Some(user_ids)) => self.hub.broadcast_to_users(user_ids, text).await,
            Ok(None) => self.hub.broadcast_all(text).await,
            Err(e) => {
                tracing::warn!(error = %e, "discarding event with malformed recipients");
                return Routed::Delivered;
            }
        };
        match result {
            Ok(report) => {
                log_report(&report);
                Routed::Delivered
            }
            Err(HubError::Closed) => Routed::HubClosed,
            Err(e) => {
                tracing::error!(error = %e, "broadcast failed");
                Routed::Delivered
            }
        }
    }
}

fn log_report(report: &BroadcastReport) {
    if let Err(e) = report.ensure_complete() {
        tracing::debug!(error = %e, delivered = report.delivered, "event partially delivered");
    } else {
        tracing::debug!(delivered = report.delivered, "event relayed");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use parking_lot::Mutex;

    use super::*;
    use crate::gateway::registry::connection_channel;

    type Script = Arc<Mutex<VecDeque<Result<Vec<Vec<u8>>, ()>>>>;

    /// Hands out one scripted session per connect. Each session yields its
    /// payloads and then fails as if the connection dropped.
    #[derive(Clone, Default)]
    struct FakeConnector {
        sessions: Script,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
        connects: Arc<AtomicUsize>,
    }

    impl FakeConnector {
        fn push_session(&self, payloads: &[&[u8]]) {
            self.sessions
                .lock()
                .push_back(Ok(payloads.iter().map(|p| p.to_vec()).collect()));
        }

        fn push_refusal(&self) {
            self.sessions.lock().push_back(Err(()));
        }
    }

    struct FakeConsumer {
        pending: VecDeque<Vec<u8>>,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    struct FakeDelivery {
        payload: Vec<u8>,
        acked: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    #[async_trait]
    impl QueueConnector for FakeConnector {
        async fn connect(&self) -> Result<Box<dyn QueueConsumer>, BridgeError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            match self.sessions.lock().pop_front() {
                Some(Ok(payloads)) => Ok(Box::new(FakeConsumer {
                    pending: payloads.into(),
                    acked: self.acked.clone(),
                })),
                _ => Err(BridgeError::Connect("connection refused".into())),
            }
        }
    }

    #[async_trait]
    impl QueueConsumer for FakeConsumer {
        async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>, BridgeError> {
            match self.pending.pop_front() {
                Some(payload) => Ok(Some(Box::new(FakeDelivery {
                    payload,
                    acked: self.acked.clone(),
                }))),
                None => Err(BridgeError::Receive("connection reset".into())),
            }
        }
    }

    #[async_trait]
    impl Delivery for FakeDelivery {
        fn payload(&self) -> &[u8] {
            &self.payload
        }

        async fn ack(&mut self) -> Result<(), BridgeError> {
            self.acked.lock().push(self.payload.clone());
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    fn bridge(connector: FakeConnector, hub: Hub) -> (QueueBridge<FakeConnector>, BrokerStatus) {
        let status = BrokerStatus::new();
        (
            QueueBridge::new(connector, hub, status.clone(), Duration::from_secs(5)),
            status,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn targeted_event_reaches_only_its_users_and_is_acked() {
        let hub = Hub::spawn();
        let (h42, mut to_42) = connection_channel(8);
        let (h7, mut to_7) = connection_channel(8);
        hub.register("A", 42, h42).await.unwrap();
        hub.register("B", 7, h7).await.unwrap();

        let connector = FakeConnector::default();
        let event: &[u8] = br#"{"type":"reservation-created","userIDs":[42]}"#;
        connector.push_session(&[event]);
        let (bridge, _status) = bridge(connector.clone(), hub.clone());
        let task = bridge.spawn();

        let received = to_42.messages.recv().await.unwrap();
        assert_eq!(received.as_bytes(), event);
        assert!(to_7.messages.try_recv().is_err());

        settle().await;
        assert_eq!(connector.acked.lock().clone(), vec![event.to_vec()]);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn untargeted_event_goes_to_everyone() {
        let hub = Hub::spawn();
        let (h1, mut a) = connection_channel(8);
        let (h2, mut b) = connection_channel(8);
        hub.register("A", 1, h1).await.unwrap();
        hub.register("B", 2, h2).await.unwrap();

        let connector = FakeConnector::default();
        connector.push_session(&[b"room-list-changed"]);
        let (bridge, _status) = bridge(connector, hub);
        let task = bridge.spawn();

        assert_eq!(a.messages.recv().await.unwrap().as_ref(), "room-list-changed");
        assert_eq!(b.messages.recv().await.unwrap().as_ref(), "room-list-changed");
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_with_fixed_backoff_and_reports_status() {
        let hub = Hub::spawn();
        let (handle, mut outbox) = connection_channel(8);
        hub.register("A", 1, handle).await.unwrap();

        let connector = FakeConnector::default();
        connector.push_refusal();
        connector.push_refusal();
        connector.push_session(&[b"after outage"]);
        let (bridge, status) = bridge(connector.clone(), hub);
        let task = bridge.spawn();

        settle().await;
        assert!(!status.is_connected());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

        assert_eq!(outbox.messages.recv().await.unwrap().as_ref(), "after outage");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_recipients_are_acked_without_delivery() {
        let hub = Hub::spawn();
        let (handle, mut outbox) = connection_channel(8);
        hub.register("A", 1, handle).await.unwrap();

        let connector = FakeConnector::default();
        let bad: &[u8] = br#"{"userIDs":"1"}"#;
        connector.push_session(&[bad, b"next"]);
        let (bridge, _status) = bridge(connector.clone(), hub);
        let task = bridge.spawn();

        assert_eq!(outbox.messages.recv().await.unwrap().as_ref(), "next");
        assert!(connector.acked.lock().contains(&bad.to_vec()));
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn event_is_left_unacked_when_engine_has_stopped() {
        let hub = Hub::spawn();
        let connector = FakeConnector::default();
        connector.push_session(&[b"too late", b"never read"]);
        let (bridge, status) = bridge(connector.clone(), hub.clone());

        hub.shutdown().await;
        time::timeout(Duration::from_secs(1), bridge.run())
            .await
            .expect("bridge keeps running after the engine stopped");

        assert!(connector.acked.lock().is_empty());
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert!(!status.is_connected());
    }

    #[tokio::test]
    async fn status_flag_round_trips() {
        let status = BrokerStatus::new();
        assert!(!status.is_connected());
        status.set_connected(true);
        assert!(status.clone().is_connected());
    }
}
