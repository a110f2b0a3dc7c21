//! NATS JetStream backing for the queue bridge.
//!
//! The queue is a file-backed stream whose single subject shares its name,
//! read through a durable pull consumer with explicit acks.

use async_nats::jetstream::{self, consumer, stream};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

use super::{BridgeError, Delivery, QueueConnector, QueueConsumer};

type MessageStream =
    BoxStream<'static, Result<jetstream::Message, jetstream::consumer::pull::MessagesError>>;

pub struct NatsConnector {
    url: String,
    queue: String,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl QueueConnector for NatsConnector {
    async fn connect(&self) -> Result<Box<dyn QueueConsumer>, BridgeError> {
        tracing::info!(url = %self.url, queue = %self.queue, "connecting to broker");
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| BridgeError::Connect(e.into()))?;
        let js = jetstream::new(client.clone());

        let queue = js
            .get_or_create_stream(stream::Config {
                name: self.queue.clone(),
                subjects: vec![self.queue.clone()],
                retention: stream::RetentionPolicy::WorkQueue,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BridgeError::Setup(e.into()))?;

        let consumer = queue
            .get_or_create_consumer(
                &self.queue,
                consumer::pull::Config {
                    durable_name: Some(self.queue.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BridgeError::Setup(e.into()))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BridgeError::Setup(e.into()))?;

        Ok(Box::new(NatsConsumer {
            _client: client,
            messages: messages.boxed(),
        }))
    }
}

struct NatsConsumer {
    // Keeps the connection open for as long as the consumer lives.
    _client: async_nats::Client,
    messages: MessageStream,
}

#[async_trait]
impl QueueConsumer for NatsConsumer {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>, BridgeError> {
        match self.messages.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(NatsDelivery(message)))),
            Some(Err(e)) => Err(BridgeError::Receive(e.into())),
            None => Ok(None),
        }
    }
}

struct NatsDelivery(jetstream::Message);

#[async_trait]
impl Delivery for NatsDelivery {
    fn payload(&self) -> &[u8] {
        &self.0.payload
    }

    async fn ack(&mut self) -> Result<(), BridgeError> {
        self.0.ack().await.map_err(BridgeError::Ack)
    }
}
