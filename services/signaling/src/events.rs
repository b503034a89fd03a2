//! Broadcast lifecycle event production.
//!
//! Events are keyed by room id so a room's history lands on one partition
//! in emission order.  Publishing is fire-and-forget from the state
//! machine's point of view: enqueue failures and per-message delivery
//! failures are logged, never surfaced to the client path.

use async_trait::async_trait;
use sc_protocol::BroadcastEvent;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

#[async_trait]
pub trait BroadcastEvents: Send + Sync {
    async fn publish(&self, event: BroadcastEvent);

    /// Flush outstanding deliveries within a bounded budget.  Idempotent.
    async fn close(&self);
}

// ---------------------------------------------------------------------------
// Kafka implementation
// ---------------------------------------------------------------------------

use rdkafka::ClientConfig;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;

pub struct KafkaBroadcastEvents {
    producer: FutureProducer,
    bootstrap: String,
    topic: String,
}

impl KafkaBroadcastEvents {
    pub fn new(bootstrap: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap)
            // Leader ack is enough; downstream tolerates rare loss via the
            // idle-timeout heuristic.
            .set("acks", "1")
            .set("compression.type", "lz4")
            .set("linger.ms", "5")
            .set("message.timeout.ms", "5000")
            .create()?;
        Ok(Self {
            producer,
            bootstrap: bootstrap.to_owned(),
            topic: topic.to_owned(),
        })
    }

    /// Create the event topic with the configured partition count if it does
    /// not exist yet.  Room-ordering relies on keyed partitioning, so the
    /// partition count is fixed at provisioning time.
    pub async fn ensure_topic(&self, partitions: i32) -> Result<(), rdkafka::error::KafkaError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.bootstrap)
            .create()?;
        let topic = NewTopic::new(&self.topic, partitions, TopicReplication::Fixed(1));
        let results = admin
            .create_topics(&[topic], &AdminOptions::new())
            .await?;
        for result in results {
            match result {
                Ok(created) => debug!(topic = %created, partitions, "event topic created"),
                Err((existing, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!(topic = %existing, "event topic already exists");
                }
                Err((failed, code)) => {
                    warn!(topic = %failed, ?code, "event topic creation failed");
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl BroadcastEvents for KafkaBroadcastEvents {
    async fn publish(&self, event: BroadcastEvent) {
        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "unencodable broadcast event");
                return;
            }
        };
        let key = event.room_id().to_owned();

        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);
        match self.producer.send_result(record) {
            Err((e, _record)) => {
                warn!(room_id = %key, error = %e, "broadcast event enqueue failed");
            }
            Ok(delivery) => {
                // Delivery reports are consumed off the hot path; a failed
                // report costs the event, not the session.
                let room_id = key;
                tokio::spawn(async move {
                    match delivery.await {
                        Ok(Ok(_)) => debug!(room_id = %room_id, "broadcast event delivered"),
                        Ok(Err((e, _msg))) => {
                            warn!(room_id = %room_id, error = %e, "broadcast event delivery failed");
                        }
                        Err(_canceled) => {
                            warn!(room_id = %room_id, "broadcast event delivery canceled");
                        }
                    }
                });
            }
        }
    }

    async fn close(&self) {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(Duration::from_secs(5)))
        })
        .await;
        match flushed {
            Ok(Ok(())) => debug!("broadcast event producer flushed"),
            Ok(Err(e)) => warn!(error = %e, "broadcast event flush failed"),
            Err(e) => warn!(error = %e, "broadcast event flush task failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, local development)
// ---------------------------------------------------------------------------

/// Collects events in memory, preserving per-room emission order.
#[derive(Default)]
pub struct MemoryBroadcastEvents {
    events: Mutex<Vec<BroadcastEvent>>,
}

impl MemoryBroadcastEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<BroadcastEvent> {
        self.events.lock().await.clone()
    }

    pub async fn events_for_room(&self, room_id: &str) -> Vec<BroadcastEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.room_id() == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BroadcastEvents for MemoryBroadcastEvents {
    async fn publish(&self, event: BroadcastEvent) {
        self.events.lock().await.push(event);
    }

    async fn close(&self) {}
}
