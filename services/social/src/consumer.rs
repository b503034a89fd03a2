//! Change-record poll loop for the follows table topic.

use crate::cache::FollowCounts;
use rdkafka::ClientConfig;
use rdkafka::Message;
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub bootstrap: String,
    pub group_id: String,
    pub topic: String,
}

pub fn build_consumer(cfg: &ConsumerConfig) -> Result<StreamConsumer, rdkafka::error::KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &cfg.bootstrap)
        .set("group.id", &cfg.group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "6000")
        .create()?;
    consumer.subscribe(&[cfg.topic.as_str()])?;
    Ok(consumer)
}

pub async fn run(
    consumer: StreamConsumer,
    counts: Arc<dyn FollowCounts>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            polled = consumer.recv() => {
                match polled {
                    Err(e) => {
                        warn!(error = %e, "change topic poll failed");
                    }
                    Ok(record) => {
                        let Some(payload) = record.payload() else {
                            // Tombstones carry no payload; nothing to apply.
                            continue;
                        };
                        let _ = crate::cdc::handle_record(payload, counts.as_ref()).await;
                    }
                }
            }
        }
    }
    info!("change consumer loop exited");
}
