//! Chat topic poll loop.
//!
//! One consumer, one loop, synchronous handling.  Offsets auto-commit; the
//! dispatcher guarantees the handler never fails, so a bad record can only
//! cost itself, never the partition.

use crate::dispatcher::Dispatcher;
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
        .set("auto.offset.reset", "latest")
        .set("session.timeout.ms", "6000")
        .create()?;
    consumer.subscribe(&[cfg.topic.as_str()])?;
    Ok(consumer)
}

pub async fn run(
    consumer: StreamConsumer,
    dispatcher: Arc<Dispatcher>,
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
                        // Broker hiccups surface here every poll; nothing to
                        // do but log and poll again.
                        warn!(error = %e, "chat topic poll failed");
                    }
                    Ok(record) => {
                        let Some(payload) = record.payload() else {
                            warn!("chat record with empty payload, skipping");
                            continue;
                        };
                        let _ = dispatcher.handle_record(payload).await;
                    }
                }
            }
        }
    }
    info!("chat consumer loop exited");
}
