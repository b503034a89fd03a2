//! Chat record dispatcher.
//!
//! One record in, at most one delivery out.  Every failure mode is
//! drop-and-log: a record that cannot be decoded, routed, or delivered must
//! never stall the partition behind it, so [`Dispatcher::handle_record`]
//! is infallible from the poll loop's point of view.

use crate::pool::DeliveryPool;
use sc_protocol::{ChatMessage, DeliverMessage};
use sc_registry::{Registry, Resolution};
use std::sync::Arc;
use tracing::{debug, warn};

/// What became of one chat record.  Only observed by tests and debug logs;
/// the poll loop commits regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Delivered(u32),
    /// Payload was not a valid chat envelope (poison pill).
    BadRecord,
    /// No instance currently owns the `(room, session)` pair.
    Unroutable,
    LookupFailed,
    DeliveryFailed,
}

pub struct Dispatcher {
    registry: Arc<dyn Registry>,
    pool: Arc<DeliveryPool>,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn Registry>, pool: Arc<DeliveryPool>) -> Self {
        Self { registry, pool }
    }

    pub async fn handle_record(&self, payload: &[u8]) -> Disposition {
        let message: ChatMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "skipping undecodable chat record");
                return Disposition::BadRecord;
            }
        };

        let resolution = match self
            .registry
            .lookup(&message.room_id, &message.session_id)
            .await
        {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(
                    room_id = %message.room_id,
                    session_id = %message.session_id,
                    error = %e,
                    "registry lookup failed, dropping message"
                );
                return Disposition::LookupFailed;
            }
        };

        let address = match resolution {
            Resolution::Address(address) => address,
            Resolution::NotRegistered => {
                debug!(
                    room_id = %message.room_id,
                    session_id = %message.session_id,
                    "no owning instance, dropping message"
                );
                return Disposition::Unroutable;
            }
        };

        let request = DeliverMessage {
            room_id: message.room_id.clone(),
            session_id: message.session_id.clone(),
            message: message.into_payload(),
        };

        match self.pool.deliver(&address, request).await {
            Ok(result) => {
                debug!(
                    address = %address,
                    delivered = result.delivered_count,
                    "chat message delivered"
                );
                Disposition::Delivered(result.delivered_count)
            }
            Err(e) => {
                warn!(address = %address, error = %e, "delivery failed, dropping message");
                Disposition::DeliveryFailed
            }
        }
    }
}
