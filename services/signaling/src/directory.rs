//! Seams for the room service and the media ingest.
//!
//! Both are external HTTP collaborators; the signaling core only needs
//! "who owns this room" and "trade this SDP offer for an answer", so each
//! is a small trait with an HTTP implementation and a static double.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// Room directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: String,
    pub owner_id: String,
    #[serde(default)]
    pub hls_url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("room service unreachable: {0}")]
    Unavailable(String),
    #[error("room service returned malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// `Ok(None)` means the room does not exist.
    async fn room(&self, room_id: &str) -> Result<Option<RoomInfo>, DirectoryError>;
}

pub struct HttpRoomDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRoomDirectory {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn room(&self, room_id: &str) -> Result<Option<RoomInfo>, DirectoryError> {
        let url = format!("{}/api/v1/rooms/{}", self.base_url, room_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let info: RoomInfo = response
            .error_for_status()
            .map_err(|e| DirectoryError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| DirectoryError::Malformed(e.to_string()))?;
        Ok(Some(info))
    }
}

/// Fixed room table for tests and local development.
#[derive(Debug, Default)]
pub struct StaticRoomDirectory {
    rooms: HashMap<String, RoomInfo>,
}

impl StaticRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_room(mut self, room_id: &str, owner_id: &str, hls_url: Option<&str>) -> Self {
        self.rooms.insert(
            room_id.to_owned(),
            RoomInfo {
                room_id: room_id.to_owned(),
                owner_id: owner_id.to_owned(),
                hls_url: hls_url.map(ToOwned::to_owned),
            },
        );
        self
    }
}

#[async_trait]
impl RoomDirectory for StaticRoomDirectory {
    async fn room(&self, room_id: &str) -> Result<Option<RoomInfo>, DirectoryError> {
        Ok(self.rooms.get(room_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Media ingest
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("media ingest unreachable: {0}")]
    Unavailable(String),
    #[error("media ingest rejected the session: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MediaIngest: Send + Sync {
    /// Forward the broadcaster's SDP offer; returns the ingest's SDP answer.
    async fn start_session(&self, room_id: &str, offer: &str) -> Result<String, IngestError>;

    /// Forward a trickle ICE candidate for an active session.
    async fn add_candidate(
        &self,
        room_id: &str,
        candidate: &serde_json::Value,
    ) -> Result<(), IngestError>;

    async fn stop_session(&self, room_id: &str) -> Result<(), IngestError>;
}

#[derive(Debug, Serialize)]
struct OfferRequest<'a> {
    offer: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

pub struct HttpMediaIngest {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMediaIngest {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

#[async_trait]
impl MediaIngest for HttpMediaIngest {
    async fn start_session(&self, room_id: &str, offer: &str) -> Result<String, IngestError> {
        let url = format!("{}/api/v1/ingest/{}/offer", self.base_url, room_id);
        let response = self
            .client
            .post(&url)
            .json(&OfferRequest { offer })
            .send()
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?;
        if response.status().is_client_error() {
            return Err(IngestError::Rejected(response.status().to_string()));
        }
        let body: AnswerResponse = response
            .error_for_status()
            .map_err(|e| IngestError::Unavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?;
        Ok(body.answer)
    }

    async fn add_candidate(
        &self,
        room_id: &str,
        candidate: &serde_json::Value,
    ) -> Result<(), IngestError> {
        let url = format!("{}/api/v1/ingest/{}/candidate", self.base_url, room_id);
        self.client
            .post(&url)
            .json(candidate)
            .send()
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| IngestError::Rejected(e.to_string()))?;
        Ok(())
    }

    async fn stop_session(&self, room_id: &str) -> Result<(), IngestError> {
        let url = format!("{}/api/v1/ingest/{}/session", self.base_url, room_id);
        self.client
            .delete(&url)
            .send()
            .await
            .map_err(|e| IngestError::Unavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| IngestError::Rejected(e.to_string()))?;
        Ok(())
    }
}

/// Ingest double: answers every offer with a canned SDP and records calls.
#[derive(Debug, Default)]
pub struct StaticMediaIngest {
    started: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
    candidates: Mutex<Vec<(String, serde_json::Value)>>,
}

impl StaticMediaIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn started_rooms(&self) -> Vec<String> {
        self.started.lock().await.clone()
    }

    pub async fn stopped_rooms(&self) -> Vec<String> {
        self.stopped.lock().await.clone()
    }

    pub async fn candidates(&self) -> Vec<(String, serde_json::Value)> {
        self.candidates.lock().await.clone()
    }
}

#[async_trait]
impl MediaIngest for StaticMediaIngest {
    async fn start_session(&self, room_id: &str, _offer: &str) -> Result<String, IngestError> {
        self.started.lock().await.push(room_id.to_owned());
        Ok(format!("v=0 answer-for-{room_id}"))
    }

    async fn add_candidate(
        &self,
        room_id: &str,
        candidate: &serde_json::Value,
    ) -> Result<(), IngestError> {
        self.candidates
            .lock()
            .await
            .push((room_id.to_owned(), candidate.clone()));
        Ok(())
    }

    async fn stop_session(&self, room_id: &str) -> Result<(), IngestError> {
        self.stopped.lock().await.push(room_id.to_owned());
        Ok(())
    }
}
