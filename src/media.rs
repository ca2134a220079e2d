//! Media session provider client
//!
//! The media plane (room creation, stream routing) lives in external
//! infrastructure; the server only issues join credentials for it and
//! answers narrow queries about live sessions.

use axum::async_trait;
use std::sync::Arc;

use crate::config::MediaConfig;
use crate::crypto;
use crate::error::{AppError, Result};
use crate::storage::Storage;

/// A participant as seen by the media plane
#[derive(Debug, Clone, serde::Serialize)]
pub struct RoomParticipant {
    pub user_id: String,
    pub room: String,
}

/// Narrow client contract to the external real-time media service.
/// The controller depends only on this trait.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Issue a join credential for one user in one room. `can_create_room`
    /// is granted to the initiator only; the room must exist by the time
    /// anyone else is notified.
    fn create_token(
        &self,
        room: &str,
        display_name: &str,
        user_id: &str,
        can_create_room: bool,
    ) -> Result<String>;

    fn url(&self) -> String;

    async fn list_participants(&self, room: &str) -> Result<Vec<RoomParticipant>>;

    async fn list_active_rooms(&self) -> Result<Vec<String>>;
}

/// Credential issuer for a self-hosted media plane that validates HMAC
/// tokens against a shared secret. Session queries are answered from the
/// call store, which is the system of record for live rooms.
pub struct HmacMediaProvider {
    config: MediaConfig,
    storage: Arc<Storage>,
}

impl HmacMediaProvider {
    pub fn new(config: MediaConfig, storage: Arc<Storage>) -> Self {
        Self { config, storage }
    }
}

#[async_trait]
impl MediaProvider for HmacMediaProvider {
    fn is_configured(&self) -> bool {
        self.config.enabled && !self.config.token_secret.is_empty() && !self.config.url.is_empty()
    }

    fn create_token(
        &self,
        room: &str,
        _display_name: &str,
        user_id: &str,
        can_create_room: bool,
    ) -> Result<String> {
        if !self.is_configured() {
            return Err(AppError::Configuration(
                "Media provider is not configured".to_string(),
            ));
        }

        Ok(crypto::generate_media_credential(
            &self.config.token_secret,
            room,
            user_id,
            can_create_room,
            self.config.token_ttl_seconds,
        ))
    }

    fn url(&self) -> String {
        self.config.url.clone()
    }

    async fn list_participants(&self, room: &str) -> Result<Vec<RoomParticipant>> {
        let participants = self.storage.list_room_participants(room).await?;

        Ok(participants
            .into_iter()
            .map(|user_id| RoomParticipant {
                user_id,
                room: room.to_string(),
            })
            .collect())
    }

    async fn list_active_rooms(&self) -> Result<Vec<String>> {
        Ok(self.storage.list_live_rooms().await?)
    }
}
