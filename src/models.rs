//! Data models for Huddle Server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Call Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Connected,
    Ended,
    Missed,
    Declined,
    Failed,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
            CallStatus::Missed => "missed",
            CallStatus::Declined => "declined",
            CallStatus::Failed => "failed",
        }
    }

    /// Terminal statuses are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Missed | CallStatus::Declined | CallStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Invited,
    Ringing,
    Joined,
    Left,
    Declined,
    Missed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Invited => "invited",
            ParticipantStatus::Ringing => "ringing",
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Left => "left",
            ParticipantStatus::Declined => "declined",
            ParticipantStatus::Missed => "missed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ParticipantStatus::Left | ParticipantStatus::Declined | ParticipantStatus::Missed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Voice => "voice",
            CallType::Video => "video",
        }
    }

    /// Human-readable label used in chat-log messages
    pub fn label(&self) -> &'static str {
        match self {
            CallType::Voice => "Voice",
            CallType::Video => "Video",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum EndReason {
    Completed,
    /// The initiator hung up while the call was still ringing
    Cancelled,
    Missed,
    Declined,
    Error,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "lowercase")]
pub enum ParticipantRole {
    Initiator,
    Participant,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Call {
    pub id: String,
    /// Opaque session identifier shared with the media provider
    pub room_name: String,
    pub initiator_id: String,
    pub call_type: CallType,
    pub is_group: bool,
    pub status: CallStatus,
    /// Label of the originating conversation, if any
    pub chat_channel: Option<String>,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub created_at: String,
    pub end_reason: Option<EndReason>,
    /// Only meaningful once both started_at and ended_at are set
    pub duration_seconds: Option<i64>,
    /// Open key/value map (screen-share flag, recording URL, ...), JSON-encoded
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallParticipant {
    pub id: String,
    pub call_id: String,
    pub user_id: String,
    pub status: ParticipantStatus,
    pub role: ParticipantRole,
    pub invited_at: Option<String>,
    pub joined_at: Option<String>,
    pub left_at: Option<String>,
    pub had_video: bool,
    pub had_audio: bool,
    pub shared_screen: bool,
}

// ============================================================================
// Conversation Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: String,
    /// Lexicographically smaller user of the pair; empty for channel conversations
    pub user_a: String,
    pub user_b: String,
    pub channel: Option<String>,
    pub last_message_text: Option<String>,
    pub last_message_at: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub call_id: String,
    pub call_type: CallType,
    pub call_status: CallStatus,
    pub duration_seconds: Option<i64>,
    /// JSON-encoded list of participant user ids
    pub participant_ids: String,
    pub created_at: String,
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// One lifecycle event published to a participant's private channel.
///
/// `sent_at` (unix millis) lets a receiver discard stale duplicates, e.g.
/// a ring for a call already resolved through another device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum CallEvent {
    #[serde(rename = "incoming_call")]
    IncomingCall {
        call_id: String,
        room_name: String,
        call_type: CallType,
        is_group: bool,
        initiator_id: String,
        chat_channel: Option<String>,
        sent_at: i64,
    },

    #[serde(rename = "call_accepted")]
    CallAccepted {
        call_id: String,
        user_id: String,
        call_status: CallStatus,
        sent_at: i64,
    },

    #[serde(rename = "call_declined")]
    CallDeclined {
        call_id: String,
        user_id: String,
        call_status: CallStatus,
        sent_at: i64,
    },

    #[serde(rename = "participant_joined")]
    ParticipantJoined {
        call_id: String,
        user_id: String,
        sent_at: i64,
    },

    #[serde(rename = "participant_left")]
    ParticipantLeft {
        call_id: String,
        user_id: String,
        sent_at: i64,
    },

    #[serde(rename = "call_ended")]
    CallEnded {
        call_id: String,
        call_status: CallStatus,
        end_reason: EndReason,
        duration_seconds: Option<i64>,
        sent_at: i64,
    },
}

// ============================================================================
// WebSocket Models
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsClientMessage {
    /// Identity is established upstream; the subscriber names its own channel
    #[serde(rename = "subscribe")]
    Subscribe { user_id: String },

    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsServerMessage {
    #[serde(rename = "subscribed")]
    Subscribed { user_id: String },

    #[serde(rename = "event")]
    Event(CallEvent),

    #[serde(rename = "error")]
    Error { code: String, message: String },

    #[serde(rename = "pong")]
    Pong,
}

// ============================================================================
// API Request/Response Models
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InitiateCallRequest {
    pub participant_ids: Vec<String>,
    pub call_type: CallType,
    pub chat_channel: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallSessionResponse {
    pub call_id: String,
    pub room_name: String,
    pub credential: String,
    pub media_url: String,
}

#[derive(Debug, Serialize)]
pub struct CallDetailsResponse {
    pub call: Call,
    pub participants: Vec<CallParticipant>,
}

#[derive(Debug, Deserialize)]
pub struct MediaFlagsRequest {
    pub had_video: Option<bool>,
    pub had_audio: Option<bool>,
    pub shared_screen: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ActiveRoomsResponse {
    pub rooms: Vec<String>,
}

// ============================================================================
// Time helpers
// ============================================================================

pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a stored timestamp; None on missing or malformed input
pub fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
