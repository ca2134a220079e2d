//! Chat log bridge for Huddle Server
//!
//! Mirrors call outcomes into conversation history: a human-readable system
//! message per recipient plus the conversation preview, so every view of the
//! conversation shows the same call outcome. Writes are per-recipient and
//! isolated; one failure never blocks the others. Errors are logged only,
//! since the call transition that triggered the mirror has already committed.

use std::sync::Arc;

use crate::models::*;
use crate::storage::Storage;

pub struct ChatLogBridge {
    storage: Arc<Storage>,
}

/// "2m 14s" style rendering for chat-log entries
fn format_duration(seconds: i64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Render a call state into the system message shown in conversation history
pub fn describe_call(call: &Call) -> String {
    match call.status {
        CallStatus::Ringing => format!("Started a {} call", call.call_type.as_str()),
        CallStatus::Connected => format!("{} call in progress", call.call_type.label()),
        CallStatus::Ended => match call.duration_seconds {
            Some(d) => format!("{} call · {}", call.call_type.label(), format_duration(d)),
            // Ended without a duration means the ring was cancelled
            None => format!("Cancelled {} call", call.call_type.as_str()),
        },
        CallStatus::Missed => format!("Missed {} call", call.call_type.as_str()),
        CallStatus::Declined => format!("Declined {} call", call.call_type.as_str()),
        CallStatus::Failed => format!("{} call failed", call.call_type.label()),
    }
}

impl ChatLogBridge {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Mirror the call's current outcome into the relevant conversation(s)
    pub async fn record(&self, call: &Call, participant_ids: &[String]) {
        let body = describe_call(call);
        let participant_ids_json = serde_json::to_string(participant_ids)
            .unwrap_or_else(|_| "[]".to_string());

        if let Some(channel) = &call.chat_channel {
            self.record_channel(call, channel, &body, &participant_ids_json, participant_ids)
                .await;
        } else {
            self.record_pairs(call, &body, &participant_ids_json, participant_ids)
                .await;
        }
    }

    /// One entry per recipient in the originating channel conversation
    async fn record_channel(
        &self,
        call: &Call,
        channel: &str,
        body: &str,
        participant_ids_json: &str,
        participant_ids: &[String],
    ) {
        let conversation = match self.storage.get_or_create_channel_conversation(channel).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Chat-log skipped for call {}: {}", call.id, e);
                return;
            }
        };

        // Channel membership is owned by the messaging side; fall back to
        // the call roster when the conversation has no history yet
        let mut recipients = self
            .storage
            .list_conversation_recipients(&conversation.id)
            .await
            .unwrap_or_default();
        if recipients.is_empty() {
            recipients = participant_ids
                .iter()
                .filter(|id| **id != call.initiator_id)
                .cloned()
                .collect();
        }

        for recipient in &recipients {
            self.insert_message(call, &conversation.id, recipient, body, participant_ids_json)
                .await;
        }

        self.update_preview(&conversation.id, body).await;
    }

    /// One pair conversation between the initiator and each other participant
    async fn record_pairs(
        &self,
        call: &Call,
        body: &str,
        participant_ids_json: &str,
        participant_ids: &[String],
    ) {
        for recipient in participant_ids.iter().filter(|id| **id != call.initiator_id) {
            let conversation = match self
                .storage
                .get_or_create_pair_conversation(&call.initiator_id, recipient)
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        "Chat-log skipped for call {} recipient {}: {}",
                        call.id,
                        recipient,
                        e
                    );
                    continue;
                }
            };

            self.insert_message(call, &conversation.id, recipient, body, participant_ids_json)
                .await;
            self.update_preview(&conversation.id, body).await;
        }
    }

    async fn insert_message(
        &self,
        call: &Call,
        conversation_id: &str,
        recipient: &str,
        body: &str,
        participant_ids_json: &str,
    ) {
        let message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: call.initiator_id.clone(),
            recipient_id: recipient.to_string(),
            body: body.to_string(),
            call_id: call.id.clone(),
            call_type: call.call_type,
            call_status: call.status,
            duration_seconds: call.duration_seconds,
            participant_ids: participant_ids_json.to_string(),
            created_at: now_rfc3339(),
        };

        if let Err(e) = self.storage.create_chat_message(&message).await {
            tracing::warn!(
                "Chat-log write failed for call {} recipient {}: {}",
                call.id,
                recipient,
                e
            );
        }
    }

    async fn update_preview(&self, conversation_id: &str, body: &str) {
        if let Err(e) = self
            .storage
            .update_conversation_preview(conversation_id, body, &now_rfc3339())
            .await
        {
            tracing::warn!("Preview update failed for conversation {}: {}", conversation_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_with(status: CallStatus, call_type: CallType, duration: Option<i64>) -> Call {
        Call {
            id: "c1".to_string(),
            room_name: "room-x".to_string(),
            initiator_id: "alice".to_string(),
            call_type,
            is_group: false,
            status,
            chat_channel: None,
            started_at: None,
            ended_at: None,
            created_at: now_rfc3339(),
            end_reason: None,
            duration_seconds: duration,
            metadata: None,
        }
    }

    #[test]
    fn test_describe_call_texts() {
        assert_eq!(
            describe_call(&call_with(CallStatus::Ringing, CallType::Video, None)),
            "Started a video call"
        );
        assert_eq!(
            describe_call(&call_with(CallStatus::Missed, CallType::Voice, None)),
            "Missed voice call"
        );
        assert_eq!(
            describe_call(&call_with(CallStatus::Declined, CallType::Video, None)),
            "Declined video call"
        );
        assert_eq!(
            describe_call(&call_with(CallStatus::Ended, CallType::Voice, Some(134))),
            "Voice call · 2m 14s"
        );
        assert_eq!(
            describe_call(&call_with(CallStatus::Ended, CallType::Video, Some(7))),
            "Video call · 7s"
        );
        assert_eq!(
            describe_call(&call_with(CallStatus::Ended, CallType::Voice, None)),
            "Cancelled voice call"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(60), "1m 0s");
        assert_eq!(format_duration(134), "2m 14s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
    }

    #[tokio::test]
    async fn test_record_writes_pair_conversations() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let bridge = ChatLogBridge::new(Arc::clone(&storage));

        let mut call = call_with(CallStatus::Ended, CallType::Video, Some(42));
        call.is_group = true;

        let participants = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        bridge.record(&call, &participants).await;

        // One conversation per non-initiator, each with one entry and a preview
        for other in ["bob", "carol"] {
            let conversation = storage
                .get_or_create_pair_conversation("alice", other)
                .await
                .unwrap();
            let messages = storage.list_messages(&conversation.id).await.unwrap();
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].body, "Video call · 42s");
            assert_eq!(messages[0].call_id, "c1");
            assert_eq!(messages[0].duration_seconds, Some(42));

            assert_eq!(
                conversation.last_message_text.as_deref(),
                Some("Video call · 42s")
            );
        }
    }

    #[tokio::test]
    async fn test_record_uses_channel_conversation() {
        let storage = Arc::new(Storage::in_memory().await.unwrap());
        let bridge = ChatLogBridge::new(Arc::clone(&storage));

        let mut call = call_with(CallStatus::Missed, CallType::Voice, None);
        call.chat_channel = Some("team-room".to_string());

        bridge
            .record(&call, &["alice".to_string(), "bob".to_string()])
            .await;

        let conversation = storage
            .get_or_create_channel_conversation("team-room")
            .await
            .unwrap();
        let messages = storage.list_messages(&conversation.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "Missed voice call");
        assert_eq!(messages[0].recipient_id, "bob");
        assert_eq!(
            conversation.last_message_text.as_deref(),
            Some("Missed voice call")
        );
    }
}
