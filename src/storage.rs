//! Database storage layer for Huddle Server
//!
//! All status-changing writes are conditional updates guarded by the
//! expected prior status. Callers check the returned bool (rows affected)
//! to learn whether *their* request performed the transition; that is the
//! only coordination primitive between concurrent requests.

use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use crate::models::*;

pub struct Storage {
    pool: Pool<Sqlite>,
}

fn status_list(statuses: &[ParticipantStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn call_status_list(statuses: &[CallStatus]) -> String {
    statuses
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Storage {
    pub async fn new(database_path: &str) -> anyhow::Result<Self> {
        // Ensure directory exists
        if let Some(parent) = Path::new(database_path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", database_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Shared in-memory database, used by the test suites
    pub async fn in_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id TEXT PRIMARY KEY,
                room_name TEXT NOT NULL UNIQUE,
                initiator_id TEXT NOT NULL,
                call_type TEXT NOT NULL,
                is_group INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                chat_channel TEXT,
                started_at TEXT,
                ended_at TEXT,
                created_at TEXT NOT NULL,
                end_reason TEXT,
                duration_seconds INTEGER,
                metadata TEXT
            );

            CREATE TABLE IF NOT EXISTS call_participants (
                id TEXT PRIMARY KEY,
                call_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                role TEXT NOT NULL,
                invited_at TEXT,
                joined_at TEXT,
                left_at TEXT,
                had_video INTEGER NOT NULL DEFAULT 0,
                had_audio INTEGER NOT NULL DEFAULT 1,
                shared_screen INTEGER NOT NULL DEFAULT 0,
                UNIQUE (call_id, user_id),
                FOREIGN KEY (call_id) REFERENCES calls(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_a TEXT NOT NULL,
                user_b TEXT NOT NULL,
                channel TEXT,
                last_message_text TEXT,
                last_message_at TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                body TEXT NOT NULL,
                call_id TEXT NOT NULL,
                call_type TEXT NOT NULL,
                call_status TEXT NOT NULL,
                duration_seconds INTEGER,
                participant_ids TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_calls_status ON calls(status);
            CREATE INDEX IF NOT EXISTS idx_participants_call ON call_participants(call_id);
            CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
                ON conversations(user_a, user_b) WHERE channel IS NULL;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_channel
                ON conversations(channel) WHERE channel IS NOT NULL;
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ========================================================================
    // Call Operations
    // ========================================================================

    /// Insert a call and all of its participant rows in one transaction
    pub async fn create_call(
        &self,
        call: &Call,
        participants: &[CallParticipant],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO calls
             (id, room_name, initiator_id, call_type, is_group, status, chat_channel,
              started_at, ended_at, created_at, end_reason, duration_seconds, metadata)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&call.id)
        .bind(&call.room_name)
        .bind(&call.initiator_id)
        .bind(call.call_type)
        .bind(call.is_group)
        .bind(call.status)
        .bind(&call.chat_channel)
        .bind(&call.started_at)
        .bind(&call.ended_at)
        .bind(&call.created_at)
        .bind(call.end_reason)
        .bind(call.duration_seconds)
        .bind(&call.metadata)
        .execute(&mut *tx)
        .await?;

        for p in participants {
            sqlx::query(
                "INSERT INTO call_participants
                 (id, call_id, user_id, status, role, invited_at, joined_at, left_at,
                  had_video, had_audio, shared_screen)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&p.id)
            .bind(&p.call_id)
            .bind(&p.user_id)
            .bind(p.status)
            .bind(p.role)
            .bind(&p.invited_at)
            .bind(&p.joined_at)
            .bind(&p.left_at)
            .bind(p.had_video)
            .bind(p.had_audio)
            .bind(p.shared_screen)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    pub async fn get_call(&self, call_id: &str) -> anyhow::Result<Option<Call>> {
        let call = sqlx::query_as::<_, Call>(
            "SELECT id, room_name, initiator_id, call_type, is_group, status, chat_channel,
                    started_at, ended_at, created_at, end_reason, duration_seconds, metadata
             FROM calls WHERE id = ?",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(call)
    }

    /// Conditionally move a ringing call to connected. Exactly one of several
    /// concurrent callers observes `true`.
    pub async fn connect_call(&self, call_id: &str, started_at: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE calls SET status = 'connected', started_at = ?
             WHERE id = ? AND status = 'ringing'",
        )
        .bind(started_at)
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Conditionally move a call into a terminal status
    pub async fn finish_call(
        &self,
        call_id: &str,
        from: &[CallStatus],
        to: CallStatus,
        end_reason: EndReason,
        ended_at: &str,
        duration_seconds: Option<i64>,
    ) -> anyhow::Result<bool> {
        let query = format!(
            "UPDATE calls SET status = ?, end_reason = ?, ended_at = ?, duration_seconds = ?
             WHERE id = ? AND status IN ({})",
            call_status_list(from)
        );

        let result = sqlx::query(&query)
            .bind(to)
            .bind(end_reason)
            .bind(ended_at)
            .bind(duration_seconds)
            .bind(call_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Merge a JSON patch into the call's open metadata map. A single
    /// `json_patch` update keeps concurrent merges from losing keys.
    pub async fn merge_call_metadata(
        &self,
        call_id: &str,
        patch: &serde_json::Value,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE calls SET metadata = json_patch(COALESCE(metadata, '{}'), ?) WHERE id = ?",
        )
        .bind(patch.to_string())
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Ringing calls created at or before the cutoff, for the missed-call sweep
    pub async fn list_stale_ringing(&self, cutoff: &str) -> anyhow::Result<Vec<Call>> {
        let calls = sqlx::query_as::<_, Call>(
            "SELECT id, room_name, initiator_id, call_type, is_group, status, chat_channel,
                    started_at, ended_at, created_at, end_reason, duration_seconds, metadata
             FROM calls WHERE status = 'ringing' AND created_at <= ?",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(calls)
    }

    /// Room names of calls that are currently ringing or connected
    pub async fn list_live_rooms(&self) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT room_name FROM calls WHERE status IN ('ringing', 'connected')
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(r,)| r).collect())
    }

    /// User ids currently joined to the call owning the given room
    pub async fn list_room_participants(&self, room: &str) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT p.user_id FROM call_participants p
             JOIN calls c ON p.call_id = c.id
             WHERE c.room_name = ? AND p.status = 'joined'
             ORDER BY p.joined_at ASC",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    // ========================================================================
    // Participant Operations
    // ========================================================================

    pub async fn get_participant(
        &self,
        call_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<CallParticipant>> {
        let participant = sqlx::query_as::<_, CallParticipant>(
            "SELECT id, call_id, user_id, status, role, invited_at, joined_at, left_at,
                    had_video, had_audio, shared_screen
             FROM call_participants WHERE call_id = ? AND user_id = ?",
        )
        .bind(call_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(participant)
    }

    pub async fn list_participants(&self, call_id: &str) -> anyhow::Result<Vec<CallParticipant>> {
        let participants = sqlx::query_as::<_, CallParticipant>(
            "SELECT id, call_id, user_id, status, role, invited_at, joined_at, left_at,
                    had_video, had_audio, shared_screen
             FROM call_participants WHERE call_id = ? ORDER BY invited_at ASC",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(participants)
    }

    /// Conditionally move one participant from any of the expected statuses.
    /// Sets joined_at or left_at depending on the target status.
    pub async fn mark_participant(
        &self,
        call_id: &str,
        user_id: &str,
        from: &[ParticipantStatus],
        to: ParticipantStatus,
        at: &str,
    ) -> anyhow::Result<bool> {
        let timestamp_col = if to == ParticipantStatus::Joined {
            "joined_at"
        } else {
            "left_at"
        };

        let query = format!(
            "UPDATE call_participants SET status = ?, {} = ?
             WHERE call_id = ? AND user_id = ? AND status IN ({})",
            timestamp_col,
            status_list(from)
        );

        let result = sqlx::query(&query)
            .bind(to)
            .bind(at)
            .bind(call_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Mark everyone still invited/ringing/joined as left (call teardown)
    pub async fn mark_remaining_left(&self, call_id: &str, at: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE call_participants SET status = 'left', left_at = ?
             WHERE call_id = ? AND status IN ('invited', 'ringing', 'joined')",
        )
        .bind(at)
        .bind(call_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count participants currently in any of the given statuses
    pub async fn count_participants(
        &self,
        call_id: &str,
        statuses: &[ParticipantStatus],
        exclude_initiator: bool,
    ) -> anyhow::Result<i64> {
        let mut query = format!(
            "SELECT COUNT(*) FROM call_participants
             WHERE call_id = ? AND status IN ({})",
            status_list(statuses)
        );
        if exclude_initiator {
            query.push_str(" AND role != 'initiator'");
        }

        let count: (i64,) = sqlx::query_as(&query)
            .bind(call_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    pub async fn update_media_flags(
        &self,
        call_id: &str,
        user_id: &str,
        had_video: Option<bool>,
        had_audio: Option<bool>,
        shared_screen: Option<bool>,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            "UPDATE call_participants SET
                had_video = COALESCE(?, had_video),
                had_audio = COALESCE(?, had_audio),
                shared_screen = COALESCE(?, shared_screen)
             WHERE call_id = ? AND user_id = ?",
        )
        .bind(had_video)
        .bind(had_audio)
        .bind(shared_screen)
        .bind(call_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// Find or create the direct conversation between two users.
    /// The pair is stored in lexicographic order so lookups are symmetric.
    pub async fn get_or_create_pair_conversation(
        &self,
        user_x: &str,
        user_y: &str,
    ) -> anyhow::Result<Conversation> {
        let (user_a, user_b) = if user_x <= user_y {
            (user_x, user_y)
        } else {
            (user_y, user_x)
        };

        sqlx::query(
            "INSERT OR IGNORE INTO conversations (id, user_a, user_b, channel, created_at)
             VALUES (?, ?, ?, NULL, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_a)
        .bind(user_b)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, user_a, user_b, channel, last_message_text, last_message_at, created_at
             FROM conversations WHERE user_a = ? AND user_b = ? AND channel IS NULL",
        )
        .bind(user_a)
        .bind(user_b)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Find or create the conversation backing a named channel (group chats)
    pub async fn get_or_create_channel_conversation(
        &self,
        channel: &str,
    ) -> anyhow::Result<Conversation> {
        sqlx::query(
            "INSERT OR IGNORE INTO conversations (id, user_a, user_b, channel, created_at)
             VALUES (?, '', '', ?, ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(channel)
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, user_a, user_b, channel, last_message_text, last_message_at, created_at
             FROM conversations WHERE channel = ?",
        )
        .bind(channel)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    /// Users who have received messages in this conversation. For direct
    /// conversations this is simply the stored pair.
    pub async fn list_conversation_recipients(
        &self,
        conversation_id: &str,
    ) -> anyhow::Result<Vec<String>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, user_a, user_b, channel, last_message_text, last_message_at, created_at
             FROM conversations WHERE id = ?",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(conversation) = conversation else {
            return Ok(Vec::new());
        };

        if conversation.channel.is_none() {
            return Ok(vec![conversation.user_a, conversation.user_b]);
        }

        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT recipient_id FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(r,)| r).collect())
    }

    pub async fn create_chat_message(&self, message: &ChatMessage) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO messages
             (id, conversation_id, sender_id, recipient_id, body, call_id, call_type,
              call_status, duration_seconds, participant_ids, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.recipient_id)
        .bind(&message.body)
        .bind(&message.call_id)
        .bind(message.call_type)
        .bind(message.call_status)
        .bind(message.duration_seconds)
        .bind(&message.participant_ids)
        .bind(&message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_messages(&self, conversation_id: &str) -> anyhow::Result<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            "SELECT id, conversation_id, sender_id, recipient_id, body, call_id, call_type,
                    call_status, duration_seconds, participant_ids, created_at
             FROM messages WHERE conversation_id = ? ORDER BY created_at ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Keep the lightweight conversation preview in sync with the latest entry
    pub async fn update_conversation_preview(
        &self,
        conversation_id: &str,
        text: &str,
        at: &str,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE conversations SET last_message_text = ?, last_message_at = ? WHERE id = ?",
        )
        .bind(text)
        .bind(at)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ringing_call(id: &str) -> Call {
        Call {
            id: id.to_string(),
            room_name: format!("room-{}", id),
            initiator_id: "alice".to_string(),
            call_type: CallType::Video,
            is_group: false,
            status: CallStatus::Ringing,
            chat_channel: None,
            started_at: None,
            ended_at: None,
            created_at: now_rfc3339(),
            end_reason: None,
            duration_seconds: None,
            metadata: None,
        }
    }

    fn participant(call_id: &str, user_id: &str, status: ParticipantStatus, role: ParticipantRole) -> CallParticipant {
        CallParticipant {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call_id.to_string(),
            user_id: user_id.to_string(),
            status,
            role,
            invited_at: Some(now_rfc3339()),
            joined_at: None,
            left_at: None,
            had_video: false,
            had_audio: true,
            shared_screen: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_fetch_call() {
        let storage = Storage::in_memory().await.unwrap();
        let call = ringing_call("c1");
        let parts = vec![
            participant("c1", "alice", ParticipantStatus::Joined, ParticipantRole::Initiator),
            participant("c1", "bob", ParticipantStatus::Ringing, ParticipantRole::Participant),
        ];

        storage.create_call(&call, &parts).await.unwrap();

        let fetched = storage.get_call("c1").await.unwrap().unwrap();
        assert_eq!(fetched.status, CallStatus::Ringing);
        assert_eq!(fetched.call_type, CallType::Video);
        assert!(fetched.started_at.is_none());

        let fetched_parts = storage.list_participants("c1").await.unwrap();
        assert_eq!(fetched_parts.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_call_fires_once() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_call(&ringing_call("c1"), &[]).await.unwrap();

        let first = storage.connect_call("c1", &now_rfc3339()).await.unwrap();
        let second = storage.connect_call("c1", &now_rfc3339()).await.unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(
            storage.get_call("c1").await.unwrap().unwrap().status,
            CallStatus::Connected
        );
    }

    #[tokio::test]
    async fn test_finish_call_guards_terminal_states() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_call(&ringing_call("c1"), &[]).await.unwrap();

        let ended = storage
            .finish_call(
                "c1",
                &[CallStatus::Ringing, CallStatus::Connected],
                CallStatus::Ended,
                EndReason::Completed,
                &now_rfc3339(),
                None,
            )
            .await
            .unwrap();
        assert!(ended);

        // Already terminal, the guarded update must not fire again
        let again = storage
            .finish_call(
                "c1",
                &[CallStatus::Ringing, CallStatus::Connected],
                CallStatus::Missed,
                EndReason::Timeout,
                &now_rfc3339(),
                None,
            )
            .await
            .unwrap();
        assert!(!again);

        let call = storage.get_call("c1").await.unwrap().unwrap();
        assert_eq!(call.status, CallStatus::Ended);
        assert_eq!(call.end_reason, Some(EndReason::Completed));
    }

    #[tokio::test]
    async fn test_mark_participant_conditional() {
        let storage = Storage::in_memory().await.unwrap();
        let parts = vec![participant("c1", "bob", ParticipantStatus::Ringing, ParticipantRole::Participant)];
        storage.create_call(&ringing_call("c1"), &parts).await.unwrap();

        let joined = storage
            .mark_participant(
                "c1",
                "bob",
                &[ParticipantStatus::Invited, ParticipantStatus::Ringing],
                ParticipantStatus::Joined,
                &now_rfc3339(),
            )
            .await
            .unwrap();
        assert!(joined);

        // Joined is not in the expected set anymore
        let declined = storage
            .mark_participant(
                "c1",
                "bob",
                &[ParticipantStatus::Invited, ParticipantStatus::Ringing],
                ParticipantStatus::Declined,
                &now_rfc3339(),
            )
            .await
            .unwrap();
        assert!(!declined);

        let p = storage.get_participant("c1", "bob").await.unwrap().unwrap();
        assert_eq!(p.status, ParticipantStatus::Joined);
        assert!(p.joined_at.is_some());
        assert!(p.left_at.is_none());
    }

    #[tokio::test]
    async fn test_mark_remaining_left_and_counts() {
        let storage = Storage::in_memory().await.unwrap();
        let parts = vec![
            participant("c1", "alice", ParticipantStatus::Joined, ParticipantRole::Initiator),
            participant("c1", "bob", ParticipantStatus::Joined, ParticipantRole::Participant),
            participant("c1", "carol", ParticipantStatus::Ringing, ParticipantRole::Participant),
        ];
        storage.create_call(&ringing_call("c1"), &parts).await.unwrap();

        let pending = storage
            .count_participants(
                "c1",
                &[ParticipantStatus::Ringing, ParticipantStatus::Joined],
                true,
            )
            .await
            .unwrap();
        assert_eq!(pending, 2);

        storage.mark_remaining_left("c1", &now_rfc3339()).await.unwrap();

        for user in ["alice", "bob", "carol"] {
            let p = storage.get_participant("c1", user).await.unwrap().unwrap();
            assert_eq!(p.status, ParticipantStatus::Left);
        }
    }

    #[tokio::test]
    async fn test_pair_conversation_is_symmetric() {
        let storage = Storage::in_memory().await.unwrap();

        let first = storage.get_or_create_pair_conversation("bob", "alice").await.unwrap();
        let second = storage.get_or_create_pair_conversation("alice", "bob").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.user_a, "alice");
        assert_eq!(first.user_b, "bob");
    }

    #[tokio::test]
    async fn test_metadata_merge() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_call(&ringing_call("c1"), &[]).await.unwrap();

        storage
            .merge_call_metadata("c1", &serde_json::json!({"screen_share": true}))
            .await
            .unwrap();
        storage
            .merge_call_metadata("c1", &serde_json::json!({"recording_url": "https://x/1"}))
            .await
            .unwrap();

        let call = storage.get_call("c1").await.unwrap().unwrap();
        let meta: serde_json::Value =
            serde_json::from_str(call.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(meta["screen_share"], true);
        assert_eq!(meta["recording_url"], "https://x/1");
    }

    #[tokio::test]
    async fn test_metadata_merge_keeps_concurrent_patches() {
        let storage = Storage::in_memory().await.unwrap();
        storage.create_call(&ringing_call("c1"), &[]).await.unwrap();

        let patch_a = serde_json::json!({"screen_share": true});
        let patch_b = serde_json::json!({"recording_url": "https://x/1"});
        let (a, b) = tokio::join!(
            storage.merge_call_metadata("c1", &patch_a),
            storage.merge_call_metadata("c1", &patch_b),
        );
        a.unwrap();
        b.unwrap();

        let call = storage.get_call("c1").await.unwrap().unwrap();
        let meta: serde_json::Value =
            serde_json::from_str(call.metadata.as_deref().unwrap()).unwrap();
        assert_eq!(meta["screen_share"], true);
        assert_eq!(meta["recording_url"], "https://x/1");
    }
}
