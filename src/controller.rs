//! Call lifecycle controller for Huddle Server
//!
//! Owns the call state machine:
//!
//! ```text
//! ringing -> connected -> ended
//! ringing -> declined | missed | failed
//! ```
//!
//! Requests from different participants arrive concurrently and possibly on
//! different server instances; the only coordination is the store's
//! conditional updates. Every transition here is a guarded write, and the
//! rows-affected result decides which request owns the transition's side
//! effects. Fan-out and chat-log mirroring run after the write commits and
//! are never awaited by the request that triggered them.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::chatlog::ChatLogBridge;
use crate::crypto;
use crate::error::{AppError, Result};
use crate::media::MediaProvider;
use crate::models::*;
use crate::notify::CallNotifier;
use crate::storage::Storage;

/// Participant statuses that still count as "pending or present" for the
/// purpose of deciding whether a ringing call can be resolved
const PENDING: &[ParticipantStatus] = &[ParticipantStatus::Invited, ParticipantStatus::Ringing];
const ACTIVE: &[ParticipantStatus] = &[
    ParticipantStatus::Invited,
    ParticipantStatus::Ringing,
    ParticipantStatus::Joined,
];

pub struct CallController {
    storage: Arc<Storage>,
    media: Arc<dyn MediaProvider>,
    notifier: CallNotifier,
    chatlog: Arc<ChatLogBridge>,
}

impl CallController {
    pub fn new(
        storage: Arc<Storage>,
        media: Arc<dyn MediaProvider>,
        notifier: CallNotifier,
        chatlog: Arc<ChatLogBridge>,
    ) -> Self {
        Self {
            storage,
            media,
            notifier,
            chatlog,
        }
    }

    /// Start a new call: create the call and participant rows atomically,
    /// obtain the initiator's join credential, then ring everyone else.
    /// The room credential is issued before any notification goes out so
    /// the room exists by the time the first ring arrives.
    pub async fn initiate(
        &self,
        initiator_id: &str,
        participant_ids: &[String],
        call_type: CallType,
        chat_channel: Option<String>,
    ) -> Result<CallSessionResponse> {
        if !self.media.is_configured() {
            return Err(AppError::Configuration(
                "Media provider is not configured".to_string(),
            ));
        }

        let mut others: Vec<String> = participant_ids
            .iter()
            .filter(|id| id.as_str() != initiator_id)
            .cloned()
            .collect();
        others.sort();
        others.dedup();

        if others.is_empty() {
            return Err(AppError::Validation(
                "A call needs at least one other participant".to_string(),
            ));
        }

        let now = now_rfc3339();
        let call = Call {
            id: uuid::Uuid::new_v4().to_string(),
            room_name: crypto::generate_room_name(),
            initiator_id: initiator_id.to_string(),
            call_type,
            is_group: others.len() > 1,
            status: CallStatus::Ringing,
            chat_channel,
            started_at: None,
            ended_at: None,
            created_at: now.clone(),
            end_reason: None,
            duration_seconds: None,
            metadata: None,
        };

        let mut participants = vec![CallParticipant {
            id: uuid::Uuid::new_v4().to_string(),
            call_id: call.id.clone(),
            user_id: initiator_id.to_string(),
            status: ParticipantStatus::Joined,
            role: ParticipantRole::Initiator,
            invited_at: Some(now.clone()),
            joined_at: Some(now.clone()),
            left_at: None,
            had_video: call_type == CallType::Video,
            had_audio: true,
            shared_screen: false,
        }];
        for user_id in &others {
            participants.push(CallParticipant {
                id: uuid::Uuid::new_v4().to_string(),
                call_id: call.id.clone(),
                user_id: user_id.clone(),
                status: ParticipantStatus::Ringing,
                role: ParticipantRole::Participant,
                invited_at: Some(now.clone()),
                joined_at: None,
                left_at: None,
                had_video: false,
                had_audio: true,
                shared_screen: false,
            });
        }

        self.storage.create_call(&call, &participants).await?;

        // Credential issuance is synchronous: if the provider rejects it,
        // nobody has been rung yet and the call can be failed in place
        let credential = match self.media.create_token(
            &call.room_name,
            initiator_id,
            initiator_id,
            true,
        ) {
            Ok(credential) => credential,
            Err(e) => {
                let _ = self
                    .storage
                    .finish_call(
                        &call.id,
                        &[CallStatus::Ringing],
                        CallStatus::Failed,
                        EndReason::Error,
                        &now_rfc3339(),
                        None,
                    )
                    .await;
                let _ = self.storage.mark_remaining_left(&call.id, &now_rfc3339()).await;
                return Err(e);
            }
        };

        tracing::info!(
            "Call {} initiated by {} ({} participants, {})",
            call.id,
            initiator_id,
            others.len() + 1,
            call.call_type.as_str()
        );

        self.notifier.incoming_call(&call, &others);
        self.mirror_to_chat(&call).await;

        Ok(CallSessionResponse {
            call_id: call.id,
            room_name: call.room_name,
            credential,
            media_url: self.media.url(),
        })
    }

    /// Accept an incoming call. The first accept of a ringing call also
    /// fires the `ringing -> connected` transition; the guarded update
    /// guarantees exactly one concurrent accepter owns that transition and
    /// its notification.
    pub async fn accept(&self, call_id: &str, user_id: &str) -> Result<CallSessionResponse> {
        let call = self.get_existing(call_id).await?;
        match call.status {
            CallStatus::Ringing | CallStatus::Connected => {}
            // Resolved calls read as gone to a late accepter
            _ => {
                return Err(AppError::NotFound(format!(
                    "Call {} is no longer ringing",
                    call_id
                )))
            }
        }

        if self.storage.get_participant(call_id, user_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "No pending invitation for {} on call {}",
                user_id, call_id
            )));
        }

        // Credential before any row change: a provider failure leaves the
        // invitation pending so the accepter can simply retry
        let credential = self
            .media
            .create_token(&call.room_name, user_id, user_id, false)?;

        let now = now_rfc3339();
        let marked = self
            .storage
            .mark_participant(call_id, user_id, PENDING, ParticipantStatus::Joined, &now)
            .await?;
        if !marked {
            return Err(AppError::NotFound(format!(
                "No pending invitation for {} on call {}",
                user_id, call_id
            )));
        }

        // The initiator is joined from the start, so a successful accept of
        // a ringing call always means at least two joined participants
        let connected_now = self.storage.connect_call(call_id, &now).await?;

        let recipients = self.roster_excluding(call_id, user_id).await?;
        if connected_now {
            tracing::info!("Call {} connected (accepted by {})", call_id, user_id);
            self.notifier
                .call_accepted(call_id, user_id, CallStatus::Connected, &recipients);
        } else {
            self.notifier.participant_joined(call_id, user_id, &recipients);
        }

        Ok(CallSessionResponse {
            call_id: call_id.to_string(),
            room_name: call.room_name,
            credential,
            media_url: self.media.url(),
        })
    }

    /// Decline an incoming call. When the last pending non-initiator
    /// declines, the whole call resolves to `declined`.
    pub async fn decline(&self, call_id: &str, user_id: &str) -> Result<()> {
        let call = self.get_existing(call_id).await?;
        if call.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Call {} is already resolved",
                call_id
            )));
        }

        let now = now_rfc3339();
        let marked = self
            .storage
            .mark_participant(call_id, user_id, PENDING, ParticipantStatus::Declined, &now)
            .await?;
        if !marked {
            return Err(AppError::NotFound(format!(
                "No pending invitation for {} on call {}",
                user_id, call_id
            )));
        }

        let remaining = self.storage.count_participants(call_id, ACTIVE, true).await?;
        let mut final_status = call.status;
        if remaining == 0 {
            let resolved = self
                .storage
                .finish_call(
                    call_id,
                    &[CallStatus::Ringing],
                    CallStatus::Declined,
                    EndReason::Declined,
                    &now,
                    None,
                )
                .await?;
            if resolved {
                tracing::info!("Call {} declined by all participants", call_id);
                final_status = CallStatus::Declined;
                if let Some(updated) = self.storage.get_call(call_id).await? {
                    self.mirror_to_chat(&updated).await;
                }
            }
        }

        let recipients = self.roster_excluding(call_id, user_id).await?;
        self.notifier
            .call_declined(call_id, user_id, final_status, &recipients);

        Ok(())
    }

    /// Terminate a call. Idempotence comes from the guarded update: a second
    /// `end` sees zero affected rows and reports the terminal state instead
    /// of producing a second chat-log entry.
    pub async fn end(&self, call_id: &str, ended_by: &str) -> Result<()> {
        let call = self.get_existing(call_id).await?;

        let now_dt = Utc::now();
        let now = now_dt.to_rfc3339();
        let duration_seconds = call
            .started_at
            .as_deref()
            .and_then(parse_rfc3339)
            .map(|started| (now_dt - started).num_seconds().max(0));

        // A connected call completes; ending one that is still ringing is
        // the caller cancelling before anyone answered. Two guarded writes
        // keep the reason consistent with the status actually left behind.
        let mut end_reason = EndReason::Completed;
        let mut ended = self
            .storage
            .finish_call(
                call_id,
                &[CallStatus::Connected],
                CallStatus::Ended,
                EndReason::Completed,
                &now,
                duration_seconds,
            )
            .await?;
        if !ended {
            end_reason = EndReason::Cancelled;
            ended = self
                .storage
                .finish_call(
                    call_id,
                    &[CallStatus::Ringing],
                    CallStatus::Ended,
                    EndReason::Cancelled,
                    &now,
                    None,
                )
                .await?;
        }
        if !ended {
            return Err(AppError::InvalidState(format!(
                "Call {} is already resolved",
                call_id
            )));
        }

        self.storage.mark_remaining_left(call_id, &now).await?;

        tracing::info!(
            "Call {} ended by {} (duration: {:?}s)",
            call_id,
            ended_by,
            duration_seconds
        );

        let participants = self.storage.list_participants(call_id).await?;
        let everyone: Vec<String> = participants.iter().map(|p| p.user_id.clone()).collect();
        self.notifier.call_ended(
            call_id,
            CallStatus::Ended,
            end_reason,
            duration_seconds,
            &everyone,
        );

        if let Some(updated) = self.storage.get_call(call_id).await? {
            self.mirror_to_chat(&updated).await;
        }

        Ok(())
    }

    /// Leave an ongoing call. When one or zero joined participants remain
    /// the call auto-terminates with the leaver recorded as the ender.
    pub async fn leave(&self, call_id: &str, user_id: &str) -> Result<()> {
        let call = self.get_existing(call_id).await?;
        if call.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Call {} is already resolved",
                call_id
            )));
        }

        let now = now_rfc3339();
        let marked = self
            .storage
            .mark_participant(
                call_id,
                user_id,
                &[ParticipantStatus::Joined],
                ParticipantStatus::Left,
                &now,
            )
            .await?;
        if !marked {
            return Err(AppError::NotFound(format!(
                "{} is not in call {}",
                user_id, call_id
            )));
        }

        let joined = self
            .storage
            .count_participants(call_id, &[ParticipantStatus::Joined], false)
            .await?;
        if joined <= 1 {
            // Auto-termination races an explicit end(); losing that race
            // just means the call is already where we wanted it
            return match self.end(call_id, user_id).await {
                Ok(()) => Ok(()),
                Err(AppError::InvalidState(_)) => Ok(()),
                Err(e) => Err(e),
            };
        }

        let recipients = self.roster_excluding(call_id, user_id).await?;
        self.notifier.participant_left(call_id, user_id, &recipients);

        Ok(())
    }

    /// Mark one participant's invitation as missed. The controller never
    /// schedules this itself; an external sweep decides when a ringing call
    /// has gone unanswered long enough.
    pub async fn mark_missed(&self, call_id: &str, user_id: &str) -> Result<()> {
        let call = self.get_existing(call_id).await?;
        if call.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Call {} is already resolved",
                call_id
            )));
        }

        let now = now_rfc3339();
        let marked = self
            .storage
            .mark_participant(call_id, user_id, PENDING, ParticipantStatus::Missed, &now)
            .await?;
        if !marked {
            return Err(AppError::NotFound(format!(
                "No pending invitation for {} on call {}",
                user_id, call_id
            )));
        }

        let remaining = self.storage.count_participants(call_id, ACTIVE, true).await?;
        if remaining == 0 {
            let resolved = self
                .storage
                .finish_call(
                    call_id,
                    &[CallStatus::Ringing],
                    CallStatus::Missed,
                    EndReason::Timeout,
                    &now,
                    None,
                )
                .await?;
            if resolved {
                tracing::info!("Call {} went unanswered", call_id);

                let participants = self.storage.list_participants(call_id).await?;
                let everyone: Vec<String> =
                    participants.iter().map(|p| p.user_id.clone()).collect();
                self.notifier.call_ended(
                    call_id,
                    CallStatus::Missed,
                    EndReason::Timeout,
                    None,
                    &everyone,
                );

                if let Some(updated) = self.storage.get_call(call_id).await? {
                    self.mirror_to_chat(&updated).await;
                }
            }
        }

        Ok(())
    }

    /// Record media usage flags for one participant (descriptive only)
    pub async fn update_media_flags(
        &self,
        call_id: &str,
        user_id: &str,
        had_video: Option<bool>,
        had_audio: Option<bool>,
        shared_screen: Option<bool>,
    ) -> Result<()> {
        let updated = self
            .storage
            .update_media_flags(call_id, user_id, had_video, had_audio, shared_screen)
            .await?;
        if !updated {
            return Err(AppError::NotFound(format!(
                "{} is not part of call {}",
                user_id, call_id
            )));
        }

        if shared_screen == Some(true) {
            self.storage
                .merge_call_metadata(call_id, &serde_json::json!({ "screen_share": true }))
                .await?;
        }

        Ok(())
    }

    pub async fn get_call_details(&self, call_id: &str) -> Result<CallDetailsResponse> {
        let call = self.get_existing(call_id).await?;
        let participants = self.storage.list_participants(call_id).await?;

        Ok(CallDetailsResponse { call, participants })
    }

    /// One sweep pass: mark every still-pending invitation of a ringing call
    /// older than the timeout as missed. Returns the number of calls touched.
    pub async fn sweep_missed(&self, ring_timeout_seconds: u64) -> Result<u64> {
        let cutoff =
            (Utc::now() - Duration::seconds(ring_timeout_seconds as i64)).to_rfc3339();
        let stale = self.storage.list_stale_ringing(&cutoff).await?;

        let mut swept = 0;
        for call in stale {
            let participants = self.storage.list_participants(&call.id).await?;
            for p in participants {
                let pending = matches!(
                    p.status,
                    ParticipantStatus::Invited | ParticipantStatus::Ringing
                );
                if !pending || p.role == ParticipantRole::Initiator {
                    continue;
                }
                // Another instance may resolve the call mid-sweep
                match self.mark_missed(&call.id, &p.user_id).await {
                    Ok(()) => {}
                    Err(AppError::NotFound(_)) | Err(AppError::InvalidState(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            swept += 1;
        }

        Ok(swept)
    }

    async fn get_existing(&self, call_id: &str) -> Result<Call> {
        self.storage
            .get_call(call_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Call {} does not exist", call_id)))
    }

    async fn roster_excluding(&self, call_id: &str, user_id: &str) -> Result<Vec<String>> {
        let participants = self.storage.list_participants(call_id).await?;
        Ok(participants
            .into_iter()
            .map(|p| p.user_id)
            .filter(|id| id != user_id)
            .collect())
    }

    /// Dispatch the chat-log mirror as a background task; the transition has
    /// already committed and history catches up eventually
    async fn mirror_to_chat(&self, call: &Call) {
        let participants = match self.storage.list_participants(&call.id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("Chat-log mirror skipped for call {}: {}", call.id, e);
                return;
            }
        };
        let ids: Vec<String> = participants.into_iter().map(|p| p.user_id).collect();

        let bridge = Arc::clone(&self.chatlog);
        let call = call.clone();
        tokio::spawn(async move {
            bridge.record(&call, &ids).await;
        });
    }
}
