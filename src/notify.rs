//! Lifecycle event fan-out for Huddle Server
//!
//! One event per affected participant's private channel, fire-and-forget:
//! publish failures are logged, never retried and never surfaced to the
//! request that triggered them.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::models::{Call, CallEvent, CallStatus, EndReason, WsServerMessage};

/// Real-time publish primitive: one logical event onto one user's channel
pub trait EventPublisher: Send + Sync {
    fn publish(&self, channel: &str, event: &CallEvent) -> anyhow::Result<()>;
}

/// Represents an active WebSocket subscription
#[derive(Clone)]
pub struct Connection {
    pub connection_id: String,
    pub sender: mpsc::UnboundedSender<WsServerMessage>,
}

/// Manages all active WebSocket subscriptions
pub struct WebSocketManager {
    /// Map of user_id -> Vec<Connection> (multiple devices per user)
    connections: DashMap<String, Vec<Connection>>,
}

impl WebSocketManager {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a new subscription, returning its handle for unregister
    pub fn register(&self, user_id: &str, sender: mpsc::UnboundedSender<WsServerMessage>) -> String {
        let connection_id = uuid::Uuid::new_v4().to_string();

        self.connections
            .entry(user_id.to_string())
            .or_insert_with(Vec::new)
            .push(Connection {
                connection_id: connection_id.clone(),
                sender,
            });

        tracing::info!("Subscription registered: user={}", user_id);

        connection_id
    }

    /// Unregister a subscription
    pub fn unregister(&self, user_id: &str, connection_id: &str) {
        if let Some(mut connections) = self.connections.get_mut(user_id) {
            connections.retain(|c| c.connection_id != connection_id);

            if connections.is_empty() {
                drop(connections);
                self.connections.remove(user_id);
            }
        }

        tracing::info!("Subscription unregistered: user={}", user_id);
    }

    /// Check if a user has any active subscription
    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.connections.get(user_id).map(|c| !c.is_empty()).unwrap_or(false)
    }

    pub fn online_user_count(&self) -> usize {
        self.connections.len()
    }

    /// Send a message to all of a user's devices
    pub fn send_to_user(&self, user_id: &str, message: WsServerMessage) {
        if let Some(connections) = self.connections.get(user_id) {
            for conn in connections.iter() {
                if let Err(e) = conn.sender.send(message.clone()) {
                    tracing::warn!("Failed to send to user {}: {}", user_id, e);
                }
            }
        }
    }
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher for WebSocketManager {
    fn publish(&self, channel: &str, event: &CallEvent) -> anyhow::Result<()> {
        // Offline users simply miss the event; missed calls reach them
        // through conversation history instead
        self.send_to_user(channel, WsServerMessage::Event(event.clone()));
        Ok(())
    }
}

/// Fans one lifecycle event out to every affected participant's channel
#[derive(Clone)]
pub struct CallNotifier {
    publisher: Arc<dyn EventPublisher>,
}

impl CallNotifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    fn dispatch(&self, recipients: &[String], event: CallEvent) {
        for user_id in recipients {
            if let Err(e) = self.publisher.publish(user_id, &event) {
                tracing::warn!("Publish failed for {}: {}", user_id, e);
            }
        }
    }

    fn sent_at() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn incoming_call(&self, call: &Call, recipients: &[String]) {
        self.dispatch(
            recipients,
            CallEvent::IncomingCall {
                call_id: call.id.clone(),
                room_name: call.room_name.clone(),
                call_type: call.call_type,
                is_group: call.is_group,
                initiator_id: call.initiator_id.clone(),
                chat_channel: call.chat_channel.clone(),
                sent_at: Self::sent_at(),
            },
        );
    }

    pub fn call_accepted(
        &self,
        call_id: &str,
        user_id: &str,
        call_status: CallStatus,
        recipients: &[String],
    ) {
        self.dispatch(
            recipients,
            CallEvent::CallAccepted {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                call_status,
                sent_at: Self::sent_at(),
            },
        );
    }

    pub fn call_declined(
        &self,
        call_id: &str,
        user_id: &str,
        call_status: CallStatus,
        recipients: &[String],
    ) {
        self.dispatch(
            recipients,
            CallEvent::CallDeclined {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                call_status,
                sent_at: Self::sent_at(),
            },
        );
    }

    pub fn participant_joined(&self, call_id: &str, user_id: &str, recipients: &[String]) {
        self.dispatch(
            recipients,
            CallEvent::ParticipantJoined {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                sent_at: Self::sent_at(),
            },
        );
    }

    pub fn participant_left(&self, call_id: &str, user_id: &str, recipients: &[String]) {
        self.dispatch(
            recipients,
            CallEvent::ParticipantLeft {
                call_id: call_id.to_string(),
                user_id: user_id.to_string(),
                sent_at: Self::sent_at(),
            },
        );
    }

    pub fn call_ended(
        &self,
        call_id: &str,
        call_status: CallStatus,
        end_reason: EndReason,
        duration_seconds: Option<i64>,
        recipients: &[String],
    ) {
        self.dispatch(
            recipients,
            CallEvent::CallEnded {
                call_id: call_id.to_string(),
                call_status,
                end_reason,
                duration_seconds,
                sent_at: Self::sent_at(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CallType;
    use std::sync::Mutex;

    #[test]
    fn test_subscription_management() {
        let manager = WebSocketManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let conn1 = manager.register("user1", tx.clone());
        assert!(manager.is_user_online("user1"));
        assert!(!manager.is_user_online("user2"));

        // Second device for the same user
        let (tx2, _rx2) = mpsc::unbounded_channel();
        let conn2 = manager.register("user1", tx2);
        assert_eq!(manager.online_user_count(), 1);

        manager.unregister("user1", &conn1);
        assert!(manager.is_user_online("user1"));

        manager.unregister("user1", &conn2);
        assert!(!manager.is_user_online("user1"));
    }

    #[test]
    fn test_publish_reaches_all_devices() {
        let manager = WebSocketManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.register("user1", tx1);
        manager.register("user1", tx2);

        let event = CallEvent::ParticipantJoined {
            call_id: "c1".to_string(),
            user_id: "bob".to_string(),
            sent_at: 1,
        };
        manager.publish("user1", &event).unwrap();

        assert!(matches!(rx1.try_recv().unwrap(), WsServerMessage::Event(_)));
        assert!(matches!(rx2.try_recv().unwrap(), WsServerMessage::Event(_)));
    }

    struct FlakyPublisher {
        fail_for: String,
        delivered: Mutex<Vec<String>>,
    }

    impl EventPublisher for FlakyPublisher {
        fn publish(&self, channel: &str, _event: &CallEvent) -> anyhow::Result<()> {
            if channel == self.fail_for {
                anyhow::bail!("channel down");
            }
            self.delivered.lock().unwrap().push(channel.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_fanout_isolates_publish_failures() {
        let publisher = Arc::new(FlakyPublisher {
            fail_for: "bob".to_string(),
            delivered: Mutex::new(Vec::new()),
        });
        let notifier = CallNotifier::new(publisher.clone());

        let call = Call {
            id: "c1".to_string(),
            room_name: "room-x".to_string(),
            initiator_id: "alice".to_string(),
            call_type: CallType::Voice,
            is_group: true,
            status: CallStatus::Ringing,
            chat_channel: None,
            started_at: None,
            ended_at: None,
            created_at: crate::models::now_rfc3339(),
            end_reason: None,
            duration_seconds: None,
            metadata: None,
        };

        // A failing channel must not stop delivery to the others
        notifier.incoming_call(
            &call,
            &["bob".to_string(), "carol".to_string(), "dave".to_string()],
        );

        let delivered = publisher.delivered.lock().unwrap();
        assert_eq!(*delivered, vec!["carol".to_string(), "dave".to_string()]);
    }
}
