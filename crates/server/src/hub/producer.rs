//! Entry points for code that produces realtime events.
//!
//! REST and webhook handlers publish only after their database writes have
//! committed; the hub has no transactional tie to storage.

use async_trait::async_trait;
use serde_json::json;
use supportdesk_shared::{conversation_room, event_types, NOTIFICATIONS_ROOM};
use uuid::Uuid;

use super::{Hub, UserId};

/// Something that can push events to connected agents.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_to_room(&self, room: &str, event_type: &str, payload: serde_json::Value);

    async fn publish_to_user(&self, user_id: UserId, event_type: &str, payload: serde_json::Value);
}

#[async_trait]
impl Publisher for Hub {
    async fn publish_to_room(&self, room: &str, event_type: &str, payload: serde_json::Value) {
        self.broadcast_to_room(room, event_type, &payload).await;
    }

    async fn publish_to_user(&self, user_id: UserId, event_type: &str, payload: serde_json::Value) {
        self.broadcast_to_user(user_id, event_type, &payload).await;
    }
}

/// Summary pushed to the notifications room so every agent's badge updates.
#[derive(Debug, Clone)]
pub struct MessageNotice {
    pub conversation_id: Uuid,
    pub inbox_id: Uuid,
    pub contact_name: String,
    pub content: String,
}

/// Announce a new message: full record to the conversation's room, a
/// short notice to the notifications room.
pub async fn announce_message_created(
    publisher: &dyn Publisher,
    message: serde_json::Value,
    notice: &MessageNotice,
) {
    let room = conversation_room(notice.conversation_id);
    publisher
        .publish_to_room(&room, event_types::MESSAGE_CREATED, message)
        .await;

    let summary = json!({
        "conversation_id": notice.conversation_id,
        "contact_name": notice.contact_name,
        "content": notice.content,
        "inbox_id": notice.inbox_id,
    });
    publisher
        .publish_to_room(NOTIFICATIONS_ROOM, event_types::MESSAGE_CREATED, summary)
        .await;
}

/// Announce a conversation lifecycle change (`conversation.created` or
/// `conversation.updated`) on the notifications room.
pub async fn announce_conversation(
    publisher: &dyn Publisher,
    event_type: &str,
    conversation: serde_json::Value,
) {
    publisher
        .publish_to_room(NOTIFICATIONS_ROOM, event_type, conversation)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recorded {
        events: Mutex<Vec<(String, String, serde_json::Value)>>,
    }

    #[async_trait]
    impl Publisher for Recorded {
        async fn publish_to_room(&self, room: &str, event_type: &str, payload: serde_json::Value) {
            self.events
                .lock()
                .await
                .push((room.to_string(), event_type.to_string(), payload));
        }

        async fn publish_to_user(
            &self,
            user_id: UserId,
            event_type: &str,
            payload: serde_json::Value,
        ) {
            self.events
                .lock()
                .await
                .push((format!("user:{user_id}"), event_type.to_string(), payload));
        }
    }

    #[tokio::test]
    async fn message_created_goes_to_conversation_and_notifications() {
        let recorded = Recorded::default();
        let notice = MessageNotice {
            conversation_id: Uuid::new_v4(),
            inbox_id: Uuid::new_v4(),
            contact_name: "Ana".to_string(),
            content: "hello".to_string(),
        };

        announce_message_created(&recorded, json!({"id": 1, "content": "hello"}), &notice).await;

        let events = recorded.events.lock().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, notice.conversation_id.to_string());
        assert_eq!(events[0].1, "message.created");
        assert_eq!(events[0].2["id"], 1);
        assert_eq!(events[1].0, "notifications");
        assert_eq!(events[1].2["contact_name"], "Ana");
        assert_eq!(events[1].2["conversation_id"], notice.conversation_id.to_string());
    }

    #[tokio::test]
    async fn conversation_events_go_to_notifications() {
        let recorded = Recorded::default();
        announce_conversation(
            &recorded,
            event_types::CONVERSATION_UPDATED,
            json!({"id": "c1", "status": "open"}),
        )
        .await;

        let events = recorded.events.lock().await;
        assert_eq!(events[0].0, "notifications");
        assert_eq!(events[0].1, "conversation.updated");
    }
}
