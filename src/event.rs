//! # Event Layer
//!
//! Canonical event tags, the platform payload types carried by events, and
//! the broadcast [`EventBus`] that feeds the dispatcher.
//!
//! Atomic platform updates are canonicalized into a [`ChatEvent`] before
//! they enter the bus. `media_group` and `schedule` events never arrive
//! from the platform; they are synthesized by the aggregator and the
//! scheduler respectively.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::eval::value::Value;

/// Canonical event tags. The string form is what rule triggers are written
/// in (`WHEN message or command ...`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum EventTag {
    Message,
    Command,
    UserJoin,
    UserLeave,
    Photo,
    Video,
    Document,
    EditedMessage,
    MediaGroup,
    Schedule,
}

/// A chat user as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRef {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
    pub last_name: Option<String>,
    pub is_bot: bool,
}

impl UserRef {
    pub fn new(id: i64, first_name: impl Into<String>) -> Self {
        Self {
            id,
            username: None,
            first_name: first_name.into(),
            last_name: None,
            is_bot: false,
        }
    }

    /// Attribute access from rule scripts (`user.first_name` etc.).
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "username" => Some(
                self.username
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "first_name" => Some(Value::String(self.first_name.clone())),
            "last_name" => Some(
                self.last_name
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "is_bot" => Some(Value::Boolean(self.is_bot)),
            _ => None,
        }
    }
}

/// A chat message as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub from_user: Option<Arc<UserRef>>,
    pub reply_to_message: Option<Arc<Message>>,
    pub media_group_id: Option<String>,
    pub date: i64,
}

impl Message {
    /// Attribute access from rule scripts. Absent optional fields resolve
    /// to null so that path navigation can null-propagate.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::Integer(self.id)),
            "chat_id" => Some(Value::Integer(self.chat_id)),
            "text" => Some(self.text.clone().map(Value::String).unwrap_or(Value::Null)),
            "caption" => Some(
                self.caption
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "from_user" => Some(
                self.from_user
                    .clone()
                    .map(Value::User)
                    .unwrap_or(Value::Null),
            ),
            "reply_to_message" => Some(
                self.reply_to_message
                    .clone()
                    .map(Value::Message)
                    .unwrap_or(Value::Null),
            ),
            "media_group_id" => Some(
                self.media_group_id
                    .clone()
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            ),
            "date" => Some(Value::Integer(self.date)),
            _ => None,
        }
    }
}

/// One canonical event flowing through the dispatcher. Synthesized
/// `media_group` events carry the ordered aggregated messages.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub trace_id: Uuid,
    pub group_id: i64,
    pub tag: EventTag,
    pub user: Option<Arc<UserRef>>,
    pub message: Option<Arc<Message>>,
    pub media_group: Option<Vec<Arc<Message>>>,
}

impl ChatEvent {
    pub fn new(tag: EventTag, group_id: i64) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            group_id,
            tag,
            user: None,
            message: None,
            media_group: None,
        }
    }

    pub fn with_message(tag: EventTag, group_id: i64, message: Arc<Message>) -> Self {
        let user = message.from_user.clone();
        Self {
            trace_id: Uuid::new_v4(),
            group_id,
            tag,
            user,
            message: Some(message),
            media_group: None,
        }
    }

    pub fn with_user(tag: EventTag, group_id: i64, user: Arc<UserRef>) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            group_id,
            tag,
            user: Some(user),
            message: None,
            media_group: None,
        }
    }

    /// The synthesized aggregate of one media group.
    pub fn media_group(group_id: i64, messages: Vec<Arc<Message>>) -> Self {
        let user = messages.first().and_then(|m| m.from_user.clone());
        Self {
            trace_id: Uuid::new_v4(),
            group_id,
            tag: EventTag::MediaGroup,
            user,
            message: messages.first().cloned(),
            media_group: Some(messages),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventError {
    #[error("event send failed: {message}")]
    SendFailed { message: String },
    #[error("event receive failed: {message}")]
    ReceiveFailed { message: String },
    #[error("receiver lagged, skipped {count} events")]
    Lagged { count: u64 },
}

/// Broadcast bus carrying canonical events into the dispatcher.
pub struct EventBus {
    event_sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_sender, _) = broadcast::channel(capacity);
        Self { event_sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver::new(self.event_sender.subscribe())
    }

    pub async fn publish(&self, event: ChatEvent) -> Result<(), EventError> {
        self.event_sender
            .send(event)
            .map_err(|e| EventError::SendFailed {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<ChatEvent>,
}

impl EventReceiver {
    fn new(receiver: broadcast::Receiver<ChatEvent>) -> Self {
        Self { receiver }
    }

    /// Receive the next event. On lag the receiver resubscribes and the
    /// caller learns how many events were skipped.
    pub async fn recv(&mut self) -> Result<ChatEvent, EventError> {
        match self.receiver.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                self.receiver = self.receiver.resubscribe();
                Err(EventError::Lagged { count: n })
            }
            Err(e) => Err(EventError::ReceiveFailed {
                message: e.to_string(),
            }),
        }
    }
}

/// Convenience constructors shared by tests across the crate.
pub fn text_message(chat_id: i64, id: i64, user: Arc<UserRef>, text: &str) -> Arc<Message> {
    Arc::new(Message {
        id,
        chat_id,
        text: Some(text.to_string()),
        caption: None,
        from_user: Some(user),
        reply_to_message: None,
        media_group_id: None,
        date: chrono::Utc::now().timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tag_string_forms() {
        assert_eq!(EventTag::UserJoin.to_string(), "user_join");
        assert_eq!(EventTag::MediaGroup.to_string(), "media_group");
        assert_eq!(EventTag::from_str("edited_message").unwrap(), EventTag::EditedMessage);
        assert!(EventTag::from_str("bogus").is_err());
    }

    #[test]
    fn test_message_field_null_propagation_source() {
        let user = Arc::new(UserRef::new(7, "Ann"));
        let message = text_message(1, 10, user, "hello");
        assert_eq!(message.field("text"), Some(Value::String("hello".into())));
        assert_eq!(message.field("reply_to_message"), Some(Value::Null));
        assert_eq!(message.field("no_such_field"), None);
    }

    #[tokio::test]
    async fn test_basic_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let event = ChatEvent::new(EventTag::Message, 42);
        bus.publish(event.clone()).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.tag, EventTag::Message);
        assert_eq!(received.group_id, 42);
        assert_eq!(received.trace_id, event.trace_id);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ChatEvent::new(EventTag::UserJoin, 1)).await.unwrap();

        assert_eq!(rx1.recv().await.unwrap().tag, EventTag::UserJoin);
        assert_eq!(rx2.recv().await.unwrap().tag, EventTag::UserJoin);
    }
}
