//! Broker destinations and payload shapes exchanged over STOMP.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::models::{
    Attachment, ChatId, ChatKind, ChatRef, Friend, Message, MessageId, PresenceStatus, Sender,
    UserId,
};

/// Destination templates.
pub mod destinations {
    use crate::models::{ChatKind, ChatRef};

    /// Global presence topic.
    pub const USER_STATUS: &str = "/user.status";
    /// Global friend-list change topic.
    pub const FRIENDS_UPDATES: &str = "/topic/friends.updates";
    /// Self-status: back from idle / session start.
    pub const SELF_CONNECT: &str = "/app/user.connect";
    /// Self-status: idle or unloading.
    pub const SELF_DISCONNECT: &str = "/app/user.disconnect";

    /// Inbound topic carrying every event of one chat.
    pub fn chat_topic(chat: ChatRef) -> String {
        match chat.kind {
            ChatKind::Private => format!("/topic/private-message.{}", chat.id),
            ChatKind::Group => format!("/topic/group-message.{}", chat.id),
        }
    }

    fn app(chat: ChatRef, action: &str) -> String {
        format!("/app/{}.message.{}/{}", chat.kind.as_str(), action, chat.id)
    }

    pub fn send_message(chat: ChatRef) -> String {
        app(chat, "send")
    }

    pub fn edit_message(chat: ChatRef) -> String {
        app(chat, "edit")
    }

    pub fn delete_message(chat: ChatRef) -> String {
        app(chat, "delete")
    }

    pub fn read_message(chat: ChatRef) -> String {
        app(chat, "read")
    }
}

// --- Inbound chat payloads ---

pub const EVENT_MESSAGE_SENT: &str = "MESSAGE_SENT";
pub const EVENT_MESSAGE_EDITED: &str = "MESSAGE_EDITED";
pub const EVENT_MESSAGE_DELETED: &str = "MESSAGE_DELETED";
pub const EVENT_MESSAGE_READ: &str = "MESSAGE_READ";
pub const EVENT_CHAT_DELETED: &str = "CHAT_DELETED";

/// Message as pushed on a private chat topic (and returned by the private
/// history endpoint).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessagePayload {
    pub id: MessageId,
    pub private_chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default)]
    pub sender_nickname: Option<String>,
    pub text: String,
    pub send_time: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// Message as pushed on a group chat topic (and returned by the group
/// history endpoint).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessagePayload {
    pub id: MessageId,
    pub group_chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_username: String,
    #[serde(default)]
    pub sender_nickname: Option<String>,
    pub text: String,
    pub send_time: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// A message payload, decoded according to the type of the chat it was
/// received for.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessagePayload {
    Private(PrivateMessagePayload),
    Group(GroupMessagePayload),
}

impl ChatMessagePayload {
    pub fn decode(kind: ChatKind, value: serde_json::Value) -> Result<Self, ProtocolError> {
        Ok(match kind {
            ChatKind::Private => ChatMessagePayload::Private(from_value(value)?),
            ChatKind::Group => ChatMessagePayload::Group(from_value(value)?),
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            ChatMessagePayload::Private(p) => p.id,
            ChatMessagePayload::Group(p) => p.id,
        }
    }

    pub fn chat_ref(&self) -> ChatRef {
        match self {
            ChatMessagePayload::Private(p) => ChatRef::private(p.private_chat_id),
            ChatMessagePayload::Group(p) => ChatRef::group(p.group_chat_id),
        }
    }

    /// Map into the canonical message shape. `kind` is the type of the chat
    /// the payload was received for, not something read off the payload.
    pub fn into_message(self, kind: ChatKind) -> Message {
        match self {
            ChatMessagePayload::Private(p) => Message {
                id: p.id,
                chat_id: p.private_chat_id,
                kind,
                sender: Sender {
                    id: p.sender_id,
                    username: p.sender_username,
                    nickname: p.sender_nickname,
                },
                timestamp: p.send_time,
                text: p.text,
                edited: p.edited,
                read: p.read,
                attachment: p.attachment,
            },
            ChatMessagePayload::Group(p) => Message {
                id: p.id,
                chat_id: p.group_chat_id,
                kind,
                sender: Sender {
                    id: p.sender_id,
                    username: p.sender_username,
                    nickname: p.sender_nickname,
                },
                timestamp: p.send_time,
                text: p.text,
                edited: p.edited,
                read: p.read,
                attachment: p.attachment,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessageRef {
    pub id: MessageId,
    pub private_chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessageRef {
    pub id: MessageId,
    pub group_chat_id: ChatId,
}

/// Reference to a message (delete / read events), decoded by chat type.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageRef {
    Private(PrivateMessageRef),
    Group(GroupMessageRef),
}

impl MessageRef {
    pub fn decode(kind: ChatKind, value: serde_json::Value) -> Result<Self, ProtocolError> {
        Ok(match kind {
            ChatKind::Private => MessageRef::Private(from_value(value)?),
            ChatKind::Group => MessageRef::Group(from_value(value)?),
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            MessageRef::Private(r) => r.id,
            MessageRef::Group(r) => r.id,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            MessageRef::Private(r) => r.private_chat_id,
            MessageRef::Group(r) => r.group_chat_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PrivateChatDeleted {
    private_chat_id: ChatId,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GroupChatDeleted {
    group_chat_id: ChatId,
}

/// Everything that can arrive on a chat topic.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatPush {
    NewMessage(ChatMessagePayload),
    Edited(ChatMessagePayload),
    Deleted(MessageRef),
    Read(MessageRef),
    ChatDeleted(ChatRef),
}

impl ChatPush {
    /// Decode a chat topic payload. The `type` field selects the event; a
    /// payload without it is a new message.
    pub fn decode(kind: ChatKind, value: serde_json::Value) -> Result<Self, ProtocolError> {
        let event = match value.get("type") {
            None | Some(serde_json::Value::Null) => EVENT_MESSAGE_SENT.to_string(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(ProtocolError::Payload(format!(
                    "event type must be a string, got {other}"
                )))
            }
        };

        match event.as_str() {
            EVENT_MESSAGE_SENT => Ok(ChatPush::NewMessage(ChatMessagePayload::decode(kind, value)?)),
            EVENT_MESSAGE_EDITED => Ok(ChatPush::Edited(ChatMessagePayload::decode(kind, value)?)),
            EVENT_MESSAGE_DELETED => Ok(ChatPush::Deleted(MessageRef::decode(kind, value)?)),
            EVENT_MESSAGE_READ => Ok(ChatPush::Read(MessageRef::decode(kind, value)?)),
            EVENT_CHAT_DELETED => {
                let chat = match kind {
                    ChatKind::Private => {
                        ChatRef::private(from_value::<PrivateChatDeleted>(value)?.private_chat_id)
                    }
                    ChatKind::Group => {
                        ChatRef::group(from_value::<GroupChatDeleted>(value)?.group_chat_id)
                    }
                };
                Ok(ChatPush::ChatDeleted(chat))
            }
            other => Err(ProtocolError::UnknownEvent(other.to_string())),
        }
    }
}

// --- Inbound global payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FriendsUpdate {
    FriendAdded {
        friend: Friend,
    },
    FriendRemoved {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

// --- Outbound bodies ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub message_id: MessageId,
    pub text: String,
}

/// Body for delete and read requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageAction {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelfStatusSignal {
    pub user_id: UserId,
}

fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|e| ProtocolError::Payload(e.to_string()))
}
