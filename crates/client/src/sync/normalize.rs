//! Turn broker payloads into store actions.

use chatsync_shared::{ChatPush, ChatRef, FriendsUpdate, StatusPayload, UserId};
use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::stores::Action;

/// Who is listening: the chat whose topic delivered the payload and the
/// signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushContext {
    pub chat: ChatRef,
    pub me: Option<UserId>,
}

/// Actions for one payload received on `ctx.chat`'s topic.
pub fn chat_push(value: serde_json::Value, ctx: &PushContext) -> Result<Vec<Action>> {
    let kind = ctx.chat.kind;
    let actions = match ChatPush::decode(kind, value)? {
        ChatPush::NewMessage(payload) => {
            let message = payload.into_message(kind);
            let chat = message.chat_ref();
            // Pushes for the chat being viewed are read as they arrive.
            let count_unread = chat != ctx.chat && ctx.me != Some(message.sender.id);
            let mut actions = vec![Action::MessageReceived(message)];
            if count_unread {
                actions.push(Action::UnreadIncremented(chat));
            }
            actions
        }
        ChatPush::Edited(payload) => {
            let chat = ChatRef {
                id: payload.chat_ref().id,
                kind,
            };
            let id = payload.id();
            let message = payload.into_message(kind);
            vec![Action::MessageEdited {
                id,
                chat,
                text: message.text,
            }]
        }
        ChatPush::Deleted(reference) => vec![Action::MessageDeleted {
            id: reference.id(),
            chat: ChatRef {
                id: reference.chat_id(),
                kind,
            },
        }],
        ChatPush::Read(reference) => vec![Action::MessageRead {
            id: reference.id(),
            chat: ChatRef {
                id: reference.chat_id(),
                kind,
            },
        }],
        ChatPush::ChatDeleted(chat) => vec![Action::ChatRemoved(chat)],
    };
    Ok(actions)
}

/// Action for a payload on the status topic.
pub fn status_update(value: serde_json::Value, at: DateTime<Utc>) -> Result<Action> {
    let payload: StatusPayload =
        serde_json::from_value(value).map_err(|e| SyncError::MalformedPayload(e.to_string()))?;
    Ok(Action::UserStatusChanged {
        user_id: payload.user_id,
        status: payload.status,
        at,
    })
}

/// Action for a payload on the friends topic.
pub fn friends_update(value: serde_json::Value) -> Result<Action> {
    let update: FriendsUpdate =
        serde_json::from_value(value).map_err(|e| SyncError::MalformedPayload(e.to_string()))?;
    Ok(match update {
        FriendsUpdate::FriendAdded { friend } => Action::FriendAdded(friend),
        FriendsUpdate::FriendRemoved { user_id } => Action::FriendRemoved(user_id),
    })
}
