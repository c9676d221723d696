//! Chat list and active transcript.
//!
//! Only the active chat has a transcript. Messages for other chats update the
//! list preview and nothing else.

use std::collections::HashSet;

use chatsync_shared::{
    Attachment, Chat, ChatRef, Message, MessageId, PresenceStatus, UserId,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A locally sent message the server has not echoed back yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub local_id: Uuid,
    pub chat: ChatRef,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatsState {
    pub list: Vec<Chat>,
    pub active: Option<ChatRef>,
    /// Messages of the active chat in arrival order.
    pub transcript: Vec<Message>,
    /// Whether the active chat's history has been fetched.
    pub transcript_loaded: bool,
    pub pending: Vec<PendingMessage>,
}

impl ChatsState {
    pub fn chat(&self, chat: ChatRef) -> Option<&Chat> {
        self.list.iter().find(|c| c.chat_ref() == chat)
    }

    fn chat_mut(&mut self, chat: ChatRef) -> Option<&mut Chat> {
        self.list.iter_mut().find(|c| c.chat_ref() == chat)
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        self.active.and_then(|chat| self.chat(chat))
    }

    pub fn is_active(&self, chat: ChatRef) -> bool {
        self.active == Some(chat)
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.transcript.iter().find(|m| m.id == id)
    }

    /// Transcript in display order: by timestamp, then id.
    pub fn sorted_transcript(&self) -> Vec<&Message> {
        let mut sorted: Vec<&Message> = self.transcript.iter().collect();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        sorted
    }

    pub fn pending_for(&self, chat: ChatRef) -> impl Iterator<Item = &PendingMessage> {
        self.pending.iter().filter(move |p| p.chat == chat)
    }

    pub fn total_unread(&self) -> u32 {
        self.list.iter().map(|c| c.unread_count).sum()
    }

    pub(crate) fn load_chats(&mut self, chats: Vec<Chat>) {
        self.list = chats;
    }

    pub(crate) fn upsert_chat(&mut self, chat: Chat) {
        match self.chat_mut(chat.chat_ref()) {
            Some(existing) => *existing = chat,
            None => self.list.push(chat),
        }
    }

    pub(crate) fn remove_chat(&mut self, chat: ChatRef) {
        self.list.retain(|c| c.chat_ref() != chat);
        self.pending.retain(|p| p.chat != chat);
        if self.is_active(chat) {
            self.set_active(None);
        }
    }

    /// Switch the active chat. Echoes still pending in the chat being left
    /// are dropped: its topic is detached, so their confirmation only comes
    /// back through the next history fetch.
    pub(crate) fn set_active(&mut self, chat: Option<ChatRef>) {
        if let Some(left) = self.active.filter(|&left| Some(left) != chat) {
            self.pending.retain(|p| p.chat != left);
        }
        self.active = chat;
        self.transcript.clear();
        self.transcript_loaded = false;
    }

    /// Install fetched history for `chat`. Fetched copies win over pushes
    /// that arrived while the fetch was in flight; pushes the fetch does not
    /// know about are kept after it. Fetched messages of ours that were not
    /// seen before confirm pending echoes the same way a push does.
    pub(crate) fn load_transcript(
        &mut self,
        chat: ChatRef,
        mut messages: Vec<Message>,
        me: Option<UserId>,
    ) {
        if !self.is_active(chat) {
            return;
        }
        let known: HashSet<MessageId> = self.transcript.iter().map(|m| m.id).collect();
        for message in messages
            .iter()
            .filter(|m| me == Some(m.sender.id) && !known.contains(&m.id))
        {
            self.confirm_pending(chat, &message.text);
        }

        let fetched: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
        messages.extend(
            self.transcript
                .drain(..)
                .filter(|m| !fetched.contains(&m.id)),
        );
        self.transcript = messages;
        self.transcript_loaded = true;
    }

    pub(crate) fn receive(&mut self, message: Message, me: Option<UserId>) {
        let chat = message.chat_ref();

        if me == Some(message.sender.id) {
            self.confirm_pending(chat, &message.text);
        }

        if let Some(entry) = self.chat_mut(chat) {
            let newer = entry
                .last_message
                .as_ref()
                .map_or(true, |last| message.timestamp >= last.timestamp);
            if newer {
                entry.last_message = Some(message.preview());
            }
        }

        if self.is_active(chat) {
            match self.transcript.iter_mut().find(|m| m.id == message.id) {
                Some(existing) => *existing = message,
                None => self.transcript.push(message),
            }
        }
    }

    /// Drop the oldest pending echo in `chat` with this text.
    fn confirm_pending(&mut self, chat: ChatRef, text: &str) {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|p| p.chat == chat && p.text == text)
        {
            self.pending.remove(pos);
        }
    }

    pub(crate) fn edit(&mut self, id: MessageId, chat: ChatRef, text: String) {
        if !self.is_active(chat) {
            return;
        }
        if let Some(message) = self.transcript.iter_mut().find(|m| m.id == id) {
            message.text = text;
            message.edited = true;
        }
    }

    pub(crate) fn delete(&mut self, id: MessageId, chat: ChatRef) {
        if self.is_active(chat) {
            self.transcript.retain(|m| m.id != id);
        }
    }

    pub(crate) fn mark_read(&mut self, id: MessageId, chat: ChatRef) {
        if self.is_active(chat) {
            match self.transcript.iter_mut().find(|m| m.id == id) {
                // Already counted.
                Some(message) if message.read => return,
                Some(message) => message.read = true,
                None => {}
            }
        }
        if let Some(entry) = self.chat_mut(chat) {
            entry.unread_count = entry.unread_count.saturating_sub(1);
        }
    }

    pub(crate) fn increment_unread(&mut self, chat: ChatRef) {
        if let Some(entry) = self.chat_mut(chat) {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
    }

    pub(crate) fn add_pending(&mut self, pending: PendingMessage) {
        self.pending.push(pending);
    }

    pub(crate) fn drop_pending(&mut self, local_id: Uuid) {
        self.pending.retain(|p| p.local_id != local_id);
    }

    pub(crate) fn set_member_status(&mut self, user_id: UserId, status: PresenceStatus) {
        for member in self
            .list
            .iter_mut()
            .flat_map(|c| c.members.iter_mut())
            .filter(|m| m.id == user_id)
        {
            member.status = status;
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chatsync_shared::{ChatKind, Member, Sender};
    use chrono::TimeZone;

    use super::*;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn message(id: MessageId, chat: ChatRef, sender: UserId, text: &str) -> Message {
        Message {
            id,
            chat_id: chat.id,
            kind: chat.kind,
            sender: Sender {
                id: sender,
                username: format!("user{sender}"),
                nickname: None,
            },
            timestamp: at(id),
            text: text.to_string(),
            edited: false,
            read: false,
            attachment: None,
        }
    }

    pub fn chat(chat: ChatRef, members: &[UserId], unread: u32) -> Chat {
        Chat {
            id: chat.id,
            kind: chat.kind,
            name: format!("{}-{}", chat.kind, chat.id),
            members: members
                .iter()
                .map(|&id| Member {
                    id,
                    username: format!("user{id}"),
                    display_name: None,
                    role: None,
                    status: PresenceStatus::Offline,
                })
                .collect(),
            last_message: None,
            unread_count: unread,
        }
    }

    pub fn group(id: i64) -> ChatRef {
        ChatRef {
            id,
            kind: ChatKind::Group,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn state_with_active(active: ChatRef) -> ChatsState {
        let mut state = ChatsState::default();
        state.load_chats(vec![
            chat(active, &[1, 2], 0),
            chat(ChatRef::private(99), &[1, 3], 0),
        ]);
        state.set_active(Some(active));
        state
    }

    fn ids(state: &ChatsState) -> Vec<MessageId> {
        state.transcript.iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_push_for_other_chat_only_updates_preview() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.load_transcript(
            active,
            vec![message(101, active, 2, "a"), message(102, active, 2, "b")],
            None,
        );

        state.receive(message(103, active, 2, "c"), Some(1));
        assert_eq!(ids(&state), vec![101, 102, 103]);

        let other = ChatRef::private(99);
        state.receive(message(104, other, 3, "elsewhere"), Some(1));
        assert_eq!(ids(&state), vec![101, 102, 103]);
        let preview = state.chat(other).and_then(|c| c.last_message.clone());
        assert_eq!(preview.map(|p| p.text), Some("elsewhere".to_string()));
    }

    #[test]
    fn test_duplicate_push_replaces_in_place() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.receive(message(7, active, 2, "first"), None);
        state.receive(message(7, active, 2, "second"), None);
        assert_eq!(state.transcript.len(), 1);
        assert_eq!(state.transcript[0].text, "second");
    }

    #[test]
    fn test_older_message_does_not_replace_preview() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.receive(message(20, active, 2, "newer"), None);
        state.receive(message(10, active, 2, "older"), None);

        let preview = state.chat(active).and_then(|c| c.last_message.clone());
        assert_eq!(preview.map(|p| p.message_id), Some(20));
        // Arrival order is kept; display order is by timestamp.
        assert_eq!(ids(&state), vec![20, 10]);
        let sorted: Vec<MessageId> = state.sorted_transcript().iter().map(|m| m.id).collect();
        assert_eq!(sorted, vec![10, 20]);
    }

    #[test]
    fn test_fetched_transcript_wins_and_keeps_unknown_pushes() {
        let active = group(5);
        let mut state = state_with_active(active);
        state.receive(message(2, active, 2, "pushed stale"), None);
        state.receive(message(3, active, 2, "pushed new"), None);

        state.load_transcript(
            active,
            vec![message(1, active, 2, "one"), message(2, active, 2, "fetched")],
            None,
        );

        assert_eq!(ids(&state), vec![1, 2, 3]);
        assert_eq!(state.message(2).map(|m| m.text.as_str()), Some("fetched"));
        assert!(state.transcript_loaded);
    }

    #[test]
    fn test_transcript_for_inactive_chat_is_ignored() {
        let mut state = state_with_active(group(5));
        state.load_transcript(group(6), vec![message(1, group(6), 2, "x")], None);
        assert!(state.transcript.is_empty());
        assert!(!state.transcript_loaded);
    }

    #[test]
    fn test_edit_is_idempotent() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.load_transcript(active, vec![message(102, active, 2, "typo")], None);

        state.edit(102, active, "fixed".into());
        let once = state.clone();
        state.edit(102, active, "fixed".into());

        assert_eq!(state, once);
        let edited = state.message(102).cloned();
        assert_eq!(edited.as_ref().map(|m| m.text.as_str()), Some("fixed"));
        assert_eq!(edited.map(|m| m.edited), Some(true));
    }

    #[test]
    fn test_edit_of_unknown_or_inactive_is_noop() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.load_transcript(active, vec![message(1, active, 2, "a")], None);
        let before = state.clone();

        state.edit(999, active, "nope".into());
        state.edit(1, ChatRef::private(99), "nope".into());
        assert_eq!(state, before);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.load_transcript(
            active,
            vec![message(1, active, 2, "a"), message(2, active, 2, "b")],
            None,
        );

        state.delete(1, active);
        let once = state.clone();
        state.delete(1, active);
        assert_eq!(state, once);
        assert_eq!(ids(&state), vec![2]);
    }

    #[test]
    fn test_unread_never_goes_negative() {
        let other = ChatRef::private(99);
        let mut state = state_with_active(ChatRef::private(42));
        state.increment_unread(other);

        for id in 0..5 {
            state.mark_read(id, other);
        }
        assert_eq!(state.chat(other).map(|c| c.unread_count), Some(0));
    }

    #[test]
    fn test_read_of_already_read_message_is_not_counted_twice() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.increment_unread(active);
        state.increment_unread(active);
        state.load_transcript(active, vec![message(1, active, 2, "a")], None);

        state.mark_read(1, active);
        state.mark_read(1, active);
        assert_eq!(state.chat(active).map(|c| c.unread_count), Some(1));
        assert_eq!(state.message(1).map(|m| m.read), Some(true));
    }

    #[test]
    fn test_server_echo_replaces_pending() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        let local_id = Uuid::new_v4();
        state.add_pending(PendingMessage {
            local_id,
            chat: active,
            text: "hello".into(),
            attachment: None,
            created_at: at(0),
        });

        // Same text from someone else is not our echo.
        state.receive(message(1, active, 2, "hello"), Some(1));
        assert_eq!(state.pending_for(active).count(), 1);

        state.receive(message(2, active, 1, "hello"), Some(1));
        assert_eq!(state.pending_for(active).count(), 0);
        assert_eq!(ids(&state), vec![1, 2]);
    }

    fn pending(chat: ChatRef, text: &str) -> PendingMessage {
        PendingMessage {
            local_id: Uuid::new_v4(),
            chat,
            text: text.into(),
            attachment: None,
            created_at: at(0),
        }
    }

    #[test]
    fn test_leaving_a_chat_drops_its_pending_echoes() {
        let a = ChatRef::private(42);
        let b = ChatRef::private(99);
        let mut state = state_with_active(a);
        state.add_pending(pending(a, "hi"));
        state.add_pending(pending(b, "queued elsewhere"));

        // Reopening the same chat keeps them.
        state.set_active(Some(a));
        assert_eq!(state.pending_for(a).count(), 1);

        state.set_active(Some(b));
        state.set_active(Some(a));
        state.load_transcript(a, vec![message(500, a, 1, "hi")], Some(1));

        assert_eq!(state.pending_for(a).count(), 0);
        assert_eq!(state.pending_for(b).count(), 1);
        assert_eq!(ids(&state), vec![500]);
    }

    #[test]
    fn test_fetched_copy_confirms_pending_echo() {
        let active = ChatRef::private(42);
        let mut state = state_with_active(active);
        state.add_pending(pending(active, "hi"));
        state.add_pending(pending(active, "hi"));

        state.load_transcript(
            active,
            vec![message(1, active, 2, "hi"), message(2, active, 1, "hi")],
            Some(1),
        );
        assert_eq!(state.pending_for(active).count(), 1);

        // A refetch of the same history confirms nothing new.
        state.load_transcript(active, vec![message(2, active, 1, "hi")], Some(1));
        assert_eq!(state.pending_for(active).count(), 1);
    }

    #[test]
    fn test_removing_active_chat_clears_selection() {
        let active = group(5);
        let mut state = state_with_active(active);
        state.receive(message(1, active, 2, "a"), None);

        state.remove_chat(active);
        assert_eq!(state.active, None);
        assert!(state.transcript.is_empty());
        assert!(state.chat(active).is_none());
    }

    #[test]
    fn test_member_status_propagates_to_every_chat() {
        let mut state = state_with_active(group(5));
        state.set_member_status(1, PresenceStatus::Online);

        for chat in &state.list {
            let member = chat.members.iter().find(|m| m.id == 1);
            assert_eq!(member.map(|m| m.status), Some(PresenceStatus::Online));
        }
        let other = state.chat(group(5)).and_then(|c| c.members.iter().find(|m| m.id == 2));
        assert_eq!(other.map(|m| m.status), Some(PresenceStatus::Offline));
    }
}
