//! Search projections over the chat list and the active transcript.
//!
//! Only the query and a cursor are stored. Matches are recomputed from the
//! live collections each time they are read, so they cannot go stale.

use chatsync_shared::{Chat, Message, MessageId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchAction {
    SetQuery(String),
    Next,
    Previous,
    Clear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchState {
    pub query: Option<String>,
    pub cursor: usize,
}

/// Transcript matches for the current query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub matches: Vec<MessageId>,
    /// Index into `matches` of the highlighted result.
    pub current: Option<usize>,
}

impl SearchResults {
    pub fn current_message(&self) -> Option<MessageId> {
        self.current.and_then(|i| self.matches.get(i).copied())
    }
}

impl SearchState {
    pub(crate) fn apply(&mut self, action: SearchAction, transcript: &[Message]) {
        match action {
            SearchAction::SetQuery(query) if query.trim().is_empty() => self.clear(),
            SearchAction::SetQuery(query) => {
                self.query = Some(query);
                self.cursor = 0;
            }
            SearchAction::Next => {
                let total = self.results(transcript).matches.len();
                if total > 0 {
                    self.cursor = (self.cursor.min(total - 1) + 1) % total;
                }
            }
            SearchAction::Previous => {
                let total = self.results(transcript).matches.len();
                if total > 0 {
                    let cursor = self.cursor.min(total - 1);
                    self.cursor = if cursor == 0 { total - 1 } else { cursor - 1 };
                }
            }
            SearchAction::Clear => self.clear(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.query = None;
        self.cursor = 0;
    }

    pub fn results(&self, transcript: &[Message]) -> SearchResults {
        let Some(query) = self.query.as_deref() else {
            return SearchResults::default();
        };
        let matches = transcript_matches(transcript, query);
        let current = (!matches.is_empty()).then(|| self.cursor.min(matches.len() - 1));
        SearchResults { matches, current }
    }
}

/// Ids of messages whose text contains `query`, case-insensitively, in
/// transcript order.
pub fn transcript_matches(transcript: &[Message], query: &str) -> Vec<MessageId> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    transcript
        .iter()
        .filter(|m| m.text.to_lowercase().contains(&needle))
        .map(|m| m.id)
        .collect()
}

/// Chats whose name, or any member's username or display name, contains
/// `query`. A blank query matches everything.
pub fn filter_chats<'a>(chats: &'a [Chat], query: &str) -> Vec<&'a Chat> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return chats.iter().collect();
    }
    let hit = |s: &str| s.to_lowercase().contains(&needle);
    chats
        .iter()
        .filter(|chat| {
            hit(&chat.name)
                || chat.members.iter().any(|m| {
                    hit(&m.username) || m.display_name.as_deref().is_some_and(|n| hit(n))
                })
        })
        .collect()
}
