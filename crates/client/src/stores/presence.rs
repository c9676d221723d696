//! Friend set and friend presence.

use std::collections::BTreeMap;

use chatsync_shared::{Friend, PresenceStatus, UserId};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceEntry {
    pub status: PresenceStatus,
    /// When the update was received. Kept for staleness checks; entries are
    /// never expired on their own.
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceState {
    pub friends: BTreeMap<UserId, Friend>,
    pub statuses: BTreeMap<UserId, PresenceEntry>,
}

impl PresenceState {
    pub fn is_friend(&self, user_id: UserId) -> bool {
        self.friends.contains_key(&user_id)
    }

    /// Status of a user, defaulting to offline if unknown.
    pub fn status_of(&self, user_id: UserId) -> PresenceStatus {
        self.statuses
            .get(&user_id)
            .map(|e| e.status)
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn online_friends(&self) -> Vec<&Friend> {
        self.friends
            .values()
            .filter(|f| self.status_of(f.id) == PresenceStatus::Online)
            .collect()
    }

    pub(crate) fn load_friends(&mut self, friends: Vec<Friend>) {
        self.friends = friends.into_iter().map(|f| (f.id, f)).collect();
        self.prune();
    }

    pub(crate) fn add_friend(&mut self, friend: Friend) {
        self.friends.insert(friend.id, friend);
    }

    pub(crate) fn remove_friend(&mut self, user_id: UserId) {
        self.friends.remove(&user_id);
        self.prune();
    }

    /// Record a status update. Returns `false` (and records nothing) for
    /// users outside the friend set.
    pub(crate) fn update(
        &mut self,
        user_id: UserId,
        status: PresenceStatus,
        at: DateTime<Utc>,
    ) -> bool {
        if !self.is_friend(user_id) {
            return false;
        }
        self.statuses.insert(
            user_id,
            PresenceEntry {
                status,
                updated_at: at,
            },
        );
        true
    }

    fn prune(&mut self) {
        let friends = &self.friends;
        self.statuses.retain(|id, _| friends.contains_key(id));
    }
}
