//! Subscription bookkeeping keyed by destination.
//!
//! At most one subscription exists per destination. Registering a second one
//! cancels the first before it is replaced.

use std::collections::HashMap;

/// Who owns a subscription. Chat-scoped subscriptions are torn down when the
/// active chat changes; global ones (presence, friends) live for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionCategory {
    Chat,
    Global,
}

/// Something that can be cancelled on the wire.
pub trait Cancel {
    fn cancel(&self);
}

struct Registration<H> {
    handle: H,
    category: SubscriptionCategory,
}

pub struct SubscriptionRegistry<H: Cancel> {
    entries: HashMap<String, Registration<H>>,
}

impl<H: Cancel> SubscriptionRegistry<H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Track `handle` under `destination`, cancelling any handle already
    /// registered there.
    pub fn add(&mut self, destination: &str, handle: H, category: SubscriptionCategory) {
        if let Some(old) = self.entries.remove(destination) {
            tracing::debug!(destination, "Replacing existing subscription");
            old.handle.cancel();
        }
        self.entries
            .insert(destination.to_string(), Registration { handle, category });
    }

    /// Cancel and forget the subscription on `destination`. Returns whether
    /// one existed.
    pub fn remove_by_destination(&mut self, destination: &str) -> bool {
        match self.entries.remove(destination) {
            Some(old) => {
                old.handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and forget every subscription in `category`. Returns how many
    /// were removed.
    pub fn remove_by_category(&mut self, category: SubscriptionCategory) -> usize {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, r)| r.category == category)
            .map(|(d, _)| d.clone())
            .collect();
        for destination in &doomed {
            if let Some(old) = self.entries.remove(destination) {
                old.handle.cancel();
            }
        }
        doomed.len()
    }

    /// Cancel and forget everything.
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        for (_, old) in self.entries.drain() {
            old.handle.cancel();
        }
        count
    }

    /// Forget everything without cancelling. Used when the link is already
    /// gone and there is nobody left to tell.
    pub fn forget_all(&mut self) {
        self.entries.clear();
    }

    pub fn category_of(&self, destination: &str) -> Option<SubscriptionCategory> {
        self.entries.get(destination).map(|r| r.category)
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut all: Vec<String> = self.entries.keys().cloned().collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<H: Cancel> Default for SubscriptionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct FakeHandle {
        cancelled: Rc<Cell<u32>>,
    }

    impl FakeHandle {
        fn new() -> Self {
            Self {
                cancelled: Rc::new(Cell::new(0)),
            }
        }

        fn cancels(&self) -> u32 {
            self.cancelled.get()
        }
    }

    impl Cancel for FakeHandle {
        fn cancel(&self) {
            self.cancelled.set(self.cancelled.get() + 1);
        }
    }

    #[test]
    fn test_add_replaces_and_cancels_previous() {
        let mut registry = SubscriptionRegistry::new();
        let first = FakeHandle::new();
        let second = FakeHandle::new();

        registry.add("/topic/private-message.1", first.clone(), SubscriptionCategory::Chat);
        registry.add("/topic/private-message.1", second.clone(), SubscriptionCategory::Chat);

        assert_eq!(registry.len(), 1);
        assert_eq!(first.cancels(), 1);
        assert_eq!(second.cancels(), 0);
    }

    #[test]
    fn test_remove_by_destination() {
        let mut registry = SubscriptionRegistry::new();
        let handle = FakeHandle::new();
        registry.add("/user.status", handle.clone(), SubscriptionCategory::Global);

        assert!(registry.remove_by_destination("/user.status"));
        assert!(!registry.remove_by_destination("/user.status"));
        assert_eq!(handle.cancels(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_by_category_keeps_other_category() {
        let mut registry = SubscriptionRegistry::new();
        let chat = FakeHandle::new();
        let status = FakeHandle::new();
        let friends = FakeHandle::new();
        registry.add("/topic/group-message.3", chat.clone(), SubscriptionCategory::Chat);
        registry.add("/user.status", status.clone(), SubscriptionCategory::Global);
        registry.add("/topic/friends.updates", friends.clone(), SubscriptionCategory::Global);

        assert_eq!(registry.remove_by_category(SubscriptionCategory::Chat), 1);
        assert_eq!(chat.cancels(), 1);
        assert_eq!(status.cancels(), 0);
        assert_eq!(
            registry.destinations(),
            vec!["/topic/friends.updates".to_string(), "/user.status".to_string()]
        );
        assert_eq!(
            registry.category_of("/user.status"),
            Some(SubscriptionCategory::Global)
        );
    }

    #[test]
    fn test_clear_and_forget() {
        let mut registry = SubscriptionRegistry::new();
        let a = FakeHandle::new();
        let b = FakeHandle::new();
        registry.add("/a", a.clone(), SubscriptionCategory::Chat);
        registry.add("/b", b.clone(), SubscriptionCategory::Global);
        assert_eq!(registry.clear(), 2);
        assert_eq!(a.cancels() + b.cancels(), 2);

        registry.add("/a", a.clone(), SubscriptionCategory::Chat);
        registry.forget_all();
        assert!(registry.is_empty());
        assert_eq!(a.cancels(), 1);
    }
}
