//! Everything between the broker session and the store.

pub mod controller;
pub mod normalize;
pub mod presence;

pub use controller::{ChatHistory, ChatSyncController, SyncPhase};
pub use normalize::PushContext;
pub use presence::{IdleTracker, IdleTransition, PresenceTracker};
