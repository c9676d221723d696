//! Chatsync client: real-time chat synchronization over STOMP/WebSocket.
//!
//! This crate holds the runtime of the messenger client: one broker session
//! shared by every feature, the chat and presence sync on top of it, and the
//! reducer store front ends render from.

pub mod api_client;
pub mod client;
pub mod config;
pub mod error;
pub mod storage;
pub mod stores;
pub mod sync;
pub mod ws;

pub use api_client::{ApiClient, Backend};
pub use client::ChatClient;
pub use config::ClientConfig;
pub use error::{Result, SyncError};
pub use stores::{Action, ClientState, Store};
pub use sync::{ChatHistory, ChatSyncController, PresenceTracker, SyncPhase};
pub use ws::{ConnectionState, Connector, Session, SubscriptionCategory};
