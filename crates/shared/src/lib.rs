//! Shared types and wire protocol for the chatsync client.

pub mod error;
pub mod models;
pub mod protocol;
pub mod stomp;

pub use error::*;
pub use models::*;
pub use protocol::*;
pub use stomp::{Command, Frame};
