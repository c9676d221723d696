//! Client-side error taxonomy.

use chatsync_shared::{ApiError, ProtocolError};
use thiserror::Error;

/// Errors surfaced by the session, controller and presence tracker.
///
/// `Clone` so one failed connect attempt can be handed to every caller that
/// joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Not connected and no stored credential is available")]
    NotConnected,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Subscription to {destination} failed: {reason}")]
    Subscription { destination: String, reason: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
