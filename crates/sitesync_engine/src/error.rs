//! Error types for the sync engine.

use sitesync_protocol::EntityKey;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync engine.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether retrying the same request may succeed.
        retryable: bool,
    },

    /// Malformed or unexpected message content.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The hub answered but rejected the request.
    #[error("hub error: {0}")]
    Hub(String),

    /// Local store failure during sync.
    #[error("store error: {0}")]
    Store(#[from] sitesync_store::StoreError),

    /// A downloaded batch could not be merged.
    ///
    /// Carries the offending change's entity key so operators can find the
    /// bad data; the whole batch was rolled back.
    #[error("merge failed for {entity}: {message}")]
    Merge {
        /// Display form of the offending entity key.
        entity: String,
        /// What made the change unappliable.
        message: String,
    },

    /// The hub is not reachable.
    #[error("hub not reachable")]
    Offline,

    /// A probe or request exceeded its deadline.
    #[error("operation timed out")]
    Timeout,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a merge error naming the offending change.
    pub fn merge_failed(entity: &EntityKey, message: impl Into<String>) -> Self {
        Self::Merge {
            entity: entity.to_string(),
            message: message.into(),
        }
    }

    /// Returns true if retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Hub(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesync_protocol::EntityId;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Hub("internal error".into()).is_retryable());
        assert!(!SyncError::Offline.is_retryable());
    }

    #[test]
    fn merge_error_names_the_entity() {
        let key = EntityKey::new("orders", EntityId::from_bytes([3u8; 16]));
        let err = SyncError::merge_failed(&key, "update without payload");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("orders/"));
        assert!(err.to_string().contains("update without payload"));
    }

    #[test]
    fn error_display() {
        let err = SyncError::Offline;
        assert_eq!(err.to_string(), "hub not reachable");

        let err = SyncError::Protocol("truncated frame".into());
        assert!(err.to_string().contains("truncated frame"));
    }
}
