//! Error types for the hub.

use sitesync_protocol::Watermark;
use thiserror::Error;

/// Result type for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Errors that refuse a whole request.
///
/// Per-record problems in an upload never surface here; those come back
/// as rejections inside the receipt so the rest of the batch can land.
#[derive(Error, Debug)]
pub enum HubError {
    /// An upload carried more records than the hub accepts at once.
    #[error("upload of {len} records exceeds the batch limit of {max}")]
    BatchTooLarge {
        /// Records in the refused upload.
        len: usize,
        /// Configured batch limit.
        max: u32,
    },

    /// A download asked for changes past the end of the consolidated log.
    ///
    /// A site can only hold such a watermark if it last synced against a
    /// different hub or the hub lost its log; serving from it would
    /// silently skip changes, so the request is refused instead.
    #[error("download cursor {requested} is ahead of the log head {head}")]
    WatermarkAhead {
        /// Cursor presented by the site.
        requested: Watermark,
        /// Highest position in the consolidated log.
        head: Watermark,
    },
}
