//! Storage backend trait.

use crate::error::StoreResult;

/// A low-level append-oriented byte store.
///
/// Backends are opaque: they know nothing about journal frames or
/// snapshots. The store owns all format interpretation.
///
/// # Invariants
///
/// - `append` returns the offset the data landed at
/// - `read_at` returns exactly the bytes previously written there
/// - after `sync` returns, appended data survives process termination
/// - backends are `Send + Sync` for concurrent access
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::ReadPastEnd`] if the range extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>>;

    /// Appends data, returning the offset it was written at.
    fn append(&mut self, data: &[u8]) -> StoreResult<u64>;

    /// Pushes buffered writes to the OS.
    fn flush(&mut self) -> StoreResult<()>;

    /// Forces data and metadata to durable storage.
    fn sync(&mut self) -> StoreResult<()>;

    /// Current size in bytes; the offset the next `append` writes at.
    fn size(&self) -> StoreResult<u64>;

    /// Discards everything at and after `new_size`.
    ///
    /// # Errors
    ///
    /// Fails if `new_size` exceeds the current size.
    fn truncate(&mut self, new_size: u64) -> StoreResult<()>;
}
