//! In-memory storage backend for tests and ephemeral stores.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;

/// A backend holding everything in one in-memory buffer.
///
/// Durability calls are accepted and do nothing; data lives exactly as
/// long as the value does. Suitable for tests and throwaway stores.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates a new empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend seeded with data, for recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the full contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StoreResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StoreError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let mut buf = self.data.write();
        let offset = buf.len() as u64;
        buf.extend_from_slice(data);
        Ok(offset)
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StoreResult<()> {
        Ok(())
    }

    fn size(&self) -> StoreResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StoreResult<()> {
        let mut buf = self.data.write();
        if new_size > buf.len() as u64 {
            return Err(StoreError::invalid_operation(format!(
                "cannot truncate to {} past current size {}",
                new_size,
                buf.len()
            )));
        }
        buf.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read() {
        let mut backend = InMemoryBackend::new();
        let offset = backend.append(b"test data").unwrap();
        assert_eq!(offset, 0);
        assert_eq!(backend.read_at(0, 9).unwrap(), b"test data");
        assert_eq!(backend.size().unwrap(), 9);
    }

    #[test]
    fn seeded_data_is_readable() {
        let backend = InMemoryBackend::with_data(vec![1, 2, 3]);
        assert_eq!(backend.read_at(1, 2).unwrap(), vec![2, 3]);
    }

    #[test]
    fn truncate_bounds_checked() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abcdef").unwrap();
        backend.truncate(2).unwrap();
        assert_eq!(backend.data(), b"ab");
        assert!(backend.truncate(10).is_err());
    }
}
