//! Commit journal frames and replay.
//!
//! Every committed transaction is appended as one frame:
//!
//! ```text
//! ┌───────────┬─────────────┬──────────────┬─────────────┬───────────┐
//! │ magic (4) │ version (2) │ body len (4) │ CBOR body   │ CRC32 (4) │
//! └───────────┴─────────────┴──────────────┴─────────────┴───────────┘
//! ```
//!
//! The body is a CBOR-encoded `Vec<JournalOp>` holding every mutation of
//! the transaction, so a frame is applied in full or not at all. The CRC
//! covers the header and body.
//!
//! Replay distinguishes two failure shapes:
//!
//! - A frame cut short by a crash mid-append (incomplete header, body that
//!   runs past end of file, or a checksum failure on the final frame) ends
//!   replay cleanly; the caller truncates the tail.
//! - Damage before the tail (bad magic, checksum failure with more data
//!   after the frame) is real corruption and fails replay.

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sitesync_protocol::{
    wire, ChangeRecord, EntityKey, FieldMap, RecordId, RecordState, Timestamp, Watermark,
};

/// Magic bytes identifying a journal frame.
pub const JOURNAL_MAGIC: [u8; 4] = *b"SSJL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Frame header size: magic (4) + version (2) + body length (4).
const HEADER_SIZE: usize = 10;

/// CRC trailer size.
const CRC_SIZE: usize = 4;

/// A single mutation inside a committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Insert or update a business row.
    PutRow {
        /// Row identity.
        entity: EntityKey,
        /// New field values.
        payload: FieldMap,
        /// Revision stamp of this version.
        revision: Timestamp,
    },

    /// Delete a business row, leaving a tombstone.
    DeleteRow {
        /// Row identity.
        entity: EntityKey,
        /// Revision stamp of the tombstone.
        revision: Timestamp,
    },

    /// Append a record to the outbox.
    PutOutbox {
        /// The queued change record.
        record: ChangeRecord,
    },

    /// Update the lifecycle state of an outbox record.
    MarkOutbox {
        /// Record to update.
        id: RecordId,
        /// New state.
        state: RecordState,
    },

    /// Remove an outbox record entirely.
    RemoveOutbox {
        /// Record to remove.
        id: RecordId,
    },

    /// Advance the download watermark.
    SetWatermark {
        /// New watermark value.
        watermark: Watermark,
    },

    /// Record the next outbox record ID to allocate.
    SetNextRecordId {
        /// Next ID value.
        id: RecordId,
    },
}

/// Summary of a journal replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    /// Number of complete frames applied.
    pub frames: u64,
    /// Total operations across those frames.
    pub ops: u64,
    /// Byte offset just past the last complete frame.
    pub valid_len: u64,
    /// Bytes of torn tail after `valid_len` (0 when the journal is clean).
    pub torn_bytes: u64,
}

impl ReplayReport {
    /// Returns `true` if the journal ended with a torn frame.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.torn_bytes > 0
    }
}

/// Append-only journal of committed transactions.
pub struct Journal {
    backend: Mutex<Box<dyn StorageBackend>>,
    sync_on_commit: bool,
}

impl Journal {
    /// Creates a journal over the given backend.
    ///
    /// With `sync_on_commit` set, every append is fsynced before returning,
    /// making commits durable against power loss.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend: Mutex::new(backend),
            sync_on_commit,
        }
    }

    /// Appends one committed transaction as a frame.
    ///
    /// Returns the offset where the frame was written.
    pub fn append(&self, ops: &[JournalOp]) -> StoreResult<u64> {
        let frame = encode_frame(ops)?;

        let mut backend = self.backend.lock();
        let offset = backend.append(&frame)?;
        if self.sync_on_commit {
            backend.sync()?;
        }
        Ok(offset)
    }

    /// Replays every complete frame from the start, invoking `apply` once
    /// per frame with its operations in commit order.
    ///
    /// A torn tail ends replay and is reported; the journal is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::JournalCorruption`] for damage before the tail,
    /// or the first error returned by `apply`.
    pub fn replay<F>(&self, mut apply: F) -> StoreResult<ReplayReport>
    where
        F: FnMut(&[JournalOp]) -> StoreResult<()>,
    {
        let backend = self.backend.lock();
        let total = backend.size()?;

        let mut report = ReplayReport {
            frames: 0,
            ops: 0,
            valid_len: 0,
            torn_bytes: 0,
        };

        let mut offset = 0u64;
        while offset < total {
            match read_frame(backend.as_ref(), offset, total)? {
                FrameOutcome::Frame { ops, next_offset } => {
                    apply(&ops)?;
                    report.frames += 1;
                    report.ops += ops.len() as u64;
                    report.valid_len = next_offset;
                    offset = next_offset;
                }
                FrameOutcome::Torn => {
                    report.torn_bytes = total - offset;
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Truncates the journal to `len` bytes.
    ///
    /// Used to drop a torn tail after replay.
    pub fn truncate(&self, len: u64) -> StoreResult<()> {
        let mut backend = self.backend.lock();
        backend.truncate(len)?;
        backend.sync()
    }

    /// Discards all frames.
    ///
    /// Used after a checkpoint has captured the journal's effects.
    pub fn clear(&self) -> StoreResult<()> {
        self.truncate(0)
    }

    /// Returns the current journal size in bytes.
    pub fn size(&self) -> StoreResult<u64> {
        self.backend.lock().size()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}

/// Outcome of reading one frame during replay.
enum FrameOutcome {
    /// A complete, verified frame.
    Frame {
        ops: Vec<JournalOp>,
        next_offset: u64,
    },
    /// The frame is cut short by end of file; replay ends here.
    Torn,
}

/// Encodes one transaction's operations as a journal frame.
fn encode_frame(ops: &[JournalOp]) -> StoreResult<Vec<u8>> {
    let body = wire::encode(&ops)?;
    let len = u32::try_from(body.len()).map_err(|_| {
        StoreError::invalid_operation(format!("journal frame too large: {} bytes", body.len()))
    })?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len() + CRC_SIZE);
    frame.extend_from_slice(&JOURNAL_MAGIC);
    frame.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);

    let crc = compute_crc32(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Reads and verifies the frame starting at `offset`.
fn read_frame(backend: &dyn StorageBackend, offset: u64, total: u64) -> StoreResult<FrameOutcome> {
    let remaining = (total - offset) as usize;
    if remaining < HEADER_SIZE {
        return Ok(FrameOutcome::Torn);
    }

    let header = backend.read_at(offset, HEADER_SIZE)?;

    let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
    if magic != JOURNAL_MAGIC {
        return Err(StoreError::journal_corruption(format!(
            "invalid magic at offset {offset}"
        )));
    }

    let version = u16::from_le_bytes([header[4], header[5]]);
    if version > JOURNAL_VERSION {
        return Err(StoreError::journal_corruption(format!(
            "unsupported version {version} at offset {offset}"
        )));
    }

    let body_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let frame_len = HEADER_SIZE + body_len + CRC_SIZE;
    if remaining < frame_len {
        return Ok(FrameOutcome::Torn);
    }

    let frame = backend.read_at(offset, frame_len)?;
    let body_end = HEADER_SIZE + body_len;

    let stored_crc = u32::from_le_bytes([
        frame[body_end],
        frame[body_end + 1],
        frame[body_end + 2],
        frame[body_end + 3],
    ]);
    let computed_crc = compute_crc32(&frame[..body_end]);

    if stored_crc != computed_crc {
        let frame_end = offset + frame_len as u64;
        if frame_end == total {
            // Last frame on disk: a partially flushed body from a crash.
            return Ok(FrameOutcome::Torn);
        }
        return Err(StoreError::journal_corruption(format!(
            "checksum mismatch at offset {offset}: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    let ops: Vec<JournalOp> = wire::decode(&frame[HEADER_SIZE..body_end]).map_err(|e| {
        StoreError::journal_corruption(format!("undecodable frame body at offset {offset}: {e}"))
    })?;

    Ok(FrameOutcome::Frame {
        ops,
        next_offset: offset + frame_len as u64,
    })
}

/// Computes CRC32 (IEEE polynomial) over `data`.
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackend;
    use sitesync_protocol::{EntityId, FieldValue, LocalChange};

    fn sample_ops(revision: u64) -> Vec<JournalOp> {
        let entity = EntityKey::new("task", EntityId::from_bytes([7; 16]));
        let mut payload = FieldMap::new();
        payload.insert("title".to_string(), FieldValue::from("write tests"));
        vec![
            JournalOp::PutRow {
                entity: entity.clone(),
                payload: payload.clone(),
                revision: Timestamp::from_millis(revision),
            },
            JournalOp::PutOutbox {
                record: ChangeRecord::from_change(
                    RecordId::new(revision),
                    LocalChange::update(entity, payload),
                    Timestamp::from_millis(revision),
                ),
            },
        ]
    }

    fn collect_replay(journal: &Journal) -> (Vec<JournalOp>, ReplayReport) {
        let mut seen = Vec::new();
        let report = journal
            .replay(|ops| {
                seen.extend_from_slice(ops);
                Ok(())
            })
            .unwrap();
        (seen, report)
    }

    #[test]
    fn append_and_replay_roundtrip() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        let ops = sample_ops(100);
        journal.append(&ops).unwrap();

        let (seen, report) = collect_replay(&journal);
        assert_eq!(seen, ops);
        assert_eq!(report.frames, 1);
        assert_eq!(report.ops, 2);
        assert!(!report.has_torn_tail());
        assert_eq!(report.valid_len, journal.size().unwrap());
    }

    #[test]
    fn replay_preserves_commit_order() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        journal.append(&sample_ops(2)).unwrap();
        journal.append(&sample_ops(3)).unwrap();

        let (seen, report) = collect_replay(&journal);
        assert_eq!(report.frames, 3);
        assert_eq!(seen.len(), 6);

        let revisions: Vec<u64> = seen
            .iter()
            .filter_map(|op| match op {
                JournalOp::PutRow { revision, .. } => Some(revision.as_millis()),
                _ => None,
            })
            .collect();
        assert_eq!(revisions, vec![1, 2, 3]);
    }

    #[test]
    fn replay_empty_journal() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        let (seen, report) = collect_replay(&journal);
        assert!(seen.is_empty());
        assert_eq!(report.frames, 0);
        assert_eq!(report.valid_len, 0);
        assert!(!report.has_torn_tail());
    }

    #[test]
    fn torn_tail_ends_replay() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        journal.append(&sample_ops(2)).unwrap();
        let full = journal.size().unwrap();

        // Simulate a crash mid-append of the second frame.
        journal.truncate(full - 5).unwrap();

        let (seen, report) = collect_replay(&journal);
        assert_eq!(report.frames, 1);
        assert_eq!(seen.len(), 2);
        assert!(report.has_torn_tail());
        assert_eq!(report.valid_len + report.torn_bytes, full - 5);
    }

    #[test]
    fn torn_header_ends_replay() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        let good = journal.size().unwrap();

        // Only 4 bytes of the next header made it to disk.
        let mut data = vec![0u8; (good + 4) as usize];
        {
            let backend = journal.backend.lock();
            data[..good as usize].copy_from_slice(&backend.read_at(0, good as usize).unwrap());
        }
        data[good as usize..].copy_from_slice(&JOURNAL_MAGIC);

        let torn = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        let (_, report) = collect_replay(&torn);
        assert_eq!(report.frames, 1);
        assert_eq!(report.valid_len, good);
        assert_eq!(report.torn_bytes, 4);
    }

    #[test]
    fn checksum_failure_on_final_frame_is_torn() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        journal.append(&sample_ops(2)).unwrap();
        let first_frame_len = {
            let backend = journal.backend.lock();
            let header = backend.read_at(0, HEADER_SIZE).unwrap();
            let body_len =
                u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
            HEADER_SIZE + body_len + CRC_SIZE
        };

        // Flip a byte inside the second frame's body.
        let mut data = {
            let backend = journal.backend.lock();
            let size = backend.size().unwrap() as usize;
            backend.read_at(0, size).unwrap()
        };
        data[first_frame_len + HEADER_SIZE + 2] ^= 0xFF;

        let damaged = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        let (seen, report) = collect_replay(&damaged);
        assert_eq!(report.frames, 1);
        assert_eq!(seen.len(), 2);
        assert!(report.has_torn_tail());
    }

    #[test]
    fn checksum_failure_before_tail_is_corruption() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        journal.append(&sample_ops(2)).unwrap();

        // Flip a byte inside the first frame's body.
        let mut data = {
            let backend = journal.backend.lock();
            let size = backend.size().unwrap() as usize;
            backend.read_at(0, size).unwrap()
        };
        data[HEADER_SIZE + 2] ^= 0xFF;

        let damaged = Journal::new(Box::new(InMemoryBackend::with_data(data)), false);
        let result = damaged.replay(|_ops| Ok(()));
        assert!(matches!(result, Err(StoreError::JournalCorruption { .. })));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let journal = Journal::new(Box::new(InMemoryBackend::with_data(vec![0xAA; 32])), false);
        let result = journal.replay(|_ops| Ok(()));
        assert!(matches!(result, Err(StoreError::JournalCorruption { .. })));
    }

    #[test]
    fn truncate_drops_torn_tail() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        let good = journal.size().unwrap();
        journal.append(&sample_ops(2)).unwrap();
        journal.truncate(journal.size().unwrap() - 3).unwrap();

        let (_, report) = collect_replay(&journal);
        assert!(report.has_torn_tail());

        journal.truncate(report.valid_len).unwrap();
        let (_, clean) = collect_replay(&journal);
        assert_eq!(clean.valid_len, good);
        assert!(!clean.has_torn_tail());
    }

    #[test]
    fn clear_empties_journal() {
        let journal = Journal::new(Box::new(InMemoryBackend::new()), false);
        journal.append(&sample_ops(1)).unwrap();
        assert!(journal.size().unwrap() > 0);

        journal.clear().unwrap();
        assert_eq!(journal.size().unwrap(), 0);
        let (seen, _) = collect_replay(&journal);
        assert!(seen.is_empty());
    }

    #[test]
    fn crc32_known_value() {
        // Known test vector: "123456789" should give 0xCBF43926
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc32_empty() {
        assert_eq!(compute_crc32(b""), 0x0000_0000);
    }
}
