//! Store facade, transactions, and recovery.

use crate::dir::{self, StoreDir};
use crate::error::{StoreError, StoreResult};
use crate::file::FileBackend;
use crate::journal::{compute_crc32, Journal, JournalOp};
use crate::memory::InMemoryBackend;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sitesync_protocol::{
    wire, ChangeRecord, EntityKey, FieldMap, LocalVersion, RecordId, RecordState, Timestamp,
    Watermark,
};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Magic bytes identifying a snapshot file.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"SSSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

/// Snapshot header size: magic (4) + version (2) + body length (4).
const SNAPSHOT_HEADER_SIZE: usize = 10;

/// CRC trailer size.
const CRC_SIZE: usize = 4;

/// One versioned business row.
///
/// Deleted rows stay present as tombstones; conflict resolution needs the
/// deletion revision long after the payload is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowState {
    /// Revision stamp of the current version.
    pub revision: Timestamp,
    /// Whether this row is a tombstone.
    pub deleted: bool,
    /// Field values. `None` for tombstones.
    pub payload: Option<FieldMap>,
}

impl RowState {
    /// A live row with field values.
    #[must_use]
    pub fn live(revision: Timestamp, payload: FieldMap) -> Self {
        Self {
            revision,
            deleted: false,
            payload: Some(payload),
        }
    }

    /// A tombstone left by a deletion.
    #[must_use]
    pub fn tombstone(revision: Timestamp) -> Self {
        Self {
            revision,
            deleted: true,
            payload: None,
        }
    }

    /// The conflict-resolution view of this row.
    #[must_use]
    pub fn to_version(&self) -> LocalVersion {
        LocalVersion {
            revision: self.revision,
            deleted: self.deleted,
            payload: self.payload.clone(),
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Fsync the journal after every committed transaction.
    ///
    /// Disabling trades durability of the most recent commits for write
    /// throughput; the journal format stays crash-consistent either way.
    pub sync_on_commit: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
        }
    }
}

impl StoreOptions {
    /// Sets whether to fsync on commit.
    #[must_use]
    pub fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

/// Row, outbox, and journal counters for tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Live (non-tombstone) rows.
    pub live_rows: usize,
    /// Tombstoned rows.
    pub tombstones: usize,
    /// Outbox records not yet accepted by the hub.
    pub pending_outbox: usize,
    /// Outbox records accepted and awaiting compaction.
    pub flushed_outbox: usize,
    /// Current download watermark.
    pub watermark: Watermark,
    /// Journal size in bytes.
    pub journal_bytes: u64,
}

/// In-memory image of the store, rebuilt from snapshot plus journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoreState {
    rows: BTreeMap<EntityKey, RowState>,
    outbox: BTreeMap<RecordId, ChangeRecord>,
    watermark: Watermark,
    next_record_id: RecordId,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            outbox: BTreeMap::new(),
            watermark: Watermark::ORIGIN,
            next_record_id: RecordId::new(1),
        }
    }
}

impl StoreState {
    /// Applies one journal operation.
    ///
    /// Must stay deterministic and lenient: replaying a journal over a
    /// snapshot that already contains its effects reproduces the same state.
    fn apply(&mut self, op: &JournalOp) {
        match op {
            JournalOp::PutRow {
                entity,
                payload,
                revision,
            } => {
                self.rows
                    .insert(entity.clone(), RowState::live(*revision, payload.clone()));
            }
            JournalOp::DeleteRow { entity, revision } => {
                self.rows
                    .insert(entity.clone(), RowState::tombstone(*revision));
            }
            JournalOp::PutOutbox { record } => {
                self.outbox.insert(record.id, record.clone());
            }
            JournalOp::MarkOutbox { id, state } => {
                if let Some(record) = self.outbox.get_mut(id) {
                    record.state = *state;
                }
            }
            JournalOp::RemoveOutbox { id } => {
                self.outbox.remove(id);
            }
            JournalOp::SetWatermark { watermark } => {
                self.watermark = *watermark;
            }
            JournalOp::SetNextRecordId { id } => {
                self.next_record_id = *id;
            }
        }
    }
}

/// Durable local store for one site: business rows, the outbox, and the
/// download watermark, all committed together.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use sitesync_store::Store;
/// use std::path::Path;
///
/// let store = Store::open(Path::new("site_data"))?;
/// store.transaction(|txn| {
///     txn.put_row(key, payload, revision);
///     Ok(())
/// })?;
/// ```
///
/// # In-Memory Stores
///
/// For testing, use `Store::open_in_memory()`.
pub struct Store {
    /// Store directory (holds the lock). None for in-memory stores.
    dir: Option<StoreDir>,
    /// Commit journal.
    journal: Journal,
    /// Current state. The write lock serializes transactions.
    state: RwLock<StoreState>,
}

impl Store {
    /// Opens a store at the given directory, creating it if missing.
    ///
    /// Recovery runs before this returns: the snapshot is loaded, the
    /// journal replayed, and any torn tail from a crash dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process has the store open,
    /// or a corruption error if snapshot or journal fail verification.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    /// Opens a store with explicit options.
    pub fn open_with_options(path: &Path, options: StoreOptions) -> StoreResult<Self> {
        let store_dir = StoreDir::open(path)?;

        let mut state = match store_dir.read_snapshot()? {
            Some(data) => decode_snapshot(&data)?,
            None => StoreState::default(),
        };

        let backend = FileBackend::open(&store_dir.journal_path())?;
        let journal = Journal::new(Box::new(backend), options.sync_on_commit);

        let report = journal.replay(|ops| {
            for op in ops {
                state.apply(op);
            }
            Ok(())
        })?;

        if report.has_torn_tail() {
            warn!(
                "dropping torn journal tail at {:?}: {} bytes after offset {}",
                path, report.torn_bytes, report.valid_len
            );
            journal.truncate(report.valid_len)?;
        }

        debug!(
            "opened store at {:?}: {} frames, {} ops replayed",
            path, report.frames, report.ops
        );

        Ok(Self {
            dir: Some(store_dir),
            journal,
            state: RwLock::new(state),
        })
    }

    /// Opens a fresh non-persistent store for testing.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            dir: None,
            journal: Journal::new(Box::new(InMemoryBackend::new()), false),
            state: RwLock::new(StoreState::default()),
        })
    }

    /// Executes `f` within a transaction.
    ///
    /// If `f` returns `Ok`, the staged operations are appended to the
    /// journal as one frame and applied; on `Err` nothing is kept. The
    /// store state only ever reflects whole transactions.
    pub fn transaction<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Txn<'_>) -> StoreResult<T>,
    {
        let mut state = self.state.write();
        let mut txn = Txn::new(&state);
        let value = f(&mut txn)?;
        let ops = txn.into_ops();

        if !ops.is_empty() {
            self.journal.append(&ops)?;
            for op in &ops {
                state.apply(op);
            }
        }
        Ok(value)
    }

    /// Returns the current version of a row, tombstones included.
    #[must_use]
    pub fn row(&self, entity: &EntityKey) -> Option<RowState> {
        self.state.read().rows.get(entity).cloned()
    }

    /// Returns the current download watermark.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.state.read().watermark
    }

    /// Returns all outbox records in ID (and therefore capture) order.
    #[must_use]
    pub fn outbox_records(&self) -> Vec<ChangeRecord> {
        self.state.read().outbox.values().cloned().collect()
    }

    /// Returns the next outbox record ID to allocate.
    #[must_use]
    pub fn next_record_id(&self) -> RecordId {
        self.state.read().next_record_id
    }

    /// Returns the highest revision stamp across all rows and outbox
    /// records, tombstones included, or zero for an empty store.
    ///
    /// Change trackers seed their stamping clock from this after a reopen
    /// so that revisions stay non-decreasing even if the wall clock moved
    /// backwards while the store was closed. Outbox stamps count too: a
    /// delete-wins merge can leave a row revision below a pending record's
    /// origin timestamp.
    #[must_use]
    pub fn latest_revision(&self) -> Timestamp {
        let state = self.state.read();
        let rows = state.rows.values().map(|row| row.revision);
        let outbox = state.outbox.values().map(|record| record.origin_ts);
        rows.chain(outbox)
            .max()
            .unwrap_or(Timestamp::from_millis(0))
    }

    /// Returns row, outbox, and journal counters.
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let state = self.state.read();
        let tombstones = state.rows.values().filter(|r| r.deleted).count();
        let pending = state
            .outbox
            .values()
            .filter(|r| r.state == RecordState::Pending)
            .count();
        Ok(StoreStats {
            live_rows: state.rows.len() - tombstones,
            tombstones,
            pending_outbox: pending,
            flushed_outbox: state.outbox.len() - pending,
            watermark: state.watermark,
            journal_bytes: self.journal.size()?,
        })
    }

    /// Folds the journal into the snapshot and truncates it.
    ///
    /// The snapshot is written and made durable before the journal is
    /// cleared. A crash between the two leaves both files; replaying the
    /// journal over the fresh snapshot reproduces the same state.
    pub fn checkpoint(&self) -> StoreResult<()> {
        let state = self.state.read();

        if let Some(store_dir) = &self.dir {
            let snapshot = encode_snapshot(&state)?;
            store_dir.write_snapshot(&snapshot)?;
            debug!(
                "checkpoint wrote snapshot: {} rows, {} outbox records",
                state.rows.len(),
                state.outbox.len()
            );
        }
        self.journal.clear()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("persistent", &self.dir.is_some())
            .finish_non_exhaustive()
    }
}

/// An in-flight transaction.
///
/// Mutations are staged and only become visible when the closure passed to
/// [`Store::transaction`] returns `Ok`. Reads within the transaction see
/// staged writes.
pub struct Txn<'a> {
    base: &'a StoreState,
    ops: Vec<JournalOp>,
    rows: BTreeMap<EntityKey, RowState>,
    outbox: BTreeMap<RecordId, Option<ChangeRecord>>,
    watermark: Option<Watermark>,
    next_record_id: Option<RecordId>,
}

impl<'a> Txn<'a> {
    fn new(base: &'a StoreState) -> Self {
        Self {
            base,
            ops: Vec::new(),
            rows: BTreeMap::new(),
            outbox: BTreeMap::new(),
            watermark: None,
            next_record_id: None,
        }
    }

    fn into_ops(self) -> Vec<JournalOp> {
        self.ops
    }

    /// Stages an insert or update of a business row.
    pub fn put_row(&mut self, entity: EntityKey, payload: FieldMap, revision: Timestamp) {
        self.rows
            .insert(entity.clone(), RowState::live(revision, payload.clone()));
        self.ops.push(JournalOp::PutRow {
            entity,
            payload,
            revision,
        });
    }

    /// Stages a deletion, leaving a tombstone at `revision`.
    pub fn delete_row(&mut self, entity: EntityKey, revision: Timestamp) {
        self.rows
            .insert(entity.clone(), RowState::tombstone(revision));
        self.ops.push(JournalOp::DeleteRow { entity, revision });
    }

    /// Reads a row, observing writes staged in this transaction.
    #[must_use]
    pub fn row(&self, entity: &EntityKey) -> Option<RowState> {
        if let Some(state) = self.rows.get(entity) {
            return Some(state.clone());
        }
        self.base.rows.get(entity).cloned()
    }

    /// Stages an outbox append.
    pub fn put_outbox(&mut self, record: ChangeRecord) {
        self.outbox.insert(record.id, Some(record.clone()));
        self.ops.push(JournalOp::PutOutbox { record });
    }

    /// Stages an outbox state change.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOperation`] if the record does not exist.
    pub fn mark_outbox(&mut self, id: RecordId, state: RecordState) -> StoreResult<()> {
        let mut record = self.outbox_get(id).ok_or_else(|| {
            StoreError::invalid_operation(format!("unknown outbox record {id}"))
        })?;
        record.state = state;
        self.outbox.insert(id, Some(record));
        self.ops.push(JournalOp::MarkOutbox { id, state });
        Ok(())
    }

    /// Stages removal of an outbox record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidOperation`] if the record does not exist.
    pub fn remove_outbox(&mut self, id: RecordId) -> StoreResult<()> {
        if self.outbox_get(id).is_none() {
            return Err(StoreError::invalid_operation(format!(
                "unknown outbox record {id}"
            )));
        }
        self.outbox.insert(id, None);
        self.ops.push(JournalOp::RemoveOutbox { id });
        Ok(())
    }

    fn outbox_get(&self, id: RecordId) -> Option<ChangeRecord> {
        if let Some(staged) = self.outbox.get(&id) {
            return staged.clone();
        }
        self.base.outbox.get(&id).cloned()
    }

    /// Stages a watermark advance.
    pub fn set_watermark(&mut self, watermark: Watermark) {
        self.watermark = Some(watermark);
        self.ops.push(JournalOp::SetWatermark { watermark });
    }

    /// Reads the watermark, observing a staged advance.
    #[must_use]
    pub fn watermark(&self) -> Watermark {
        self.watermark.unwrap_or(self.base.watermark)
    }

    /// Stages the next outbox record ID.
    pub fn set_next_record_id(&mut self, id: RecordId) {
        self.next_record_id = Some(id);
        self.ops.push(JournalOp::SetNextRecordId { id });
    }

    /// Reads the next outbox record ID, observing a staged value.
    #[must_use]
    pub fn next_record_id(&self) -> RecordId {
        self.next_record_id.unwrap_or(self.base.next_record_id)
    }
}

/// Findings from a read-only look at a store directory.
///
/// Produced without taking the store lock, so it can run against a store
/// that is open elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectReport {
    /// Whether a snapshot file is present.
    pub snapshot_present: bool,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Complete frames found in the journal.
    pub frames: u64,
    /// Operations across those frames.
    pub ops: u64,
    /// Bytes of torn tail after the last complete frame.
    pub torn_bytes: u64,
    /// Corruption found before the tail, if any.
    pub corruption: Option<String>,
    /// Live rows after applying snapshot plus journal.
    pub live_rows: usize,
    /// Tombstoned rows.
    pub tombstones: usize,
    /// Pending outbox records.
    pub pending_outbox: usize,
    /// Flushed outbox records.
    pub flushed_outbox: usize,
    /// Download watermark.
    pub watermark: Watermark,
}

impl InspectReport {
    /// Returns `true` if snapshot and journal verified cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.corruption.is_none() && self.torn_bytes == 0
    }
}

/// Examines a store directory without opening or locking it.
///
/// # Errors
///
/// Returns an error for I/O failures or an undecodable snapshot. Journal
/// damage is reported in the result rather than failing the call.
pub fn inspect(path: &Path) -> StoreResult<InspectReport> {
    let snapshot = dir::read_snapshot_at(path)?;
    let snapshot_present = snapshot.is_some();
    let mut state = match snapshot {
        Some(data) => decode_snapshot(&data)?,
        None => StoreState::default(),
    };

    let mut frames = 0u64;
    let mut ops = 0u64;
    let mut torn_bytes = 0u64;
    let mut journal_bytes = 0u64;
    let mut corruption = None;

    let journal_file = dir::journal_path_of(path);
    if journal_file.exists() {
        let backend = FileBackend::open(&journal_file)?;
        let journal = Journal::new(Box::new(backend), false);
        journal_bytes = journal.size()?;

        let replay = journal.replay(|frame_ops| {
            frames += 1;
            ops += frame_ops.len() as u64;
            for op in frame_ops {
                state.apply(op);
            }
            Ok(())
        });
        match replay {
            Ok(report) => torn_bytes = report.torn_bytes,
            Err(StoreError::JournalCorruption { message }) => corruption = Some(message),
            Err(e) => return Err(e),
        }
    }

    let tombstones = state.rows.values().filter(|r| r.deleted).count();
    let pending = state
        .outbox
        .values()
        .filter(|r| r.state == RecordState::Pending)
        .count();

    Ok(InspectReport {
        snapshot_present,
        journal_bytes,
        frames,
        ops,
        torn_bytes,
        corruption,
        live_rows: state.rows.len() - tombstones,
        tombstones,
        pending_outbox: pending,
        flushed_outbox: state.outbox.len() - pending,
        watermark: state.watermark,
    })
}

/// Encodes the state as a snapshot file image.
fn encode_snapshot(state: &StoreState) -> StoreResult<Vec<u8>> {
    let body = wire::encode(state)?;
    let len = u32::try_from(body.len()).map_err(|_| {
        StoreError::invalid_operation(format!("snapshot too large: {} bytes", body.len()))
    })?;

    let mut data = Vec::with_capacity(SNAPSHOT_HEADER_SIZE + body.len() + CRC_SIZE);
    data.extend_from_slice(&SNAPSHOT_MAGIC);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(&body);

    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Decodes and verifies a snapshot file image.
fn decode_snapshot(data: &[u8]) -> StoreResult<StoreState> {
    if data.len() < SNAPSHOT_HEADER_SIZE + CRC_SIZE {
        return Err(StoreError::snapshot_corruption(format!(
            "snapshot too short: {} bytes",
            data.len()
        )));
    }
    if data[0..4] != SNAPSHOT_MAGIC {
        return Err(StoreError::snapshot_corruption("invalid magic"));
    }

    let version = u16::from_le_bytes([data[4], data[5]]);
    if version > SNAPSHOT_VERSION {
        return Err(StoreError::snapshot_corruption(format!(
            "unsupported version {version}"
        )));
    }

    let body_len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
    let body_end = SNAPSHOT_HEADER_SIZE + body_len;
    if data.len() != body_end + CRC_SIZE {
        return Err(StoreError::snapshot_corruption(format!(
            "length mismatch: header says {} body bytes, file has {}",
            body_len,
            data.len() - SNAPSHOT_HEADER_SIZE - CRC_SIZE
        )));
    }

    let stored_crc = u32::from_le_bytes([
        data[body_end],
        data[body_end + 1],
        data[body_end + 2],
        data[body_end + 3],
    ]);
    let computed_crc = compute_crc32(&data[..body_end]);
    if stored_crc != computed_crc {
        return Err(StoreError::snapshot_corruption(format!(
            "checksum mismatch: stored {stored_crc:#010x}, computed {computed_crc:#010x}"
        )));
    }

    wire::decode(&data[SNAPSHOT_HEADER_SIZE..body_end])
        .map_err(|e| StoreError::snapshot_corruption(format!("undecodable body: {e}")))
}
