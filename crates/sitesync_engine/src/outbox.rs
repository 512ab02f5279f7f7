//! The change tracker: durable capture of local mutations.
//!
//! Every local write goes through [`ChangeTracker::record`], which commits
//! the business row and its outbox record in one store transaction. A crash
//! can therefore never leave a change that the outbox does not know about,
//! or an outbox record whose row write was lost.
//!
//! ## Key Invariants
//!
//! - Capture is serialized: record ids are strictly increasing and append
//!   order equals id order.
//! - Origin timestamps are non-decreasing in id order, even when the wall
//!   clock steps backwards. The clock is seeded from the store's highest
//!   revision stamp on construction, so the guarantee survives a restart.
//! - Records stay `Pending` until an upload receipt names their id, and
//!   stay in the outbox as `Flushed` until compaction removes them.

use crate::error::SyncResult;
use parking_lot::Mutex;
use sitesync_protocol::{
    ChangeRecord, EntityKey, LocalChange, Operation, RecordId, RecordState, Timestamp,
};
use sitesync_store::{Store, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Captures local changes into the durable outbox.
pub struct ChangeTracker {
    store: Arc<Store>,
    // Held across the whole append: serializes capture and keeps origin
    // timestamps non-decreasing in record-id order.
    clock: Mutex<Timestamp>,
}

impl ChangeTracker {
    /// Creates a tracker over a shared store.
    pub fn new(store: Arc<Store>) -> Self {
        let seed = store.latest_revision();
        Self {
            store,
            clock: Mutex::new(seed),
        }
    }

    /// Records one local change: stamps it, applies it to the business row,
    /// and appends it to the outbox, all in one transaction.
    pub fn record(&self, change: LocalChange) -> SyncResult<ChangeRecord> {
        let mut clock = self.clock.lock();
        let now = Timestamp::now();
        let origin_ts = if now > *clock { now } else { *clock };
        *clock = origin_ts;

        let record = self.store.transaction(move |txn| {
            let id = txn.next_record_id();
            txn.set_next_record_id(RecordId::new(id.as_u64() + 1));

            let record = ChangeRecord::from_change(id, change, origin_ts);
            match (&record.payload, record.op) {
                (_, Operation::Delete) => txn.delete_row(record.entity.clone(), origin_ts),
                (Some(payload), _) => {
                    txn.put_row(record.entity.clone(), payload.clone(), origin_ts);
                }
                (None, op) => {
                    // Unreachable through LocalChange's constructors.
                    return Err(StoreError::invalid_operation(format!(
                        "{} change for {} carries no payload",
                        op.as_str(),
                        record.entity
                    )));
                }
            }
            txn.put_outbox(record.clone());
            Ok(record)
        })?;

        debug!(
            "recorded {} {} as {}",
            record.op.as_str(),
            record.entity,
            record.id
        );
        Ok(record)
    }

    /// Returns all pending records in capture order.
    #[must_use]
    pub fn pending_records(&self) -> Vec<ChangeRecord> {
        self.store
            .outbox_records()
            .into_iter()
            .filter(ChangeRecord::is_pending)
            .collect()
    }

    /// Returns the oldest pending records, at most `limit` of them.
    #[must_use]
    pub fn pending_batch(&self, limit: u32) -> Vec<ChangeRecord> {
        self.store
            .outbox_records()
            .into_iter()
            .filter(ChangeRecord::is_pending)
            .take(limit as usize)
            .collect()
    }

    /// Counts pending records.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_records().len()
    }

    /// Returns the set of entities with at least one pending record.
    ///
    /// The merge engine treats remote changes to these entities as
    /// contested: the site has unpushed edits of its own for them.
    #[must_use]
    pub fn pending_entities(&self) -> BTreeSet<EntityKey> {
        self.pending_records()
            .into_iter()
            .map(|record| record.entity)
            .collect()
    }

    /// Marks the given records as flushed after an upload receipt.
    ///
    /// Ids the outbox does not know are logged and skipped rather than
    /// failing the cycle; returns how many records were actually marked.
    pub fn mark_flushed(&self, ids: &[RecordId]) -> SyncResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let known: BTreeSet<RecordId> = self
            .store
            .outbox_records()
            .iter()
            .map(|record| record.id)
            .collect();
        let (found, unknown): (Vec<&RecordId>, Vec<&RecordId>) =
            ids.iter().partition(|id| known.contains(*id));
        if !unknown.is_empty() {
            warn!(
                "upload receipt named {} record(s) missing from the outbox, ignoring",
                unknown.len()
            );
        }

        self.store.transaction(|txn| {
            for id in &found {
                txn.mark_outbox(**id, RecordState::Flushed)?;
            }
            Ok(())
        })?;
        Ok(found.len())
    }

    /// Removes flushed records from the outbox; returns how many.
    pub fn compact_flushed(&self) -> SyncResult<usize> {
        let flushed: Vec<RecordId> = self
            .store
            .outbox_records()
            .iter()
            .filter(|record| !record.is_pending())
            .map(|record| record.id)
            .collect();
        if flushed.is_empty() {
            return Ok(0);
        }

        self.store.transaction(|txn| {
            for id in &flushed {
                txn.remove_outbox(*id)?;
            }
            Ok(())
        })?;
        debug!("compacted {} flushed outbox records", flushed.len());
        Ok(flushed.len())
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker").finish_non_exhaustive()
    }
}
