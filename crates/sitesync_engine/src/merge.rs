//! The merge engine: folding downloaded batches into the local store.
//!
//! One batch is one store transaction. Rows, tombstones, and the advanced
//! watermark commit together or not at all, so a crash mid-merge never
//! leaves the watermark claiming changes that were not applied. Re-applying
//! a batch is harmless: every decision compares the remote change's origin
//! timestamp against the row revision the previous apply wrote.

use crate::error::{SyncError, SyncResult};
use sitesync_protocol::{resolve, EntityKey, RemoteChange, Watermark};
use sitesync_store::Store;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Counters from one applied batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Remote changes written to the store.
    pub applied: usize,
    /// Remote changes dropped because the local version won.
    pub skipped: usize,
    /// Changes that touched an entity with pending local records.
    pub contested: usize,
    /// The watermark the batch committed.
    pub watermark: Watermark,
}

/// Applies consolidated batches to the local store.
pub struct MergeEngine {
    store: Arc<Store>,
}

impl MergeEngine {
    /// Creates a merge engine over a shared store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Applies one downloaded batch and advances the watermark, atomically.
    ///
    /// `pending` is the set of entities with unpushed local records; changes
    /// touching them are counted as contested. Resolution itself is the
    /// shared [`resolve`] policy against the current row, whether or not the
    /// entity is contested.
    ///
    /// A malformed change fails the whole batch before anything is written,
    /// and the error names the offending entity. The watermark never moves
    /// backwards; a hub answering with a smaller one is a protocol error.
    pub fn apply_batch(
        &self,
        changes: &[RemoteChange],
        new_watermark: Watermark,
        pending: &BTreeSet<EntityKey>,
    ) -> SyncResult<MergeOutcome> {
        for change in changes {
            if !change.shape_ok() {
                let message = if change.op.is_delete() {
                    "delete carries a payload"
                } else {
                    "upsert without payload"
                };
                return Err(SyncError::merge_failed(&change.entity, message));
            }
        }

        let current = self.store.watermark();
        if new_watermark < current {
            return Err(SyncError::Protocol(format!(
                "watermark regression: hub sent {new_watermark}, store is at {current}"
            )));
        }

        let mut applied = 0usize;
        let mut skipped = 0usize;
        let mut contested = 0usize;

        self.store.transaction(|txn| {
            for change in changes {
                if pending.contains(&change.entity) {
                    contested += 1;
                    debug!(
                        "contested entity {}: pending local records vs remote {}",
                        change.entity, change.origin_ts
                    );
                }

                let remote_wins = match txn.row(&change.entity) {
                    Some(row) => resolve(&row.to_version(), change).remote_wins(),
                    None => true,
                };

                if remote_wins {
                    if change.op.is_delete() {
                        txn.delete_row(change.entity.clone(), change.origin_ts);
                    } else if let Some(payload) = &change.payload {
                        txn.put_row(change.entity.clone(), payload.clone(), change.origin_ts);
                    }
                    applied += 1;
                } else {
                    skipped += 1;
                }
            }
            txn.set_watermark(new_watermark);
            Ok(())
        })?;

        info!(
            "merged batch: {} applied, {} kept local, {} contested, watermark {}",
            applied, skipped, contested, new_watermark
        );
        Ok(MergeOutcome {
            applied,
            skipped,
            contested,
            watermark: new_watermark,
        })
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesync_protocol::{EntityId, FieldMap, FieldValue, Operation, Timestamp};

    fn key(n: u8) -> EntityKey {
        EntityKey::new("task", EntityId::from_bytes([n; 16]))
    }

    fn payload(title: &str) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("title".to_string(), FieldValue::from(title));
        map
    }

    fn upsert(n: u8, ts: u64, title: &str) -> RemoteChange {
        RemoteChange::upsert(
            key(n),
            Operation::Update,
            payload(title),
            Timestamp::from_millis(ts),
        )
    }

    fn engine() -> (Arc<Store>, MergeEngine) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let engine = MergeEngine::new(Arc::clone(&store));
        (store, engine)
    }

    fn seed_row(store: &Store, n: u8, ts: u64, title: &str) {
        store
            .transaction(|txn| {
                txn.put_row(key(n), payload(title), Timestamp::from_millis(ts));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn fresh_entities_apply_directly() {
        let (store, engine) = engine();
        let outcome = engine
            .apply_batch(
                &[upsert(1, 100, "alpha"), upsert(2, 100, "beta")],
                Watermark::new(2),
                &BTreeSet::new(),
            )
            .unwrap();

        assert_eq!(outcome.applied, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(store.watermark(), Watermark::new(2));
        let row = store.row(&key(1)).unwrap();
        assert_eq!(row.revision, Timestamp::from_millis(100));
        assert_eq!(row.payload, Some(payload("alpha")));
    }

    #[test]
    fn stale_remote_keeps_local_but_advances_watermark() {
        let (store, engine) = engine();
        seed_row(&store, 1, 200, "local");

        let outcome = engine
            .apply_batch(&[upsert(1, 100, "stale")], Watermark::new(1), &BTreeSet::new())
            .unwrap();

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(store.row(&key(1)).unwrap().payload, Some(payload("local")));
        assert_eq!(store.watermark(), Watermark::new(1));
    }

    #[test]
    fn newer_remote_overwrites_local() {
        let (store, engine) = engine();
        seed_row(&store, 1, 100, "local");

        engine
            .apply_batch(&[upsert(1, 200, "remote")], Watermark::new(1), &BTreeSet::new())
            .unwrap();

        let row = store.row(&key(1)).unwrap();
        assert_eq!(row.revision, Timestamp::from_millis(200));
        assert_eq!(row.payload, Some(payload("remote")));
    }

    #[test]
    fn timestamp_tie_goes_to_remote() {
        let (store, engine) = engine();
        seed_row(&store, 1, 150, "local");

        engine
            .apply_batch(&[upsert(1, 150, "remote")], Watermark::new(1), &BTreeSet::new())
            .unwrap();

        assert_eq!(store.row(&key(1)).unwrap().payload, Some(payload("remote")));
    }

    #[test]
    fn remote_delete_beats_newer_local_row() {
        let (store, engine) = engine();
        seed_row(&store, 1, 500, "local");

        let outcome = engine
            .apply_batch(
                &[RemoteChange::delete(key(1), Timestamp::from_millis(100))],
                Watermark::new(1),
                &BTreeSet::new(),
            )
            .unwrap();

        assert_eq!(outcome.applied, 1);
        assert!(store.row(&key(1)).unwrap().deleted);
    }

    #[test]
    fn local_tombstone_defends_against_remote_upsert() {
        let (store, engine) = engine();
        store
            .transaction(|txn| {
                txn.delete_row(key(1), Timestamp::from_millis(100));
                Ok(())
            })
            .unwrap();

        let outcome = engine
            .apply_batch(&[upsert(1, 500, "resurrect")], Watermark::new(1), &BTreeSet::new())
            .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert!(store.row(&key(1)).unwrap().deleted);
    }

    #[test]
    fn explicit_insert_resurrects_local_tombstone() {
        let (store, engine) = engine();
        store
            .transaction(|txn| {
                txn.delete_row(key(1), Timestamp::from_millis(100));
                Ok(())
            })
            .unwrap();

        let insert = RemoteChange::upsert(
            key(1),
            Operation::Insert,
            payload("new life"),
            Timestamp::from_millis(200),
        );
        let outcome = engine
            .apply_batch(&[insert], Watermark::new(1), &BTreeSet::new())
            .unwrap();

        assert_eq!(outcome.applied, 1);
        let row = store.row(&key(1)).unwrap();
        assert!(!row.deleted);
        assert_eq!(row.payload, Some(payload("new life")));
        assert_eq!(row.revision, Timestamp::from_millis(200));
    }

    #[test]
    fn delete_for_unseen_entity_records_a_tombstone() {
        let (store, engine) = engine();

        engine
            .apply_batch(
                &[RemoteChange::delete(key(7), Timestamp::from_millis(40))],
                Watermark::new(1),
                &BTreeSet::new(),
            )
            .unwrap();

        let row = store.row(&key(7)).unwrap();
        assert!(row.deleted);
        assert_eq!(row.revision, Timestamp::from_millis(40));
    }

    #[test]
    fn contested_entities_are_counted() {
        let (store, engine) = engine();
        seed_row(&store, 1, 100, "local pending");
        let pending: BTreeSet<EntityKey> = [key(1)].into_iter().collect();

        let outcome = engine
            .apply_batch(
                &[upsert(1, 200, "remote"), upsert(2, 200, "uncontested")],
                Watermark::new(2),
                &pending,
            )
            .unwrap();

        assert_eq!(outcome.contested, 1);
        assert_eq!(outcome.applied, 2);
    }

    #[test]
    fn malformed_change_rolls_back_the_whole_batch() {
        let (store, engine) = engine();
        let bad = RemoteChange {
            entity: key(2),
            op: Operation::Update,
            payload: None,
            origin_ts: Timestamp::from_millis(100),
        };

        let err = engine
            .apply_batch(
                &[upsert(1, 100, "good"), bad],
                Watermark::new(2),
                &BTreeSet::new(),
            )
            .unwrap_err();

        match err {
            SyncError::Merge { entity, .. } => assert!(entity.starts_with("task/")),
            other => panic!("expected merge error, got {other}"),
        }
        assert!(store.row(&key(1)).is_none());
        assert_eq!(store.watermark(), Watermark::ORIGIN);
    }

    #[test]
    fn watermark_regression_is_refused() {
        let (store, engine) = engine();
        store
            .transaction(|txn| {
                txn.set_watermark(Watermark::new(10));
                Ok(())
            })
            .unwrap();

        let err = engine
            .apply_batch(&[], Watermark::new(5), &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(store.watermark(), Watermark::new(10));
    }

    #[test]
    fn reapplying_a_batch_is_idempotent() {
        let (store, engine) = engine();
        let batch = vec![
            upsert(1, 100, "alpha"),
            RemoteChange::delete(key(2), Timestamp::from_millis(120)),
        ];

        let first = engine
            .apply_batch(&batch, Watermark::new(2), &BTreeSet::new())
            .unwrap();
        let row_after_first = store.row(&key(1)).unwrap();

        let second = engine
            .apply_batch(&batch, Watermark::new(2), &BTreeSet::new())
            .unwrap();
        assert_eq!(second.applied, first.applied);
        assert_eq!(store.row(&key(1)).unwrap(), row_after_first);
        assert!(store.row(&key(2)).unwrap().deleted);
        assert_eq!(store.watermark(), Watermark::new(2));
    }

    #[test]
    fn empty_batch_still_advances_the_watermark() {
        let (store, engine) = engine();
        let outcome = engine
            .apply_batch(&[], Watermark::new(9), &BTreeSet::new())
            .unwrap();
        assert_eq!(outcome.applied, 0);
        assert_eq!(store.watermark(), Watermark::new(9));
    }
}
