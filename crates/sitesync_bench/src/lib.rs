//! Shared data builders for SiteSync benchmarks.
//!
//! Everything here is deterministic so runs are comparable.

use sitesync_protocol::{
    ChangeRecord, EntityId, EntityKey, FieldMap, FieldValue, LocalChange, Operation, RecordId,
    RemoteChange, Timestamp,
};

/// Deterministic byte blob of the given size.
pub fn blob(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

/// A payload carrying one blob field of the given size.
pub fn payload(size: usize) -> FieldMap {
    let mut map = FieldMap::new();
    map.insert("data".to_string(), FieldValue::Bytes(blob(size)));
    map
}

/// A batch of entity keys in one type.
pub fn keys(count: usize) -> Vec<EntityKey> {
    (0..count)
        .map(|_| EntityKey::new("bench", EntityId::new()))
        .collect()
}

/// Pending upload records with ids starting at `first_id`.
pub fn records(first_id: u64, count: usize, payload_size: usize) -> Vec<ChangeRecord> {
    keys(count)
        .into_iter()
        .enumerate()
        .map(|(i, key)| {
            ChangeRecord::from_change(
                RecordId::new(first_id + i as u64),
                LocalChange::insert(key, payload(payload_size)),
                Timestamp::from_millis(1_700_000_000_000 + i as u64),
            )
        })
        .collect()
}

/// Remote inserts stamped with increasing timestamps.
pub fn remote_changes(count: usize, payload_size: usize) -> Vec<RemoteChange> {
    keys(count)
        .into_iter()
        .enumerate()
        .map(|(i, key)| {
            RemoteChange::upsert(
                key,
                Operation::Insert,
                payload(payload_size),
                Timestamp::from_millis(1_700_000_000_000 + i as u64),
            )
        })
        .collect()
}
