//! Conflict resolution policy.
//!
//! One pure function decides every conflict, and both ends run it: sites
//! while merging downloaded batches, the hub while maintaining its entity
//! version view. The rules, in order:
//!
//! 1. A remote **delete always wins**, whatever the timestamps. A
//!    concurrent update never resurrects a deleted entity.
//! 2. A local tombstone beats a remote update, and beats a remote insert
//!    stamped before the delete. An insert stamped at or after the delete
//!    goes through: an explicit new insert is the one sanctioned un-delete
//!    path.
//! 3. Otherwise **last-writer-wins** on origin timestamp, and a tie goes to
//!    the **remote** side: the hub is authoritative, so preferring its copy
//!    on equal timestamps makes every site converge to the same version
//!    without consulting anything beyond the two inputs.
//!
//! There is no payload-level merging; the winner's payload is taken whole.

use crate::payload::FieldMap;
use crate::record::RemoteChange;
use crate::types::Timestamp;

/// The local claim for an entity at resolution time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVersion {
    /// Origin timestamp of the last local write to this entity.
    pub revision: Timestamp,
    /// Whether the local state is a tombstone.
    pub deleted: bool,
    /// Local payload; `None` for a tombstone.
    pub payload: Option<FieldMap>,
}

impl LocalVersion {
    /// A live local row.
    #[must_use]
    pub fn live(revision: Timestamp, payload: FieldMap) -> Self {
        Self {
            revision,
            deleted: false,
            payload: Some(payload),
        }
    }

    /// A local tombstone.
    #[must_use]
    pub fn tombstone(revision: Timestamp) -> Self {
        Self {
            revision,
            deleted: true,
            payload: None,
        }
    }
}

/// Which side a conflict resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    /// The local version stands; the remote change is not applied.
    Local,
    /// The remote change is applied over the local version.
    Remote,
}

/// The outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictDecision {
    /// The winning side.
    pub winner: Winner,
    /// The winning payload; `None` means the resolved state is deletion.
    pub resolved_payload: Option<FieldMap>,
}

impl ConflictDecision {
    /// Returns true when the remote change won.
    #[must_use]
    pub fn remote_wins(&self) -> bool {
        self.winner == Winner::Remote
    }
}

/// Resolves a conflict between the local version of an entity and a remote
/// change addressing the same entity.
///
/// Pure and deterministic: the decision depends on nothing but the two
/// arguments, so any two replicas resolving the same pair agree.
#[must_use]
pub fn resolve(local: &LocalVersion, remote: &RemoteChange) -> ConflictDecision {
    if remote.op.is_delete() {
        return ConflictDecision {
            winner: Winner::Remote,
            resolved_payload: None,
        };
    }

    if local.deleted {
        // Only an explicit insert stamped at or after the delete brings an
        // entity back. An insert stamped earlier was made in ignorance of
        // the delete and loses to it like any other concurrent write.
        if remote.op.is_insert() && remote.origin_ts >= local.revision {
            return ConflictDecision {
                winner: Winner::Remote,
                resolved_payload: remote.payload.clone(),
            };
        }
        return ConflictDecision {
            winner: Winner::Local,
            resolved_payload: None,
        };
    }

    if remote.origin_ts >= local.revision {
        ConflictDecision {
            winner: Winner::Remote,
            resolved_payload: remote.payload.clone(),
        }
    } else {
        ConflictDecision {
            winner: Winner::Local,
            resolved_payload: local.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{fields, FieldValue};
    use crate::record::Operation;
    use crate::types::{EntityId, EntityKey};

    fn key() -> EntityKey {
        EntityKey::new("inventory", EntityId::from_bytes([1u8; 16]))
    }

    fn payload(v: i64) -> FieldMap {
        fields([("qty", FieldValue::Integer(v))])
    }

    fn remote_update(ts: u64, v: i64) -> RemoteChange {
        RemoteChange::upsert(key(), Operation::Update, payload(v), Timestamp::from_millis(ts))
    }

    fn remote_insert(ts: u64, v: i64) -> RemoteChange {
        RemoteChange::upsert(key(), Operation::Insert, payload(v), Timestamp::from_millis(ts))
    }

    #[test]
    fn newer_remote_wins() {
        let local = LocalVersion::live(Timestamp::from_millis(100), payload(1));
        let decision = resolve(&local, &remote_update(200, 2));
        assert_eq!(decision.winner, Winner::Remote);
        assert_eq!(decision.resolved_payload, Some(payload(2)));
    }

    #[test]
    fn newer_local_wins() {
        let local = LocalVersion::live(Timestamp::from_millis(300), payload(1));
        let decision = resolve(&local, &remote_update(200, 2));
        assert_eq!(decision.winner, Winner::Local);
        assert_eq!(decision.resolved_payload, Some(payload(1)));
    }

    #[test]
    fn tie_goes_to_remote() {
        let local = LocalVersion::live(Timestamp::from_millis(200), payload(1));
        let decision = resolve(&local, &remote_update(200, 2));
        assert_eq!(decision.winner, Winner::Remote);
        assert_eq!(decision.resolved_payload, Some(payload(2)));
    }

    #[test]
    fn remote_delete_beats_newer_local_update() {
        let local = LocalVersion::live(Timestamp::from_millis(500), payload(1));
        let remote = RemoteChange::delete(key(), Timestamp::from_millis(100));
        let decision = resolve(&local, &remote);
        assert_eq!(decision.winner, Winner::Remote);
        assert_eq!(decision.resolved_payload, None);
    }

    #[test]
    fn local_tombstone_beats_newer_remote_update() {
        let local = LocalVersion::tombstone(Timestamp::from_millis(100));
        let decision = resolve(&local, &remote_update(500, 2));
        assert_eq!(decision.winner, Winner::Local);
        assert_eq!(decision.resolved_payload, None);
    }

    #[test]
    fn explicit_insert_resurrects_tombstone() {
        let local = LocalVersion::tombstone(Timestamp::from_millis(100));
        let decision = resolve(&local, &remote_insert(200, 7));
        assert_eq!(decision.winner, Winner::Remote);
        assert_eq!(decision.resolved_payload, Some(payload(7)));
    }

    #[test]
    fn insert_stamped_before_the_delete_stays_dead() {
        let local = LocalVersion::tombstone(Timestamp::from_millis(100));
        let decision = resolve(&local, &remote_insert(50, 7));
        assert_eq!(decision.winner, Winner::Local);
        assert_eq!(decision.resolved_payload, None);
    }

    #[test]
    fn remote_delete_over_local_tombstone_still_deletes() {
        let local = LocalVersion::tombstone(Timestamp::from_millis(100));
        let remote = RemoteChange::delete(key(), Timestamp::from_millis(50));
        let decision = resolve(&local, &remote);
        assert_eq!(decision.resolved_payload, None);
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        fn arb_local() -> impl Strategy<Value = LocalVersion> {
            (0u64..10_000, any::<bool>(), -100i64..100).prop_map(|(ts, deleted, v)| {
                if deleted {
                    LocalVersion::tombstone(Timestamp::from_millis(ts))
                } else {
                    LocalVersion::live(Timestamp::from_millis(ts), payload(v))
                }
            })
        }

        fn arb_remote() -> impl Strategy<Value = RemoteChange> {
            (0u64..10_000, 0u8..3, -100i64..100).prop_map(|(ts, op, v)| match op {
                0 => RemoteChange::delete(key(), Timestamp::from_millis(ts)),
                1 => remote_update(ts, v),
                _ => remote_insert(ts, v),
            })
        }

        proptest! {
            // A remote delete resolves to deletion, whatever the local side.
            #[test]
            fn remote_deletes_always_win(local in arb_local(), remote in arb_remote()) {
                prop_assume!(remote.op.is_delete());
                let decision = resolve(&local, &remote);
                prop_assert_eq!(decision.winner, Winner::Remote);
                prop_assert_eq!(decision.resolved_payload, None);
            }

            // A tombstone yields only to an insert stamped at or after it.
            #[test]
            fn tombstones_yield_only_to_later_inserts(local in arb_local(), remote in arb_remote()) {
                prop_assume!(local.deleted && !remote.op.is_delete());
                let decision = resolve(&local, &remote);
                if remote.op.is_insert() && remote.origin_ts >= local.revision {
                    prop_assert_eq!(decision.winner, Winner::Remote);
                    prop_assert_eq!(decision.resolved_payload, remote.payload);
                } else {
                    prop_assert_eq!(decision.winner, Winner::Local);
                    prop_assert_eq!(decision.resolved_payload, None);
                }
            }

            // Without deletes the decision is last-writer-wins, remote on ties.
            #[test]
            fn upserts_follow_timestamps(local in arb_local(), remote in arb_remote()) {
                prop_assume!(!remote.op.is_delete() && !local.deleted);
                let decision = resolve(&local, &remote);
                if remote.origin_ts >= local.revision {
                    prop_assert_eq!(decision.winner, Winner::Remote);
                    prop_assert_eq!(decision.resolved_payload, remote.payload);
                } else {
                    prop_assert_eq!(decision.winner, Winner::Local);
                    prop_assert_eq!(decision.resolved_payload, local.payload);
                }
            }

            // The resolved payload is always one of the two inputs.
            #[test]
            fn no_payload_invention(local in arb_local(), remote in arb_remote()) {
                let decision = resolve(&local, &remote);
                let from_inputs = decision.resolved_payload.is_none()
                    || decision.resolved_payload == local.payload
                    || decision.resolved_payload == remote.payload;
                prop_assert!(from_inputs);
            }
        }
    }
}
