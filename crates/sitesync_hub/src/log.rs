//! The consolidated change log.
//!
//! Every record accepted from any site lands here, in arrival order, under
//! one hub-assigned sequence number. A download serves the suffix of this
//! log past the site's watermark, minus the site's own entries.
//!
//! ## Key Invariants
//!
//! - Sequence numbers are contiguous from 1; entry `seq` lives at index
//!   `seq - 1`.
//! - An already-consolidated record is re-acknowledged, never re-appended,
//!   so a site whose receipt was lost can upload again safely.
//! - The entity view applies the same conflict rules sites apply while
//!   merging, in the same order, so the hub and a fully caught-up site
//!   agree on every entity.

use crate::config::HubConfig;
use parking_lot::RwLock;
use sitesync_protocol::{
    resolve, wire, ChangeRecord, DownloadBatch, EntityKey, LocalVersion, RecordId, RejectedRecord,
    RemoteChange, SiteId, UploadReceipt, Watermark,
};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// One consolidated change and where it came from.
#[derive(Debug, Clone)]
struct LogEntry {
    seq: u64,
    origin: SiteId,
    change: RemoteChange,
}

struct LogState {
    /// Entries in consolidation order.
    entries: Vec<LogEntry>,
    /// Sequence number the next accepted record receives.
    next_seq: u64,
    /// Current version of every entity the log has seen.
    rows: BTreeMap<EntityKey, LocalVersion>,
    /// Records already consolidated, for idempotent re-uploads.
    seen: BTreeSet<(SiteId, RecordId)>,
}

/// The hub's ordered log of changes from every site.
pub struct ConsolidatedLog {
    state: RwLock<LogState>,
}

impl ConsolidatedLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LogState {
                entries: Vec::new(),
                next_seq: 1,
                rows: BTreeMap::new(),
                seen: BTreeSet::new(),
            }),
        }
    }

    /// Highest position in the log; [`Watermark::ORIGIN`] when empty.
    #[must_use]
    pub fn head(&self) -> Watermark {
        Watermark::new(self.state.read().next_seq - 1)
    }

    /// Number of consolidated entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Returns true if nothing has been consolidated yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Current version of one entity, tombstones included.
    #[must_use]
    pub fn entity(&self, key: &EntityKey) -> Option<LocalVersion> {
        self.state.read().rows.get(key).cloned()
    }

    /// Number of live entities in the view.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state
            .read()
            .rows
            .values()
            .filter(|row| !row.deleted)
            .count()
    }

    /// Consolidates one upload from a site.
    ///
    /// Records are taken in order. Each is either accepted, appended to the
    /// log and acknowledged by id, or rejected with a reason; one bad
    /// record never blocks the rest of the batch. A record the log already
    /// holds is acknowledged again without a second append.
    pub fn append(
        &self,
        origin: SiteId,
        records: &[ChangeRecord],
        config: &HubConfig,
    ) -> UploadReceipt {
        let mut state = self.state.write();
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();

        for record in records {
            if state.seen.contains(&(origin, record.id)) {
                debug!("record {} from {origin} already consolidated, re-acking", record.id);
                accepted.push(record.id);
                continue;
            }
            if let Some(reason) = validate(record, config) {
                debug!("rejecting record {} from {origin}: {reason}", record.id);
                rejected.push(RejectedRecord {
                    id: record.id,
                    reason,
                });
                continue;
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            let change = record.to_remote();

            let wins = match state.rows.get(&change.entity) {
                Some(current) => resolve(current, &change).remote_wins(),
                None => true,
            };
            if wins {
                if let Some(version) = version_after(&change) {
                    state.rows.insert(change.entity.clone(), version);
                }
            }

            state.entries.push(LogEntry {
                seq,
                origin,
                change,
            });
            state.seen.insert((origin, record.id));
            accepted.push(record.id);
        }

        UploadReceipt { accepted, rejected }
    }

    /// Serves the log suffix past `since` for one site.
    ///
    /// The site's own entries are skipped but still advance the returned
    /// watermark, so a site that only ever hears its own echoes still makes
    /// progress through the log. At most `limit` changes are returned;
    /// `has_more` tells the site to come back for the rest.
    #[must_use]
    pub fn changes_since(&self, site: SiteId, since: Watermark, limit: u32) -> DownloadBatch {
        let state = self.state.read();
        let start = usize::try_from(since.as_u64())
            .unwrap_or(usize::MAX)
            .min(state.entries.len());

        let mut changes = Vec::new();
        let mut watermark = since;
        let mut has_more = false;

        for entry in &state.entries[start..] {
            if changes.len() == limit as usize {
                has_more = true;
                break;
            }
            watermark = Watermark::new(entry.seq);
            if entry.origin == site {
                continue;
            }
            changes.push(entry.change.clone());
        }

        DownloadBatch {
            changes,
            watermark,
            has_more,
        }
    }
}

impl Default for ConsolidatedLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConsolidatedLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ConsolidatedLog")
            .field("entries", &state.entries.len())
            .field("head", &(state.next_seq - 1))
            .finish_non_exhaustive()
    }
}

/// Returns a rejection reason, or `None` for an acceptable record.
fn validate(record: &ChangeRecord, config: &HubConfig) -> Option<String> {
    match (&record.payload, record.op.is_delete()) {
        (Some(_), true) => Some("delete carries a payload".to_string()),
        (None, false) => Some(format!("{} without a payload", record.op.as_str())),
        (Some(payload), false) => match wire::encode(payload) {
            Ok(encoded) if encoded.len() > config.max_payload_bytes => Some(format!(
                "payload is {} bytes, limit {}",
                encoded.len(),
                config.max_payload_bytes
            )),
            Ok(_) => None,
            Err(_) => Some("payload not encodable".to_string()),
        },
        (None, true) => None,
    }
}

/// The entity version a winning change leaves behind.
fn version_after(change: &RemoteChange) -> Option<LocalVersion> {
    if change.op.is_delete() {
        Some(LocalVersion::tombstone(change.origin_ts))
    } else {
        change
            .payload
            .clone()
            .map(|payload| LocalVersion::live(change.origin_ts, payload))
    }
}
