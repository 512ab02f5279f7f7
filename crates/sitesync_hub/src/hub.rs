//! The hub: request handlers over the consolidated log.

use crate::config::HubConfig;
use crate::error::{HubError, HubResult};
use crate::log::ConsolidatedLog;
use parking_lot::RwLock;
use sitesync_protocol::{
    DownloadBatch, DownloadRequest, EntityKey, LocalVersion, ProbeRequest, ProbeResponse,
    Timestamp, UploadReceipt, UploadRequest, Watermark,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Traffic counters, kept since the hub started.
#[derive(Debug, Clone, Default)]
pub struct HubStats {
    /// Probes answered, accepted or refused.
    pub probes: u64,
    /// Probes refused over a protocol version mismatch.
    pub probes_refused: u64,
    /// Uploads consolidated.
    pub uploads: u64,
    /// Records accepted across all uploads.
    pub records_accepted: u64,
    /// Records rejected across all uploads.
    pub records_rejected: u64,
    /// Downloads served.
    pub downloads: u64,
    /// Changes served across all downloads.
    pub changes_served: u64,
}

/// The consolidation hub.
///
/// Handles probe, upload, and download requests from sites over one
/// shared [`ConsolidatedLog`]. The hub itself is transport-agnostic; an
/// embedding application exposes these handlers over HTTP or calls them
/// in process.
///
/// # Example
///
/// ```
/// use sitesync_hub::{Hub, HubConfig};
/// use sitesync_protocol::{ProbeRequest, SiteId};
///
/// let hub = Hub::new(HubConfig::default());
/// let probe = ProbeRequest::new(SiteId::from_bytes([1u8; 16]));
/// assert!(hub.handle_probe(&probe).ok);
/// ```
pub struct Hub {
    config: HubConfig,
    log: Arc<ConsolidatedLog>,
    stats: RwLock<HubStats>,
}

impl Hub {
    /// Creates a hub with an empty log.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self::with_log(config, Arc::new(ConsolidatedLog::new()))
    }

    /// Creates a hub over an existing log.
    #[must_use]
    pub fn with_log(config: HubConfig, log: Arc<ConsolidatedLog>) -> Self {
        Self {
            config,
            log,
            stats: RwLock::new(HubStats::default()),
        }
    }

    /// Answers a reachability probe.
    ///
    /// Never fails: a version the hub does not speak comes back as a
    /// refusal inside the response, so old sites get a message they can
    /// log rather than a dead connection.
    pub fn handle_probe(&self, request: &ProbeRequest) -> ProbeResponse {
        self.stats.write().probes += 1;
        if request.protocol_version != self.config.protocol_version {
            self.stats.write().probes_refused += 1;
            warn!(
                "refusing probe from {}: version {} unsupported, hub speaks {}",
                request.site_id, request.protocol_version, self.config.protocol_version
            );
            return ProbeResponse::refused(
                format!(
                    "unsupported protocol version {}, hub speaks {}",
                    request.protocol_version, self.config.protocol_version
                ),
                Timestamp::now(),
            );
        }
        debug!("probe from {}", request.site_id);
        ProbeResponse::accepted(Timestamp::now())
    }

    /// Consolidates an upload from a site.
    pub fn handle_upload(&self, request: &UploadRequest) -> HubResult<UploadReceipt> {
        if request.records.len() > self.config.max_upload_batch as usize {
            return Err(HubError::BatchTooLarge {
                len: request.records.len(),
                max: self.config.max_upload_batch,
            });
        }

        let receipt = self.log.append(request.site_id, &request.records, &self.config);
        {
            let mut stats = self.stats.write();
            stats.uploads += 1;
            stats.records_accepted += receipt.accepted.len() as u64;
            stats.records_rejected += receipt.rejected.len() as u64;
        }
        info!(
            "upload from {}: {} accepted, {} rejected, head {}",
            request.site_id,
            receipt.accepted.len(),
            receipt.rejected.len(),
            self.log.head()
        );
        Ok(receipt)
    }

    /// Serves consolidated changes past a site's watermark.
    pub fn handle_download(&self, request: &DownloadRequest) -> HubResult<DownloadBatch> {
        let head = self.log.head();
        if request.since > head {
            return Err(HubError::WatermarkAhead {
                requested: request.since,
                head,
            });
        }

        let limit = if request.limit == 0 {
            self.config.max_download_batch
        } else {
            request.limit.min(self.config.max_download_batch)
        };
        let batch = self.log.changes_since(request.site_id, request.since, limit);
        {
            let mut stats = self.stats.write();
            stats.downloads += 1;
            stats.changes_served += batch.changes.len() as u64;
        }
        debug!(
            "download for {}: {} changes since {}, watermark {}",
            request.site_id,
            batch.changes.len(),
            request.since,
            batch.watermark
        );
        Ok(batch)
    }

    /// Highest position in the consolidated log.
    #[must_use]
    pub fn head(&self) -> Watermark {
        self.log.head()
    }

    /// Number of consolidated entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.log.len()
    }

    /// Current version of one entity in the hub's view.
    #[must_use]
    pub fn entity(&self, key: &EntityKey) -> Option<LocalVersion> {
        self.log.entity(key)
    }

    /// Number of live entities in the hub's view.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.log.entity_count()
    }

    /// Traffic counters so far.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.stats.read().clone()
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("head", &self.log.head())
            .field("entries", &self.log.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitesync_protocol::{
        ChangeRecord, EntityId, FieldMap, FieldValue, LocalChange, RecordId, SiteId,
    };

    fn site(n: u8) -> SiteId {
        SiteId::from_bytes([n; 16])
    }

    fn key(n: u8) -> EntityKey {
        EntityKey::new("task", EntityId::from_bytes([n; 16]))
    }

    fn payload(title: &str) -> FieldMap {
        let mut map = FieldMap::new();
        map.insert("title".to_string(), FieldValue::from(title));
        map
    }

    fn record(id: u64, entity: u8, ts: u64) -> ChangeRecord {
        ChangeRecord::from_change(
            RecordId::new(id),
            LocalChange::insert(key(entity), payload("x")),
            Timestamp::from_millis(ts),
        )
    }

    #[test]
    fn full_sync_flow() {
        let hub = Hub::new(HubConfig::default());

        let probe = hub.handle_probe(&ProbeRequest::new(site(1)));
        assert!(probe.ok);

        let receipt = hub
            .handle_upload(&UploadRequest::new(
                site(1),
                vec![record(1, 1, 100), record(2, 2, 110)],
            ))
            .unwrap();
        assert!(receipt.is_complete());
        assert_eq!(hub.entry_count(), 2);
        assert_eq!(hub.head(), Watermark::new(2));

        let batch = hub
            .handle_download(&DownloadRequest::new(site(2), Watermark::ORIGIN, 10))
            .unwrap();
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.watermark, Watermark::new(2));
        assert!(!batch.has_more);
    }

    #[test]
    fn probe_refuses_unknown_version() {
        let hub = Hub::new(HubConfig::default().with_protocol_version(2));
        let mut probe = ProbeRequest::new(site(1));
        probe.protocol_version = 1;

        let response = hub.handle_probe(&probe);
        assert!(!response.ok);
        let message = response.message.unwrap();
        assert!(message.contains("version 1"));
        assert!(message.contains("hub speaks 2"));
        assert_eq!(hub.stats().probes_refused, 1);
    }

    #[test]
    fn oversized_upload_is_refused_whole() {
        let hub = Hub::new(HubConfig::default().with_max_upload_batch(1));
        let result = hub.handle_upload(&UploadRequest::new(
            site(1),
            vec![record(1, 1, 100), record(2, 2, 110)],
        ));
        assert!(matches!(result, Err(HubError::BatchTooLarge { len: 2, max: 1 })));
        assert_eq!(hub.entry_count(), 0);
    }

    #[test]
    fn download_past_the_head_is_refused() {
        let hub = Hub::new(HubConfig::default());
        let result = hub.handle_download(&DownloadRequest::new(
            site(1),
            Watermark::new(5),
            10,
        ));
        assert!(matches!(result, Err(HubError::WatermarkAhead { .. })));
    }

    #[test]
    fn zero_limit_falls_back_to_the_configured_batch() {
        let hub = Hub::new(HubConfig::default().with_max_download_batch(2));
        hub.handle_upload(&UploadRequest::new(
            site(1),
            vec![record(1, 1, 100), record(2, 2, 110), record(3, 3, 120)],
        ))
        .unwrap();

        let batch = hub
            .handle_download(&DownloadRequest::new(site(2), Watermark::ORIGIN, 0))
            .unwrap();
        assert_eq!(batch.changes.len(), 2);
        assert!(batch.has_more);
    }

    #[test]
    fn requested_limit_is_clamped() {
        let hub = Hub::new(HubConfig::default().with_max_download_batch(1));
        hub.handle_upload(&UploadRequest::new(
            site(1),
            vec![record(1, 1, 100), record(2, 2, 110)],
        ))
        .unwrap();

        let batch = hub
            .handle_download(&DownloadRequest::new(site(2), Watermark::ORIGIN, 500))
            .unwrap();
        assert_eq!(batch.changes.len(), 1);
        assert!(batch.has_more);
    }

    #[test]
    fn stats_track_traffic() {
        let hub = Hub::new(HubConfig::default());
        hub.handle_probe(&ProbeRequest::new(site(1)));
        hub.handle_upload(&UploadRequest::new(site(1), vec![record(1, 1, 100)]))
            .unwrap();
        hub.handle_download(&DownloadRequest::new(site(2), Watermark::ORIGIN, 10))
            .unwrap();

        let stats = hub.stats();
        assert_eq!(stats.probes, 1);
        assert_eq!(stats.uploads, 1);
        assert_eq!(stats.records_accepted, 1);
        assert_eq!(stats.records_rejected, 0);
        assert_eq!(stats.downloads, 1);
        assert_eq!(stats.changes_served, 1);
    }

    #[test]
    fn shared_log() {
        let log = Arc::new(ConsolidatedLog::new());
        let hub = Hub::with_log(HubConfig::default(), Arc::clone(&log));

        hub.handle_upload(&UploadRequest::new(site(1), vec![record(1, 1, 100)]))
            .unwrap();
        assert_eq!(log.len(), 1);
    }
}
