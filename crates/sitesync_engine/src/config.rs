//! Configuration for the sync engine.

use sitesync_protocol::SiteId;
use std::time::Duration;

/// Configuration for one site's sync engine.
///
/// Retry policy is deliberately flat: a failed cycle waits `retry_backoff`
/// and then the next cycle starts from scratch. Every cycle begins with a
/// connectivity probe anyway, so an unreachable hub costs one bounded probe
/// per attempt and escalating delays buy nothing.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifies this site to the hub.
    pub site_id: SiteId,
    /// Base URL of the hub.
    pub hub_url: String,
    /// Interval between automatic sync cycles.
    pub sync_interval: Duration,
    /// Upper bound on one connectivity probe.
    pub probe_timeout: Duration,
    /// Wait before the next attempt after a failed cycle.
    pub retry_backoff: Duration,
    /// Maximum records per upload request.
    pub upload_batch_size: u32,
    /// Maximum changes requested per download.
    pub download_batch_size: u32,
    /// Consecutive merge failures on the same batch before it is
    /// dead-lettered and the pull suspends.
    pub max_merge_attempts: u32,
}

impl SyncConfig {
    /// Creates a configuration with default tuning.
    pub fn new(site_id: SiteId, hub_url: impl Into<String>) -> Self {
        Self {
            site_id,
            hub_url: hub_url.into(),
            sync_interval: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            retry_backoff: Duration::from_secs(15),
            upload_batch_size: 100,
            download_batch_size: 100,
            max_merge_attempts: 3,
        }
    }

    /// Sets the automatic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the connectivity probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Sets the wait after a failed cycle.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Sets the upload batch size.
    pub fn with_upload_batch_size(mut self, size: u32) -> Self {
        self.upload_batch_size = size;
        self
    }

    /// Sets the download batch size.
    pub fn with_download_batch_size(mut self, size: u32) -> Self {
        self.download_batch_size = size;
        self
    }

    /// Sets the merge failure budget before dead-lettering.
    pub fn with_max_merge_attempts(mut self, attempts: u32) -> Self {
        self.max_merge_attempts = attempts;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(SiteId::from_bytes([0u8; 16]), "")
    }
}
