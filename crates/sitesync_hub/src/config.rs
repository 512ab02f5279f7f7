//! Hub configuration.

use sitesync_protocol::PROTOCOL_VERSION;

/// Configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Protocol version the hub speaks; probes carrying any other version
    /// are refused.
    pub protocol_version: u16,
    /// Maximum records accepted in one upload.
    pub max_upload_batch: u32,
    /// Maximum changes served in one download batch; also the fallback
    /// when a request asks for a limit of zero.
    pub max_download_batch: u32,
    /// Maximum encoded payload size per record, in bytes. Oversized
    /// records are rejected individually.
    pub max_payload_bytes: usize,
}

impl HubConfig {
    /// Creates a configuration with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            max_upload_batch: 500,
            max_download_batch: 500,
            max_payload_bytes: 64 * 1024,
        }
    }

    /// Sets the protocol version the hub accepts.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u16) -> Self {
        self.protocol_version = version;
        self
    }

    /// Sets the maximum upload batch size.
    #[must_use]
    pub fn with_max_upload_batch(mut self, max: u32) -> Self {
        self.max_upload_batch = max;
        self
    }

    /// Sets the maximum download batch size.
    #[must_use]
    pub fn with_max_download_batch(mut self, max: u32) -> Self {
        self.max_download_batch = max;
        self
    }

    /// Sets the per-record payload size limit.
    #[must_use]
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::new()
    }
}
