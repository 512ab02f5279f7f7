//! Protocol messages for sync.
//!
//! Three request/response pairs, one per endpoint: probe, upload, download.
//! All messages are plain serde structs encoded through [`crate::wire`].

use crate::record::{ChangeRecord, RemoteChange};
use crate::types::{RecordId, SiteId, Timestamp, Watermark};
use serde::{Deserialize, Serialize};

/// Protocol version spoken by this crate.
///
/// The probe exchange doubles as the version gate: a hub that cannot speak
/// the requested version answers with `ok = false` and the site treats the
/// remote as unreachable.
pub const PROTOCOL_VERSION: u16 = 1;

/// Lightweight reachability check from a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// Identifies the probing site.
    pub site_id: SiteId,
    /// Protocol version the site speaks.
    pub protocol_version: u16,
}

impl ProbeRequest {
    /// Creates a probe request at the current protocol version.
    #[must_use]
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

/// Hub answer to a probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Whether the hub accepts sync traffic from this site.
    pub ok: bool,
    /// Refusal reason when `ok` is false.
    pub message: Option<String>,
    /// Hub wall clock, for operator-facing skew diagnostics.
    pub server_time: Timestamp,
}

impl ProbeResponse {
    /// Creates an accepting response.
    #[must_use]
    pub fn accepted(server_time: Timestamp) -> Self {
        Self {
            ok: true,
            message: None,
            server_time,
        }
    }

    /// Creates a refusing response.
    pub fn refused(message: impl Into<String>, server_time: Timestamp) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            server_time,
        }
    }
}

/// A batch of pending records pushed by a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Identifies the uploading site; consolidated changes remember their
    /// origin so downloads can suppress echoes.
    pub site_id: SiteId,
    /// Pending records in outbox order.
    pub records: Vec<ChangeRecord>,
}

impl UploadRequest {
    /// Creates an upload request.
    #[must_use]
    pub fn new(site_id: SiteId, records: Vec<ChangeRecord>) -> Self {
        Self { site_id, records }
    }
}

/// One record the hub refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
    /// Id of the refused record.
    pub id: RecordId,
    /// Validation failure description.
    pub reason: String,
}

/// Hub answer to an upload.
///
/// Partial acceptance is legal: `accepted` lists exactly the record ids the
/// hub consolidated; everything else in the request was rejected and stays
/// pending on the site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Ids the hub accepted, in consolidation order.
    pub accepted: Vec<RecordId>,
    /// Refused records with reasons, for operator logging.
    pub rejected: Vec<RejectedRecord>,
}

impl UploadReceipt {
    /// A receipt accepting every submitted record.
    #[must_use]
    pub fn complete(accepted: Vec<RecordId>) -> Self {
        Self {
            accepted,
            rejected: Vec::new(),
        }
    }

    /// Whether every submitted record was accepted.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// A site asking for consolidated changes after its watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Identifies the requesting site (for echo suppression).
    pub site_id: SiteId,
    /// Position of the last batch this site merged.
    pub since: Watermark,
    /// Maximum changes to return.
    pub limit: u32,
}

impl DownloadRequest {
    /// Creates a download request.
    #[must_use]
    pub fn new(site_id: SiteId, since: Watermark, limit: u32) -> Self {
        Self {
            site_id,
            since,
            limit,
        }
    }
}

/// One batch of consolidated changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadBatch {
    /// Changes after `since`, oldest first, echoes of the requesting site
    /// filtered out.
    pub changes: Vec<RemoteChange>,
    /// New cursor; always `>= since`, and advances over filtered echoes.
    pub watermark: Watermark,
    /// Whether more changes exist past `watermark`.
    pub has_more: bool,
}

impl DownloadBatch {
    /// A batch with nothing new.
    #[must_use]
    pub fn empty(since: Watermark) -> Self {
        Self {
            changes: Vec::new(),
            watermark: since,
            has_more: false,
        }
    }
}
