//! Transport abstraction between a site and the hub.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use sitesync_protocol::{
    DownloadBatch, DownloadRequest, ProbeRequest, ProbeResponse, Timestamp, UploadReceipt,
    UploadRequest,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Carries the three sync exchanges to the hub.
///
/// Implementations never block forever on their own: the connectivity
/// monitor bounds the probe, and upload/download run only after a probe
/// succeeded. All methods take `&self`; implementations are shared across
/// the scheduler and the monitor.
pub trait RemoteTransport: Send + Sync {
    /// Asks the hub whether it accepts sync traffic from this site.
    fn probe(&self, request: &ProbeRequest) -> SyncResult<ProbeResponse>;

    /// Pushes a batch of pending records.
    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadReceipt>;

    /// Fetches consolidated changes after the site's watermark.
    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadBatch>;
}

/// A scriptable transport for tests.
///
/// Responses are queued per endpoint and served in order; an empty queue
/// falls back to the accommodating default (probe accepted, every upload
/// record accepted, empty download batch). Every request is captured for
/// later assertions, and [`MockTransport::calls`] records endpoint order.
#[derive(Debug)]
pub struct MockTransport {
    online: AtomicBool,
    probe_script: Mutex<VecDeque<ProbeResponse>>,
    upload_script: Mutex<VecDeque<UploadReceipt>>,
    download_script: Mutex<VecDeque<DownloadBatch>>,
    fail_upload: Mutex<Option<SyncError>>,
    fail_download: Mutex<Option<SyncError>>,
    calls: Mutex<Vec<&'static str>>,
    uploads: Mutex<Vec<UploadRequest>>,
    downloads: Mutex<Vec<DownloadRequest>>,
}

impl MockTransport {
    /// Creates a mock transport that starts online.
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            probe_script: Mutex::new(VecDeque::new()),
            upload_script: Mutex::new(VecDeque::new()),
            download_script: Mutex::new(VecDeque::new()),
            fail_upload: Mutex::new(None),
            fail_download: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the hub becoming reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Queues a probe response.
    pub fn queue_probe(&self, response: ProbeResponse) {
        self.probe_script.lock().push_back(response);
    }

    /// Queues an upload receipt.
    pub fn queue_upload(&self, receipt: UploadReceipt) {
        self.upload_script.lock().push_back(receipt);
    }

    /// Queues a download batch.
    pub fn queue_download(&self, batch: DownloadBatch) {
        self.download_script.lock().push_back(batch);
    }

    /// Makes the next upload fail with the given error.
    pub fn fail_next_upload(&self, error: SyncError) {
        *self.fail_upload.lock() = Some(error);
    }

    /// Makes the next download fail with the given error.
    pub fn fail_next_download(&self, error: SyncError) {
        *self.fail_download.lock() = Some(error);
    }

    /// Endpoint names in call order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    /// Every upload request seen so far.
    pub fn uploads(&self) -> Vec<UploadRequest> {
        self.uploads.lock().clone()
    }

    /// Every download request seen so far.
    pub fn downloads(&self) -> Vec<DownloadRequest> {
        self.downloads.lock().clone()
    }

    fn offline_check(&self) -> SyncResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::transport_retryable("connection refused"))
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteTransport for MockTransport {
    fn probe(&self, _request: &ProbeRequest) -> SyncResult<ProbeResponse> {
        self.calls.lock().push("probe");
        self.offline_check()?;
        let scripted = self.probe_script.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| ProbeResponse::accepted(Timestamp::now())))
    }

    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadReceipt> {
        self.calls.lock().push("upload");
        self.offline_check()?;
        self.uploads.lock().push(request.clone());
        if let Some(error) = self.fail_upload.lock().take() {
            return Err(error);
        }
        let scripted = self.upload_script.lock().pop_front();
        Ok(scripted
            .unwrap_or_else(|| UploadReceipt::complete(request.records.iter().map(|r| r.id).collect())))
    }

    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadBatch> {
        self.calls.lock().push("download");
        self.offline_check()?;
        self.downloads.lock().push(request.clone());
        if let Some(error) = self.fail_download.lock().take() {
            return Err(error);
        }
        let scripted = self.download_script.lock().pop_front();
        Ok(scripted.unwrap_or_else(|| DownloadBatch::empty(request.since)))
    }
}
