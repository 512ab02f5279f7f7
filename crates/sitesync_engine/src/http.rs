//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted behind [`HttpClient`] so any
//! library (reqwest, ureq, hyper) can carry the bytes; this module owns the
//! endpoint layout and the CBOR bodies. The [`LoopbackClient`] routes
//! requests straight into an in-process handler, which is how the
//! integration tests drive a real hub without sockets.

use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use parking_lot::RwLock;
use sitesync_protocol::{
    wire, DownloadBatch, DownloadRequest, ProbeRequest, ProbeResponse, UploadReceipt,
    UploadRequest,
};

/// Endpoint for connectivity probes.
pub const PROBE_PATH: &str = "/sync/probe";
/// Endpoint for pushing pending records.
pub const UPLOAD_PATH: &str = "/sync/upload";
/// Endpoint for fetching consolidated changes.
pub const DOWNLOAD_PATH: &str = "/sync/download";

/// HTTP client abstraction.
///
/// Implementations only move bytes; encoding, endpoints, and error
/// classification live in [`HttpTransport`].
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Whether the client believes it can reach the network at all.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based transport with CBOR request/response bodies.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport against a hub base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the hub base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport-level error message, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn post_raw(&self, endpoint: &str, body: Vec<u8>) -> SyncResult<Vec<u8>> {
        if !self.client.is_healthy() {
            return Err(SyncError::Offline);
        }

        let url = format!("{}{}", self.base_url, endpoint);
        match self.client.post(&url, body) {
            Ok(response) => {
                *self.last_error.write() = None;
                Ok(response)
            }
            Err(message) => {
                *self.last_error.write() = Some(message.clone());
                Err(SyncError::transport_retryable(message))
            }
        }
    }
}

impl<C: HttpClient> RemoteTransport for HttpTransport<C> {
    fn probe(&self, request: &ProbeRequest) -> SyncResult<ProbeResponse> {
        let body = wire::encode(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode probe request: {e}")))?;
        let response = self.post_raw(PROBE_PATH, body)?;
        wire::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode probe response: {e}")))
    }

    fn upload(&self, request: &UploadRequest) -> SyncResult<UploadReceipt> {
        let body = wire::encode(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode upload request: {e}")))?;
        let response = self.post_raw(UPLOAD_PATH, body)?;
        wire::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode upload receipt: {e}")))
    }

    fn download(&self, request: &DownloadRequest) -> SyncResult<DownloadBatch> {
        let body = wire::encode(request)
            .map_err(|e| SyncError::Protocol(format!("failed to encode download request: {e}")))?;
        let response = self.post_raw(DOWNLOAD_PATH, body)?;
        wire::decode(&response)
            .map_err(|e| SyncError::Protocol(format!("failed to decode download batch: {e}")))
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// An in-process request handler a [`LoopbackClient`] can route to.
pub trait LoopbackHub {
    /// Handles a POST to `path` and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// An [`HttpClient`] that hands requests straight to a [`LoopbackHub`].
///
/// Useful for tests and single-process deployments; the full encode,
/// route, decode path runs without any network.
pub struct LoopbackClient<S: LoopbackHub> {
    hub: S,
}

impl<S: LoopbackHub + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client around a handler.
    pub fn new(hub: S) -> Self {
        Self { hub }
    }
}

impl<S: LoopbackHub + Send + Sync> HttpClient for LoopbackClient<S> {
    fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map(|i| &url[i..]).unwrap_or(url);
        self.hub.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
