//! Connectivity monitoring.
//!
//! Sync cycles start with a probe so the engine can separate "the hub is
//! down" from "the hub rejected my request". The monitor wraps the
//! transport's probe with a hard deadline and a cached answer:
//!
//! - [`ConnectivityMonitor::check_now`] never returns an error and never
//!   waits longer than the probe timeout. A slow, failing, or refusing hub
//!   is all the same thing from the scheduler's point of view: `Offline`.
//! - [`ConnectivityMonitor::status`] reads the cached result and costs
//!   nothing. It reports `Offline` until the first probe; claiming a hub is
//!   reachable before anything has checked leads sync cycles into timeouts.

use crate::transport::RemoteTransport;
use parking_lot::RwLock;
use sitesync_protocol::{ProbeRequest, SiteId};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Reachability of the hub as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    /// The last probe was answered and accepted.
    Online,
    /// No probe has run yet, or the last one failed, timed out, or was
    /// refused.
    Offline,
}

impl ConnectivityStatus {
    /// Returns true for `Online`.
    #[must_use]
    pub fn is_online(self) -> bool {
        matches!(self, ConnectivityStatus::Online)
    }
}

/// Probes the hub with a bounded wait and caches the outcome.
pub struct ConnectivityMonitor<T> {
    transport: Arc<T>,
    site_id: SiteId,
    timeout: Duration,
    status: RwLock<ConnectivityStatus>,
}

impl<T: RemoteTransport + 'static> ConnectivityMonitor<T> {
    /// Creates a monitor around a shared transport.
    pub fn new(transport: Arc<T>, site_id: SiteId, timeout: Duration) -> Self {
        Self {
            transport,
            site_id,
            timeout,
            status: RwLock::new(ConnectivityStatus::Offline),
        }
    }

    /// Returns the cached status without touching the network.
    #[must_use]
    pub fn status(&self) -> ConnectivityStatus {
        *self.status.read()
    }

    /// Probes the hub, updates the cache, and returns the fresh status.
    ///
    /// The probe runs on a helper thread and this call waits at most the
    /// configured timeout. A probe that outlives the wait finishes in the
    /// background and its answer is dropped.
    pub fn check_now(&self) -> ConnectivityStatus {
        let (sender, receiver) = mpsc::channel();
        let transport = Arc::clone(&self.transport);
        let request = ProbeRequest::new(self.site_id);
        thread::spawn(move || {
            // The receiver is gone if the wait timed out; nothing to do.
            let _ = sender.send(transport.probe(&request));
        });

        let status = match receiver.recv_timeout(self.timeout) {
            Ok(Ok(response)) if response.ok => ConnectivityStatus::Online,
            Ok(Ok(response)) => {
                warn!(
                    "hub refused probe: {}",
                    response.message.as_deref().unwrap_or("no reason given")
                );
                ConnectivityStatus::Offline
            }
            Ok(Err(error)) => {
                debug!("probe failed: {error}");
                ConnectivityStatus::Offline
            }
            Err(_) => {
                debug!("probe timed out after {:?}", self.timeout);
                ConnectivityStatus::Offline
            }
        };
        *self.status.write() = status;
        status
    }
}

impl<T> std::fmt::Debug for ConnectivityMonitor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("status", &*self.status.read())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::transport::MockTransport;
    use sitesync_protocol::{
        DownloadBatch, DownloadRequest, ProbeResponse, Timestamp, UploadReceipt, UploadRequest,
    };
    use std::time::Instant;

    fn monitor(transport: Arc<MockTransport>) -> ConnectivityMonitor<MockTransport> {
        ConnectivityMonitor::new(transport, SiteId::from_bytes([1u8; 16]), Duration::from_secs(1))
    }

    #[test]
    fn starts_offline_until_first_probe() {
        let transport = Arc::new(MockTransport::new());
        let monitor = monitor(transport);
        assert_eq!(monitor.status(), ConnectivityStatus::Offline);

        assert_eq!(monitor.check_now(), ConnectivityStatus::Online);
        assert_eq!(monitor.status(), ConnectivityStatus::Online);
    }

    #[test]
    fn unreachable_hub_reads_offline() {
        let transport = Arc::new(MockTransport::new());
        transport.set_online(false);
        let monitor = monitor(transport);

        assert_eq!(monitor.check_now(), ConnectivityStatus::Offline);
        assert_eq!(monitor.status(), ConnectivityStatus::Offline);
    }

    #[test]
    fn refused_probe_reads_offline() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_probe(ProbeResponse::refused(
            "protocol version 9 unsupported",
            Timestamp::from_millis(1),
        ));
        let monitor = monitor(transport);

        assert_eq!(monitor.check_now(), ConnectivityStatus::Offline);
    }

    #[test]
    fn status_recovers_after_outage() {
        let transport = Arc::new(MockTransport::new());
        transport.set_online(false);
        let monitor = monitor(Arc::clone(&transport));

        assert_eq!(monitor.check_now(), ConnectivityStatus::Offline);

        transport.set_online(true);
        assert_eq!(monitor.check_now(), ConnectivityStatus::Online);
    }

    struct StalledTransport;

    impl RemoteTransport for StalledTransport {
        fn probe(&self, _request: &ProbeRequest) -> SyncResult<ProbeResponse> {
            thread::sleep(Duration::from_secs(5));
            Ok(ProbeResponse::accepted(Timestamp::now()))
        }

        fn upload(&self, _request: &UploadRequest) -> SyncResult<UploadReceipt> {
            Err(SyncError::Offline)
        }

        fn download(&self, _request: &DownloadRequest) -> SyncResult<DownloadBatch> {
            Err(SyncError::Offline)
        }
    }

    #[test]
    fn stalled_probe_is_cut_off_at_the_timeout() {
        let monitor = ConnectivityMonitor::new(
            Arc::new(StalledTransport),
            SiteId::from_bytes([2u8; 16]),
            Duration::from_millis(50),
        );

        let started = Instant::now();
        let status = monitor.check_now();
        assert_eq!(status, ConnectivityStatus::Offline);
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
