//! # SiteSync Engine
//!
//! Sync scheduler, outbox, and merge engine for SiteSync sites.
//!
//! This crate provides:
//! - Durable change tracking (the outbox)
//! - Connectivity probing with a bounded timeout
//! - Last-writer-wins merge of consolidated hub batches
//! - Cycle scheduling with flat retry backoff and dead-lettering
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** synchronization model:
//! 1. Probe the hub; an unreachable hub ends the cycle.
//! 2. Push pending outbox records (the hub must see local edits first)
//! 3. Pull consolidated changes and merge them under last-writer-wins
//!
//! Each site runs one scheduler over one store. The hub consolidates
//! batches from every site into a single ordered log; sites track their
//! position in that log with a watermark.
//!
//! ## Key Invariants
//!
//! - Push always happens before pull, and a failed push skips the pull
//! - Merging a batch and advancing the watermark is one atomic commit
//! - Merges are idempotent; re-applying a batch changes nothing
//! - At most one cycle is in flight per scheduler
//! - Connectivity checks never error; the answer is online or offline

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connectivity;
mod error;
mod http;
mod merge;
mod outbox;
mod scheduler;
mod transport;

pub use config::SyncConfig;
pub use connectivity::{ConnectivityMonitor, ConnectivityStatus};
pub use error::{SyncError, SyncResult};
pub use http::{
    HttpClient, HttpTransport, LoopbackClient, LoopbackHub, DOWNLOAD_PATH, PROBE_PATH, UPLOAD_PATH,
};
pub use merge::{MergeEngine, MergeOutcome};
pub use outbox::ChangeTracker;
pub use scheduler::{
    CycleOutcome, DeadLetter, SyncScheduler, SyncState, SyncStats, SyncStatus,
};
pub use transport::{MockTransport, RemoteTransport};

// The conflict policy lives in the protocol crate so sites and the hub
// share one definition; re-exported here for embedders inspecting merge
// decisions.
pub use sitesync_protocol::{resolve, ConflictDecision, LocalVersion, Winner};
