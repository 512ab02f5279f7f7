//! # SiteSync Hub
//!
//! Consolidation hub for SiteSync sites.
//!
//! This crate provides:
//! - Request handlers (probe, upload, download)
//! - The consolidated change log with per-site echo suppression
//! - An entity version view kept under the shared conflict rules
//! - Idempotent upload acknowledgement for lost receipts
//!
//! # Architecture
//!
//! The hub is transport-agnostic: an embedding application exposes the
//! handlers over HTTP or calls them in process. It maintains:
//!
//! - One ordered log of every accepted change from every site
//! - A current-version view of each entity, resolved with the same rules
//!   sites use while merging
//! - Traffic counters
//!
//! # Protocol
//!
//! Sites run push-then-pull cycles against the hub:
//! 1. Site probes; the hub refuses unknown protocol versions
//! 2. Site uploads pending records; the hub acks per record
//! 3. Site downloads consolidated changes past its watermark, minus its
//!    own echoes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod hub;
mod log;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::{Hub, HubStats};
pub use log::ConsolidatedLog;
