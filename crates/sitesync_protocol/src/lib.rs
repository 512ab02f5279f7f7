//! SiteSync protocol: the types and rules shared by sites and the hub.
//!
//! This crate defines everything both ends of a sync conversation must
//! agree on:
//!
//! - **Identifiers and timestamps** ([`types`]): entity keys, record ids,
//!   site ids, and the opaque [`Watermark`] cursor into the hub's
//!   consolidated log.
//! - **Change records** ([`record`]): the durable unit of local mutation
//!   ([`ChangeRecord`]) and its consolidated counterpart ([`RemoteChange`]).
//! - **Wire messages** ([`messages`]): probe, upload, and download
//!   request/response pairs, encoded as CBOR via [`wire`].
//! - **Conflict policy** ([`conflict`]): the deterministic last-writer-wins
//!   rules applied identically by every site and by the hub.
//!
//! ## Key Invariants
//!
//! - Record ids are strictly increasing per site; upload order equals
//!   append order.
//! - Watermarks never move backwards: a download response always carries a
//!   watermark greater than or equal to the request's `since`.
//! - `resolve` is a pure function of the local version and the remote
//!   change; deletes win regardless of timestamps, and timestamp ties go to
//!   the remote (authoritative) side.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conflict;
pub mod messages;
pub mod payload;
pub mod record;
pub mod types;
pub mod wire;

pub use conflict::{resolve, ConflictDecision, LocalVersion, Winner};
pub use messages::{
    DownloadBatch, DownloadRequest, ProbeRequest, ProbeResponse, RejectedRecord, UploadReceipt,
    UploadRequest, PROTOCOL_VERSION,
};
pub use payload::{FieldMap, FieldValue};
pub use record::{ChangeRecord, LocalChange, Operation, RecordState, RemoteChange};
pub use types::{EntityId, EntityKey, RecordId, SiteId, Timestamp, Watermark};
pub use wire::{decode, encode, WireError, WireResult};
