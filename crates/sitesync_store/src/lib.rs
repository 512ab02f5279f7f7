//! # SiteSync Store
//!
//! Durable per-site storage for SiteSync: business rows, the outbox of
//! locally captured changes, and the download watermark, committed
//! together through a journaled transaction.
//!
//! ## Design Principles
//!
//! - One store directory per site, guarded by an exclusive lock
//! - Every committed transaction is one journal frame: rows, outbox
//!   entries, and the watermark change atomically or not at all
//! - Recovery replays the journal over the last snapshot and drops any
//!   torn tail left by a crash
//! - Storage backends are opaque byte stores; the store owns all format
//!   interpretation
//!
//! ## On-Disk Layout
//!
//! ```text
//! <store_path>/
//! ├─ LOCK           # Advisory lock for single-writer access
//! ├─ journal.log    # Committed-transaction frames since last checkpoint
//! └─ snapshot.dat   # Full state at last checkpoint
//! ```
//!
//! ## Example
//!
//! ```rust
//! use sitesync_store::Store;
//! use sitesync_protocol::{EntityId, EntityKey, FieldMap, FieldValue, Timestamp};
//!
//! let store = Store::open_in_memory().unwrap();
//! let key = EntityKey::new("inventory", EntityId::new());
//! let mut payload = FieldMap::new();
//! payload.insert("count".to_string(), FieldValue::from(12));
//!
//! store
//!     .transaction(|txn| {
//!         txn.put_row(key.clone(), payload, Timestamp::from_millis(1));
//!         Ok(())
//!     })
//!     .unwrap();
//! assert!(store.row(&key).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod dir;
mod error;
mod file;
mod journal;
mod memory;
mod store;

pub use backend::StorageBackend;
pub use error::{StoreError, StoreResult};
pub use file::FileBackend;
pub use journal::{compute_crc32, Journal, JournalOp, ReplayReport, JOURNAL_MAGIC, JOURNAL_VERSION};
pub use memory::InMemoryBackend;
pub use store::{
    inspect, InspectReport, RowState, Store, StoreOptions, StoreStats, Txn, SNAPSHOT_MAGIC,
    SNAPSHOT_VERSION,
};
