//! CLI command implementations.

pub mod compact;
pub mod outbox;
pub mod status;
pub mod verify;
