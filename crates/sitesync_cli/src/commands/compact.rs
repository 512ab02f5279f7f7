//! Compact command implementation.

use sitesync_engine::ChangeTracker;
use sitesync_store::Store;
use std::path::Path;
use std::sync::Arc;

/// Runs the compact command.
///
/// Drops outbox records the hub has already accepted, then folds the
/// journal into the snapshot. Opens the store, which takes its exclusive
/// lock: stop the site process first.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting store at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let store = Arc::new(Store::open(path)?);
    let before = store.stats()?;

    println!("Before:");
    println!("  Flushed outbox records: {}", before.flushed_outbox);
    println!("  Journal size:           {} bytes", before.journal_bytes);

    if dry_run {
        if before.flushed_outbox == 0 && before.journal_bytes == 0 {
            println!();
            println!("Nothing to compact");
        }
        return Ok(());
    }

    let tracker = ChangeTracker::new(Arc::clone(&store));
    let dropped = tracker.compact_flushed()?;
    store.checkpoint()?;

    let after = store.stats()?;
    println!();
    println!("After:");
    println!("  Dropped records: {}", dropped);
    println!("  Journal size:    {} bytes", after.journal_bytes);
    println!();
    println!("✓ Compaction complete");

    Ok(())
}
