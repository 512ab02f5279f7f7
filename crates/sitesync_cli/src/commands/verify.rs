//! Verify command implementation.

use sitesync_store::inspect;
use std::path::Path;

/// Runs the verify command.
///
/// Walks the snapshot and journal without taking the store lock and
/// reports anything that recovery would have to repair or drop.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying store at {:?}", path);
    println!();

    let report = inspect(path)?;

    println!(
        "Snapshot: {}",
        if report.snapshot_present {
            "present"
        } else {
            "none"
        }
    );
    println!(
        "Journal:  {} bytes, {} frames, {} ops",
        report.journal_bytes, report.frames, report.ops
    );
    println!(
        "Replayed: {} live rows, {} tombstones, {} pending outbox, watermark {}",
        report.live_rows, report.tombstones, report.pending_outbox, report.watermark
    );
    println!();

    let mut problems = Vec::new();
    if let Some(corruption) = &report.corruption {
        problems.push(format!("journal corruption: {corruption}"));
    }
    if report.torn_bytes > 0 {
        problems.push(format!(
            "{} bytes of torn tail after the last complete frame",
            report.torn_bytes
        ));
    }

    if problems.is_empty() {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        for problem in &problems {
            println!("  {problem}");
        }
        println!();
        println!("✗ Store verification failed");
        Err("Verification failed".into())
    }
}
