//! Status command implementation.

use serde::Serialize;
use sitesync_store::inspect;
use std::path::Path;

/// Store status snapshot.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Store path.
    pub path: String,
    /// Whether a snapshot file is present.
    pub snapshot_present: bool,
    /// Journal size in bytes.
    pub journal_bytes: u64,
    /// Live rows.
    pub live_rows: usize,
    /// Tombstoned rows.
    pub tombstones: usize,
    /// Outbox records awaiting upload.
    pub pending_outbox: usize,
    /// Outbox records accepted by the hub, awaiting compaction.
    pub flushed_outbox: usize,
    /// Download watermark (hub log position last merged).
    pub watermark: u64,
    /// Whether journal and snapshot verified cleanly.
    pub clean: bool,
}

/// Runs the status command.
///
/// Reads the files directly without taking the store lock, so it is safe
/// to run while the site process is up.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = inspect(path)?;

    let result = StatusReport {
        path: path.display().to_string(),
        snapshot_present: report.snapshot_present,
        journal_bytes: report.journal_bytes,
        live_rows: report.live_rows,
        tombstones: report.tombstones,
        pending_outbox: report.pending_outbox,
        flushed_outbox: report.flushed_outbox,
        watermark: report.watermark.as_u64(),
        clean: report.is_clean(),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &StatusReport) {
    println!("SiteSync Store Status");
    println!("=====================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!(
        "  Snapshot:     {}",
        if result.snapshot_present {
            "present"
        } else {
            "none"
        }
    );
    println!("  Journal size: {}", format_size(result.journal_bytes));
    println!(
        "  Integrity:    {}",
        if result.clean { "clean" } else { "NOT CLEAN" }
    );
    println!();
    println!("Rows:");
    println!("  Live rows:  {}", result.live_rows);
    println!("  Tombstones: {}", result.tombstones);
    println!();
    println!("Sync:");
    println!("  Pending outbox: {}", result.pending_outbox);
    println!("  Flushed outbox: {}", result.flushed_outbox);
    println!("  Watermark:      wm:{}", result.watermark);

    if !result.clean {
        println!();
        println!("Run `sitesync verify` for details");
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
