//! Outbox command implementation.

use serde::Serialize;
use sitesync_store::Store;
use std::path::Path;

/// One outbox record as listed by the CLI.
#[derive(Debug, Serialize)]
pub struct OutboxRow {
    /// Record ID; upload order equals id order.
    pub id: u64,
    /// Flush state (pending or flushed).
    pub state: &'static str,
    /// Operation kind.
    pub op: &'static str,
    /// Origin timestamp in milliseconds.
    pub origin_ts: u64,
    /// Entity the change addresses.
    pub entity: String,
}

/// Runs the outbox command.
///
/// Opens the store, which takes its exclusive lock: stop the site process
/// first.
pub fn run(
    path: &Path,
    all: bool,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::open(path)?;

    let mut rows: Vec<OutboxRow> = store
        .outbox_records()
        .into_iter()
        .filter(|record| all || record.is_pending())
        .map(|record| OutboxRow {
            id: record.id.as_u64(),
            state: if record.is_pending() {
                "pending"
            } else {
                "flushed"
            },
            op: record.op.as_str(),
            origin_ts: record.origin_ts.as_millis(),
            entity: record.entity.to_string(),
        })
        .collect();

    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        _ => {
            print_text_output(&rows, all);
        }
    }

    Ok(())
}

fn print_text_output(rows: &[OutboxRow], all: bool) {
    if rows.is_empty() {
        if all {
            println!("Outbox is empty");
        } else {
            println!("No pending outbox records");
        }
        return;
    }

    println!(
        "{:<10} {:<8} {:<7} {:<14} ENTITY",
        "ID", "STATE", "OP", "ORIGIN_TS"
    );
    for row in rows {
        println!(
            "{:<10} {:<8} {:<7} {:<14} {}",
            row.id, row.state, row.op, row.origin_ts, row.entity
        );
    }
    println!();
    println!("{} record(s)", rows.len());
}
