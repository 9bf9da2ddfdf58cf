//! Retry command implementation.

use super::open_offline;
use std::path::Path;

/// Runs the retry command.
pub fn run(path: &Path, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_offline(path, key)?;

    let parked = engine.parked_operations();
    if parked.is_empty() {
        println!("No parked operations in '{}'", key);
        return Ok(());
    }

    for op in &parked {
        println!(
            "  {} {:?} {}/{} retries={}",
            op.id, op.kind, op.entity_type, op.entity_id, op.retry_count
        );
    }
    let released = engine.retry_parked();
    println!("{} operation(s) back in the queue", released);

    if engine.persist_failure_count() > 0 {
        return Err("Failed to write the updated snapshot".into());
    }
    Ok(())
}
