//! Clear command implementation.

use super::open_offline;
use std::path::Path;

/// Runs the clear command.
pub fn run(path: &Path, key: &str, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    let engine = open_offline(path, key)?;
    let queued = engine.count();
    let conflicts = engine.conflicts().len();

    println!("Clearing snapshot '{}' at {:?}", key, path);
    if dry_run {
        println!("(dry run - no changes will be made)");
        println!("  Operations: {} would be dropped", queued);
        println!("  Conflicts:  {} would be dropped", conflicts);
        return Ok(());
    }

    let dropped = engine.clear_pending_operations();
    println!("  Operations: {} dropped", dropped);
    println!("  Conflicts:  {} dropped", conflicts);
    println!("  Stats reset");

    if engine.persist_failure_count() > 0 {
        return Err("Failed to write the cleared snapshot".into());
    }
    Ok(())
}
