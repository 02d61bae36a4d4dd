//! Compact command implementation.

use super::{format_size, open_snapshot};
use savesync_engine::{ArchiveConfig, CompactionStats, TempRecordArchive};
use std::path::Path;
use tracing::info;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    println!("Compacting archive at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = if dry_run {
        // The snapshot is an in-memory copy, so compacting it is harmless
        open_snapshot(path)?.compact()?
    } else {
        if !path.exists() {
            return Err(format!("No archive found at {}", path.display()).into());
        }
        info!("Compacting archive {:?}", path);
        let mut archive = TempRecordArchive::open_file(path, ArchiveConfig::default())?;
        archive.compact()?
    };

    print_stats(&stats);

    println!();
    if dry_run {
        return Ok(());
    }
    if stats.frames_after < stats.frames_before {
        println!("✓ Compaction complete");
    } else {
        println!("No compaction needed - archive is already optimal");
    }
    Ok(())
}

fn print_stats(stats: &CompactionStats) {
    let saved = stats.bytes_before.saturating_sub(stats.bytes_after);
    println!("Compaction Analysis:");
    println!("  Frames before: {}", stats.frames_before);
    println!("  Frames after:  {}", stats.frames_after);
    println!();
    println!("  Size before: {}", format_size(stats.bytes_before));
    println!("  Size after:  {}", format_size(stats.bytes_after));
    println!(
        "  Space saved: {} ({:.1}%)",
        format_size(saved),
        if stats.bytes_before > 0 {
            (saved as f64 / stats.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
}
