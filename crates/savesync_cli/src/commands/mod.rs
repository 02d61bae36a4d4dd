//! CLI command implementations.

pub mod compact;
pub mod dump;
pub mod inspect;
pub mod verify;

use savesync_engine::{ArchiveConfig, MemoryArchiveStorage, TempRecordArchive};
use std::path::Path;
use tracing::debug;

/// Replays a copy of the archive at `path` without locking or touching it.
pub fn open_snapshot(path: &Path) -> Result<TempRecordArchive, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No archive found at {}", path.display()).into());
    }
    let data = std::fs::read(path)?;
    debug!(bytes = data.len(), "Loaded archive snapshot from {:?}", path);
    let config = ArchiveConfig::new()
        .with_sync_on_write(false)
        .with_compact_threshold(0);
    Ok(TempRecordArchive::open(
        MemoryArchiveStorage::with_data(data),
        config,
    )?)
}

/// Formats a byte count for humans.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
