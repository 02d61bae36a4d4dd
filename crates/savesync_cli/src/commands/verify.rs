//! Verify command implementation.

use savesync_engine::{scan_frames, ArchiveFrame};
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of frames checked.
    pub frames_checked: usize,
    /// Number of upsert frames whose stored hash matches.
    pub valid_records: usize,
    /// Number of records that are live after replay.
    pub live_records: usize,
    /// Bytes of an incomplete trailing frame.
    pub torn_bytes: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No archive found at {}", path.display()).into());
    }

    println!("Verifying archive at {}", path.display());
    println!();

    let data = std::fs::read(path)?;
    let result = verify_bytes(&data);
    print_result(&result);

    println!();
    if result.is_ok() {
        println!("✓ Archive verification passed");
        Ok(())
    } else {
        println!("✗ Archive verification failed");
        Err("Verification failed".into())
    }
}

/// Checks every frame checksum and every stored save hash in `data`.
pub fn verify_bytes(data: &[u8]) -> VerifyResult {
    let mut result = VerifyResult::default();

    let scan = match scan_frames(data) {
        Ok(scan) => scan,
        Err(err) => {
            result.errors.push(err.to_string());
            return result;
        }
    };
    result.torn_bytes = scan.torn_bytes;

    let mut live = HashSet::new();
    for (offset, frame) in &scan.frames {
        result.frames_checked += 1;
        match frame {
            ArchiveFrame::Upsert(record) => {
                match record.verify_hash() {
                    Ok(()) => result.valid_records += 1,
                    Err(err) => result.errors.push(format!("offset {offset}: {err}")),
                }
                live.insert(record.session_batch_id);
            }
            ArchiveFrame::Remove(id) => {
                live.remove(id);
            }
        }
    }
    result.live_records = live.len();

    result
}

fn print_result(result: &VerifyResult) {
    println!("  Frames checked: {}", result.frames_checked);
    println!("  Valid records:  {}", result.valid_records);
    println!("  Live records:   {}", result.live_records);
    if result.torn_bytes > 0 {
        println!(
            "  Torn tail:      {} bytes (an interrupted write; dropped on next open)",
            result.torn_bytes
        );
    }

    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }
}
