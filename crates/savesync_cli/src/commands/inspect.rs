//! Inspect command implementation.

use super::{format_size, open_snapshot};
use savesync_engine::{ArchivePhase, ArchiveRecord, ArchiveStorage, TempRecordArchive};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Archive inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Archive path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Frames in the log.
    pub frames: usize,
    /// Frames no longer describing a live record.
    pub superseded_frames: usize,
    /// Bytes of an incomplete trailing frame.
    pub torn_bytes: u64,
    /// Live records.
    pub records: usize,
    /// Per-player breakdown.
    pub players: Vec<PlayerSummary>,
    /// The oldest live record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest: Option<RecordSummary>,
}

/// Pending saves of one player.
#[derive(Debug, Default, Serialize, PartialEq, Eq)]
pub struct PlayerSummary {
    /// Player ID.
    pub player_id: String,
    /// Sealed batches never submitted.
    pub queued: usize,
    /// Batches submitted and awaiting a receipt.
    pub submitted: usize,
    /// Batches that exhausted their retries.
    pub escalated: usize,
}

/// Short description of one record.
#[derive(Debug, Serialize)]
pub struct RecordSummary {
    /// Session batch ID.
    pub session_batch_id: String,
    /// Player ID.
    pub player_id: String,
    /// Batch kind.
    pub kind: String,
    /// Archive phase.
    pub phase: String,
    /// Creation timestamp.
    pub created_at: String,
    /// Failed attempts.
    pub retry_count: u32,
}

impl From<&ArchiveRecord> for RecordSummary {
    fn from(record: &ArchiveRecord) -> Self {
        Self {
            session_batch_id: record.session_batch_id.to_string(),
            player_id: record.player_id.to_string(),
            kind: record.kind.label().to_string(),
            phase: record.phase.label().to_string(),
            created_at: record.created_at.to_string(),
            retry_count: record.retry_count,
        }
    }
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let archive = open_snapshot(path)?;
    let result = inspect(path, &archive)?;

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

/// Summarizes a replayed archive.
pub fn inspect<S: ArchiveStorage>(
    path: &Path,
    archive: &TempRecordArchive<S>,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let replay = archive.replay_summary();
    let records = archive.records_in_order();

    Ok(InspectResult {
        path: path.display().to_string(),
        size: archive.storage().size()?,
        frames: archive.frame_count(),
        superseded_frames: archive.superseded_count(),
        torn_bytes: replay.torn_bytes,
        records: records.len(),
        players: summarize_players(&records),
        oldest: records.first().map(|record| RecordSummary::from(*record)),
    })
}

fn summarize_players(records: &[&ArchiveRecord]) -> Vec<PlayerSummary> {
    let mut players: BTreeMap<String, PlayerSummary> = BTreeMap::new();
    for record in records {
        let id = record.player_id.to_string();
        let summary = players.entry(id.clone()).or_insert_with(|| PlayerSummary {
            player_id: id,
            ..PlayerSummary::default()
        });
        match record.phase {
            ArchivePhase::Queued => summary.queued += 1,
            ArchivePhase::Submitted => summary.submitted += 1,
            ArchivePhase::Escalated => summary.escalated += 1,
        }
    }
    players.into_values().collect()
}

fn print_text_output(result: &InspectResult) {
    println!("SaveSync Archive Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Log:");
    println!("  Size:       {}", format_size(result.size));
    println!("  Frames:     {}", result.frames);
    println!("  Superseded: {}", result.superseded_frames);
    if result.torn_bytes > 0 {
        println!("  Torn tail:  {} bytes (truncated on next open)", result.torn_bytes);
    }
    println!();
    println!("Pending saves: {}", result.records);

    if !result.players.is_empty() {
        println!();
        println!("Players:");
        for player in &result.players {
            println!(
                "  [{}] {} queued, {} submitted, {} escalated",
                player.player_id, player.queued, player.submitted, player.escalated
            );
        }
    }

    if let Some(oldest) = &result.oldest {
        println!();
        println!("Oldest:");
        println!(
            "  {} {} ({}, {}, created {}, {} retries)",
            oldest.player_id,
            oldest.session_batch_id,
            oldest.kind,
            oldest.phase,
            oldest.created_at,
            oldest.retry_count
        );
    }
}
