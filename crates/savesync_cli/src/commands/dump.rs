//! Dump command implementation.

use savesync_engine::{scan_frames, ArchiveFrame};
use serde::Serialize;
use std::path::Path;

/// Archive frame representation for output.
#[derive(Debug, Serialize)]
pub struct FrameInfo {
    /// Offset in the archive file.
    pub offset: u64,
    /// Frame operation.
    pub op: String,
    /// Session batch ID.
    pub session_batch_id: String,
    /// Player ID (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,
    /// Batch kind (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Archive phase (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Creation timestamp (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Failed attempts (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Instruction paths and values (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Vec<(String, String)>>,
    /// Expected save hash (upserts only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
}

impl FrameInfo {
    fn new(offset: u64, frame: &ArchiveFrame) -> Self {
        match frame {
            ArchiveFrame::Upsert(record) => Self {
                offset,
                op: "UPSERT".into(),
                session_batch_id: record.session_batch_id.to_string(),
                player_id: Some(record.player_id.to_string()),
                kind: Some(record.kind.label().into()),
                phase: Some(record.phase.label().into()),
                created_at: Some(record.created_at.to_string()),
                retry_count: Some(record.retry_count),
                instructions: Some(
                    record
                        .instructions
                        .iter()
                        .map(|(key, value)| (key.clone(), value.to_string()))
                        .collect(),
                ),
                expected_hash: Some(record.expected_hash.to_hex()),
            },
            ArchiveFrame::Remove(id) => Self {
                offset,
                op: "REMOVE".into(),
                session_batch_id: id.to_string(),
                player_id: None,
                kind: None,
                phase: None,
                created_at: None,
                retry_count: None,
                instructions: None,
                expected_hash: None,
            },
        }
    }
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    limit: Option<usize>,
    start_offset: u64,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No archive found at {}", path.display()).into());
    }

    let data = std::fs::read(path)?;
    let frames = read_frames(&data, start_offset, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&frames)?);
        }
        _ => {
            print_text_output(&frames);
        }
    }

    Ok(())
}

/// Decodes the frames at or after `start_offset`.
pub fn read_frames(
    data: &[u8],
    start_offset: u64,
    limit: Option<usize>,
) -> Result<Vec<FrameInfo>, Box<dyn std::error::Error>> {
    let scan = scan_frames(data)?;
    Ok(scan
        .frames
        .iter()
        .filter(|(offset, _)| *offset >= start_offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(offset, frame)| FrameInfo::new(*offset, frame))
        .collect())
}

fn print_text_output(frames: &[FrameInfo]) {
    if frames.is_empty() {
        println!("No frames");
        return;
    }

    for frame in frames {
        print!("{:>8}  {:<6}  {}", frame.offset, frame.op, frame.session_batch_id);
        if let (Some(player), Some(kind), Some(phase)) = (&frame.player_id, &frame.kind, &frame.phase)
        {
            print!(
                "  player={} kind={} phase={} retries={}",
                player,
                kind,
                phase,
                frame.retry_count.unwrap_or(0)
            );
        }
        println!();

        if let Some(instructions) = &frame.instructions {
            for (key, value) in instructions {
                println!("{:>10}{} = {}", "", key, value);
            }
        }
    }
}
