//! Benchmark utilities.

use rand::Rng;
use savesync_protocol::{
    BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SaveBatch, SessionBatchId,
};

/// Generate `count` integer instructions with keys `key_0..key_{count-1}`.
pub fn integer_instructions(count: usize) -> Instructions {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| (format!("key_{}", i), rng.gen::<i64>()))
        .collect()
}

/// Generate `count` instructions mixing text, bytes and nested maps.
pub fn mixed_instructions(count: usize) -> Instructions {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let value = match i % 3 {
                0 => InstructionValue::Text(format!("value_{}", rng.gen::<u32>())),
                1 => InstructionValue::Bytes((0..32).map(|_| rng.gen()).collect()),
                _ => InstructionValue::Map(
                    (0..4)
                        .map(|j| (format!("field_{}", j), InstructionValue::Integer(rng.gen())))
                        .collect(),
                ),
            };
            (format!("path.{}.entry", i), value)
        })
        .collect()
}

/// Create a batch for player `P1` at logical time `seq`.
pub fn batch(kind: BatchKind, seq: u64, instructions: Instructions) -> SaveBatch {
    SaveBatch::create(
        kind,
        PlayerId::new("P1"),
        SessionBatchId::new_random(),
        BatchTimestamp::new(seq, seq),
        instructions,
    )
}

/// Create two batches of `size` instructions that share `overlap` keys.
pub fn overlapping_pair(size: usize, overlap: usize) -> (SaveBatch, SaveBatch) {
    let older = batch(BatchKind::Slim, 1, integer_instructions(size));
    let offset = size.saturating_sub(overlap);
    let mut rng = rand::thread_rng();
    let newer_instructions: Instructions = (offset..offset + size)
        .map(|i| (format!("key_{}", i), rng.gen::<i64>()))
        .collect();
    let newer = batch(BatchKind::Heavy, 2, newer_instructions);
    (older, newer)
}
