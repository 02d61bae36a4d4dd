//! Property-based test generators using proptest.
//!
//! Strategies produce values that satisfy the protocol's own rules: keys
//! are non-empty, nested values stay shallow, and batches in a generated
//! pair always belong to the same player.

use proptest::prelude::*;
use savesync_protocol::{
    BatchKind, BatchTimestamp, InstructionValue, Instructions, PlayerId, SaveBatch, SessionBatchId,
};
use std::collections::BTreeMap;

/// Strategy for generating player IDs.
pub fn player_id_strategy() -> impl Strategy<Value = PlayerId> {
    prop::string::string_regex("P[0-9]{1,4}")
        .expect("Invalid regex")
        .prop_map(PlayerId::new)
}

/// Strategy for generating session batch IDs.
pub fn session_batch_id_strategy() -> impl Strategy<Value = SessionBatchId> {
    prop::array::uniform16(any::<u8>()).prop_map(SessionBatchId::from_bytes)
}

/// Strategy for generating dotted field paths.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{1,8}(\\.[a-z]{1,6}){0,2}").expect("Invalid regex")
}

/// Strategy for generating scalar instruction values.
pub fn scalar_value_strategy() -> impl Strategy<Value = InstructionValue> {
    prop_oneof![
        Just(InstructionValue::Null),
        any::<bool>().prop_map(InstructionValue::Bool),
        any::<i64>().prop_map(InstructionValue::Integer),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(InstructionValue::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(InstructionValue::Bytes),
    ]
}

/// Strategy for generating instruction values, nested at most two levels.
pub fn instruction_value_strategy() -> impl Strategy<Value = InstructionValue> {
    scalar_value_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(InstructionValue::List),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(InstructionValue::Map),
        ]
    })
}

/// Strategy for generating integer-only instruction sets.
///
/// Any two such sets are resolvable against each other.
pub fn integer_instructions_strategy(max_keys: usize) -> impl Strategy<Value = Instructions> {
    prop::collection::btree_map(key_strategy(), any::<i64>(), 1..=max_keys.max(1))
        .prop_map(|map| map.into_iter().collect())
}

/// Strategy for generating instruction sets with arbitrary values.
pub fn instructions_strategy(max_keys: usize) -> impl Strategy<Value = Instructions> {
    prop::collection::btree_map(
        key_strategy(),
        instruction_value_strategy(),
        1..=max_keys.max(1),
    )
    .prop_map(|map: BTreeMap<String, InstructionValue>| map.into_iter().collect())
}

/// Strategy for generating batch kinds.
pub fn batch_kind_strategy() -> impl Strategy<Value = BatchKind> {
    prop::sample::select(BatchKind::ALL.to_vec())
}

/// Strategy for generating batch timestamps.
pub fn timestamp_strategy() -> impl Strategy<Value = BatchTimestamp> {
    (0u64..10_000, 0u64..1_000_000).prop_map(|(seq, wall)| BatchTimestamp::new(seq, wall))
}

/// Strategy for generating a batch for `player`.
pub fn batch_strategy(player: PlayerId) -> impl Strategy<Value = SaveBatch> {
    (
        batch_kind_strategy(),
        session_batch_id_strategy(),
        timestamp_strategy(),
        integer_instructions_strategy(6),
    )
        .prop_map(move |(kind, id, at, instructions)| {
            SaveBatch::create(kind, player.clone(), id, at, instructions)
        })
}

/// Strategy for generating two batches of one player with distinct
/// timestamps and distinct IDs.
pub fn batch_pair_strategy() -> impl Strategy<Value = (SaveBatch, SaveBatch)> {
    (
        player_id_strategy(),
        (batch_kind_strategy(), batch_kind_strategy()),
        (session_batch_id_strategy(), session_batch_id_strategy()),
        (0u64..10_000, 1u64..1_000),
        (
            integer_instructions_strategy(6),
            integer_instructions_strategy(6),
        ),
    )
        .prop_filter("IDs must differ", |(_, _, (a, b), _, _)| a != b)
        .prop_map(|(player, (ka, kb), (ia, ib), (seq, gap), (xa, xb))| {
            let a = SaveBatch::create(ka, player.clone(), ia, BatchTimestamp::new(seq, 0), xa);
            let b = SaveBatch::create(kb, player, ib, BatchTimestamp::new(seq + gap, 0), xb);
            (a, b)
        })
}

/// Strategy for generating a pair whose instruction sets share no key.
pub fn disjoint_batch_pair_strategy() -> impl Strategy<Value = (SaveBatch, SaveBatch)> {
    batch_pair_strategy().prop_filter("instructions must be disjoint", |(a, b)| {
        a.instructions().is_disjoint(b.instructions())
    })
}

/// Strategy for generating a pair sharing at least one key.
pub fn overlapping_batch_pair_strategy() -> impl Strategy<Value = (SaveBatch, SaveBatch)> {
    (batch_pair_strategy(), key_strategy(), any::<i64>(), any::<i64>()).prop_map(
        |((a, b), key, va, vb)| (with_instruction(a, &key, va), with_instruction(b, &key, vb)),
    )
}

fn with_instruction(batch: SaveBatch, key: &str, value: i64) -> SaveBatch {
    let mut instructions = batch.instructions().clone();
    instructions.insert(key, value);
    let mut rebuilt = SaveBatch::create(
        batch.kind(),
        batch.player_id().clone(),
        batch.session_batch_id(),
        batch.created_at(),
        instructions,
    );
    if batch.is_urgent() {
        rebuilt.mark_urgent();
    }
    rebuilt
}
