//! Temp record archive benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use savesync_bench::{batch, integer_instructions};
use savesync_engine::{ArchiveConfig, MemoryArchiveStorage, TempRecordArchive};
use savesync_protocol::BatchKind;
use tempfile::TempDir;

/// Benchmark in-memory appends.
fn bench_memory_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_append");

    for size in [1, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut archive = TempRecordArchive::in_memory();
            let mut seq = 0;
            b.iter(|| {
                seq += 1;
                let batch = batch(BatchKind::Slim, seq, integer_instructions(size));
                archive.append(black_box(&batch)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark file appends with and without sync.
fn bench_file_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_append");
    group.sample_size(20);

    for sync in [false, true] {
        let name = if sync { "synced" } else { "unsynced" };
        group.bench_function(name, |b| {
            let dir = TempDir::new().unwrap();
            let config = ArchiveConfig::default().with_sync_on_write(sync);
            let mut archive =
                TempRecordArchive::open_file(&dir.path().join("pending.archive"), config).unwrap();
            let mut seq = 0;
            b.iter(|| {
                seq += 1;
                let batch = batch(BatchKind::Critical, seq, integer_instructions(8));
                archive.append(black_box(&batch)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark replaying an archive on open.
fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");

    for records in [100, 1_000].iter() {
        let storage = MemoryArchiveStorage::new();
        {
            let mut archive =
                TempRecordArchive::open(storage.clone(), ArchiveConfig::default()).unwrap();
            for seq in 0..*records as u64 {
                archive
                    .append(&batch(BatchKind::Slim, seq, integer_instructions(8)))
                    .unwrap();
            }
        }
        let data = storage.data();

        group.bench_with_input(BenchmarkId::from_parameter(records), &data, |b, data| {
            b.iter(|| {
                let archive = TempRecordArchive::open(
                    MemoryArchiveStorage::with_data(data.clone()),
                    ArchiveConfig::default(),
                )
                .unwrap();
                black_box(archive.len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_memory_append, bench_file_append, bench_replay);

criterion_main!(benches);
