use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use sss_backup::backup::{select_for_deletion, ArtifactKey, RemoteBackupEntry, RetentionPolicy};

fn listing(count: i64) -> Vec<String> {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| ArtifactKey::new("host", start + Duration::hours(i)).key())
        .collect()
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("retention_selection");
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    for count in [100i64, 1_000, 10_000] {
        let keys = listing(count);
        let entries: Vec<RemoteBackupEntry> = keys
            .iter()
            .filter_map(|k| RemoteBackupEntry::from_key(k, "host"))
            .collect();
        let current = ArtifactKey::new("host", now).key();
        let policy = RetentionPolicy::MaxAge(Duration::days(30));

        group.bench_with_input(BenchmarkId::new("parse_keys", count), &keys, |b, keys| {
            b.iter(|| {
                keys.iter()
                    .filter_map(|k| RemoteBackupEntry::from_key(black_box(k), "host"))
                    .count()
            })
        });

        group.bench_with_input(BenchmarkId::new("max_age", count), &entries, |b, entries| {
            b.iter(|| select_for_deletion(black_box(entries), &policy, &current, now))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_selection);
criterion_main!(benches);
