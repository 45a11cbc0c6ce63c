use std::time::Duration;

use companion_memory::{
    BehavioralSignal, CompanionEngine, Config, EventSource, MemoryObservation, MemorySource,
    MemoryType, NewEvent, NewUser, Severity,
};
use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;

fn bench_keys() -> usize {
    std::env::var("INGEST_BENCH_KEYS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(16)
}

fn bench_ingest(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("bench.db");
    let (engine, user) = rt.block_on(async {
        let engine = CompanionEngine::open(Config::with_sqlite_path(
            db_path.to_string_lossy().to_string(),
        ))
        .await
        .unwrap();
        let user = engine
            .users()
            .create_user(NewUser::new("bench@example.com", "hash"))
            .await
            .unwrap();
        (engine, user.id)
    });
    let keys = bench_keys();

    let mut group = c.benchmark_group("ingest");
    group.measurement_time(Duration::from_secs(10));

    let mut tick: i64 = 0;
    group.bench_function("observe", |b| {
        b.iter(|| {
            tick += 1;
            let key = format!("key_{}", tick as usize % keys);
            rt.block_on(async { engine.observe(user, &key, tick).await.unwrap() });
        })
    });

    group.bench_function("ingest_with_memory", |b| {
        b.iter(|| {
            tick += 1;
            let key = format!("key_{}", tick as usize % keys);
            let signal = BehavioralSignal::new(NewEvent::new(
                "behavior",
                key.clone(),
                Severity::Low,
                EventSource::System,
                tick,
            ))
            .with_memory(MemoryObservation::new(
                MemoryType::Behavioral,
                key,
                json!({"tick": tick}),
                MemorySource::System,
                tick,
            ));
            rt.block_on(async { engine.ingest(user, signal).await.unwrap() });
        })
    });

    group.finish();
}

criterion_group!(benches, bench_ingest);
criterion_main!(benches);
