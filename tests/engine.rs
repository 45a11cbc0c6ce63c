mod common;

use futures::TryStreamExt;
use serde_json::json;

use companion_memory::domains::event::EventFilter;
use companion_memory::interfaces::audit::AuditRecord;
use companion_memory::{
    BehavioralSignal, CompanionEngine, CompanionError, Config, MemoryObservation, MemorySource,
    MemoryType, ObserveOutcome,
};

fn signal(at: i64) -> BehavioralSignal {
    BehavioralSignal::new(common::event("skipped_meal", at)).with_memory(MemoryObservation::new(
        MemoryType::Behavioral,
        "skips_lunch",
        json!({"meal": "lunch"}),
        MemorySource::System,
        at,
    ))
}

#[tokio::test]
async fn ingest_records_counts_and_reinforces() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;

    let first = engine.ingest(user, signal(100)).await.unwrap();
    assert!(!first.event.duplicate);
    let pattern = first.pattern.unwrap();
    assert_eq!(pattern.outcome, ObserveOutcome::Created);
    assert_eq!(first.memory.unwrap().reinforcement_count, 1);

    let second = engine.ingest(user, signal(200)).await.unwrap();
    assert_eq!(second.pattern.unwrap().pattern.occurrence_count, 2);
    let memory = second.memory.unwrap();
    assert_eq!(memory.reinforcement_count, 2);
    assert!((memory.confidence_score - 0.59).abs() < 1e-9);

    let without_memory = engine
        .ingest(user, BehavioralSignal::new(common::event("late_night", 300)))
        .await
        .unwrap();
    assert!(without_memory.memory.is_none());
    assert_eq!(engine.list_patterns(user, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_delivery_counts_once() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;

    let mut delivery = signal(100);
    delivery.event = delivery.event.with_idempotency_key("msg-42");
    let first = engine.ingest(user, delivery.clone()).await.unwrap();
    let retry = engine.ingest(user, delivery).await.unwrap();

    assert!(retry.event.duplicate);
    assert_eq!(retry.event.id, first.event.id);
    assert!(retry.pattern.is_none());
    assert!(retry.memory.is_none());

    let pattern = engine
        .get_pattern(user, "repeated:skipped_meal")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.occurrence_count, 1);
    let memory = engine.get_memory(user, "skips_lunch").await.unwrap().unwrap();
    assert_eq!(memory.reinforcement_count, 1);
}

#[tokio::test]
async fn failed_step_rolls_back_the_whole_ingest() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;
    engine
        .reinforce(
            user,
            MemoryObservation::new(
                MemoryType::Trust,
                "skips_lunch",
                json!(true),
                MemorySource::Manual,
                1,
            ),
        )
        .await
        .unwrap();

    let err = engine.ingest(user, signal(100)).await.unwrap_err();
    assert!(matches!(err, CompanionError::Validation(_)));

    let events: Vec<_> = engine
        .query_events(user, EventFilter::default())
        .try_collect()
        .await
        .unwrap();
    assert!(events.is_empty());
    assert!(engine.list_patterns(user, None).await.unwrap().is_empty());
    let memory = engine.get_memory(user, "skips_lunch").await.unwrap().unwrap();
    assert_eq!(memory.reinforcement_count, 1);
}

#[tokio::test]
async fn failures_reach_the_audit_sink() {
    let common::TestEngine { engine, dir: _dir } = common::engine().await;
    let sink = common::RecordingAuditSink::new();
    let engine = engine.with_audit_sink(sink.clone());

    let err = engine.observe(404, "skipped_meal", 1).await.unwrap_err();
    assert!(matches!(err, CompanionError::Reference(_)));
    let user = common::create_user(&engine, "ada@example.com").await;
    engine.observe(user, "skipped_meal", 1).await.unwrap();

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].kind, "reference");
    assert_eq!(records[0].operation, "observe");
    assert_eq!(records[0].user_id, Some(404));
    assert_eq!(records[0].context["event_key"], "skipped_meal");
}

#[tokio::test]
async fn audit_log_path_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit").join("companion_audit.log");
    let config: Config = serde_json::from_value(json!({
        "storage": {"sqlite_path": dir.path().join("companion.db").to_string_lossy()},
        "audit": {"log_path": audit_path.to_string_lossy()}
    }))
    .unwrap();
    let engine = CompanionEngine::open(config).await.unwrap();

    engine.resolve(1, "repeated:nothing").await.unwrap_err();
    engine.delete_user(1).await.unwrap_err();

    let content = std::fs::read_to_string(&audit_path).unwrap();
    let records: Vec<AuditRecord> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].operation, "resolve");
    assert_eq!(records[1].operation, "delete_user");
    assert!(records.iter().all(|r| r.kind == "reference"));
}

#[tokio::test]
async fn opens_from_a_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    let db_path = dir.path().join("nested").join("companion.db");
    std::fs::write(
        &config_path,
        serde_json::to_string(&json!({
            "storage": {"sqlite_path": db_path.to_string_lossy(), "pool_size": 2},
            "patterns": {"key_prefix": "habit"}
        }))
        .unwrap(),
    )
    .unwrap();

    let engine = CompanionEngine::from_config_path(&config_path).await.unwrap();
    let user = common::create_user(&engine, "ada@example.com").await;
    let observation = engine.observe(user, "skipped_meal", 1).await.unwrap();
    assert_eq!(observation.pattern.pattern_key, "habit:skipped_meal");
    assert!(db_path.exists());
}

#[tokio::test]
async fn bad_configuration_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let missing = CompanionEngine::from_config_path(dir.path().join("missing.json")).await;
    assert!(matches!(missing, Err(CompanionError::Config(_))));

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(
        Config::from_file(&broken),
        Err(CompanionError::Config(_))
    ));

    let config: Config = serde_json::from_value(json!({
        "storage": {"sqlite_path": dir.path().join("c.db").to_string_lossy()},
        "reinforcement": {"rate": 1.5}
    }))
    .unwrap();
    assert!(matches!(
        CompanionEngine::open(config).await,
        Err(CompanionError::Config(_))
    ));
}

#[tokio::test]
async fn users_are_unique_by_normalized_email() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "Ada@Example.com").await;
    let found = engine
        .users()
        .find_by_email("  ada@example.COM ")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, user);

    let err = engine
        .users()
        .create_user(companion_memory::NewUser::new("ADA@example.com", "hash"))
        .await
        .unwrap_err();
    assert!(matches!(err, CompanionError::ConstraintViolation(_)));

    let logged_in = engine.users().record_login(user, 1234).await.unwrap();
    assert_eq!(logged_in.last_login_at, Some(1234));
}
