mod common;

use futures::TryStreamExt;
use serde_json::json;

use companion_memory::domains::event::EventFilter;
use companion_memory::{CompanionError, EventSource, NewEvent, Severity};

#[tokio::test]
async fn records_and_reads_back_events() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;

    let event = common::event("skipped_meal", 100).with_context(json!({"meal": "lunch"}));
    let recorded = engine.record_event(user, event).await.unwrap();
    assert!(!recorded.duplicate);

    let events: Vec<_> = engine
        .query_events(user, EventFilter::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let stored = &events[0];
    assert_eq!(stored.id, recorded.id);
    assert_eq!(stored.user_id, user);
    assert_eq!(stored.event_key, "skipped_meal");
    assert_eq!(stored.severity, Severity::Medium);
    assert_eq!(stored.source, EventSource::User);
    assert_eq!(stored.context, Some(json!({"meal": "lunch"})));
    assert_eq!(stored.occurred_at, 100);
    assert!(stored.recorded_at > 0);
}

#[tokio::test]
async fn unknown_user_is_a_reference_error() {
    let engine = common::engine().await;
    let err = engine
        .record_event(4242, common::event("skipped_meal", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CompanionError::Reference(_)));
}

#[tokio::test]
async fn blank_keys_and_unknown_enums_are_rejected() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;

    let err = engine
        .record_event(user, common::event("   ", 1))
        .await
        .unwrap_err();
    assert!(matches!(err, CompanionError::Validation(_)));

    let parsed = serde_json::from_value::<NewEvent>(json!({
        "event_type": "behavior",
        "event_key": "skipped_meal",
        "severity": "critical",
        "source": "user",
        "occurred_at": 1
    }));
    assert!(parsed.is_err());

    let events: Vec<_> = engine
        .query_events(user, EventFilter::default())
        .try_collect()
        .await
        .unwrap();
    assert!(events.is_empty());
}

#[tokio::test]
async fn stream_is_ordered_across_pages_and_restartable() {
    let engine = common::engine_with(json!({"storage": {"page_size": 2}})).await;
    let user = common::create_user(&engine, "ada@example.com").await;
    let other = common::create_user(&engine, "bob@example.com").await;

    for at in [50, 10, 30, 30, 20, 40] {
        engine
            .record_event(user, common::event("skipped_meal", at))
            .await
            .unwrap();
    }
    engine
        .record_event(user, common::event("late_night", 25))
        .await
        .unwrap();
    engine
        .record_event(other, common::event("skipped_meal", 15))
        .await
        .unwrap();

    let filter = EventFilter::key("skipped_meal");
    let first: Vec<_> = engine
        .query_events(user, filter.clone())
        .try_collect()
        .await
        .unwrap();
    let times: Vec<i64> = first.iter().map(|e| e.occurred_at).collect();
    assert_eq!(times, vec![10, 20, 30, 30, 40, 50]);
    assert!(first[2].id < first[3].id);
    assert!(first.iter().all(|e| e.user_id == user));

    let again: Vec<_> = engine
        .query_events(user, filter.clone())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(
        again.iter().map(|e| e.id).collect::<Vec<_>>(),
        first.iter().map(|e| e.id).collect::<Vec<_>>()
    );

    let since: Vec<_> = engine
        .query_events(user, filter.since(30))
        .try_collect()
        .await
        .unwrap();
    assert_eq!(since.len(), 4);

    let everything: Vec<_> = engine
        .query_events(user, EventFilter::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(everything.len(), 7);
}

#[tokio::test]
async fn idempotency_key_suppresses_repeat_delivery() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;
    let other = common::create_user(&engine, "bob@example.com").await;

    let first = engine
        .record_event(
            user,
            common::event("skipped_meal", 1).with_idempotency_key("delivery-1"),
        )
        .await
        .unwrap();
    let repeat = engine
        .record_event(
            user,
            common::event("skipped_meal", 2).with_idempotency_key("delivery-1"),
        )
        .await
        .unwrap();
    assert!(!first.duplicate);
    assert!(repeat.duplicate);
    assert_eq!(first.id, repeat.id);

    let elsewhere = engine
        .record_event(
            other,
            common::event("skipped_meal", 1).with_idempotency_key("delivery-1"),
        )
        .await
        .unwrap();
    assert!(!elsewhere.duplicate);

    let stored: Vec<_> = engine
        .query_events(user, EventFilter::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].idempotency_key.as_deref(), Some("delivery-1"));
}

#[tokio::test]
async fn recent_events_are_newest_first() {
    let engine = common::engine().await;
    let user = common::create_user(&engine, "ada@example.com").await;
    for at in [1, 5, 3, 4] {
        engine
            .record_event(user, common::event("skipped_meal", at))
            .await
            .unwrap();
    }
    let id = engine
        .events()
        .record_event(user, common::event("skipped_meal", 2))
        .await
        .unwrap();
    let recent = engine.recent_events(user, "skipped_meal", 3).await.unwrap();
    assert!(recent.iter().all(|e| e.id != id));
    let times: Vec<i64> = recent.iter().map(|e| e.occurred_at).collect();
    assert_eq!(times, vec![5, 4, 3]);
    assert!(engine
        .recent_events(user, "skipped_meal", 0)
        .await
        .unwrap()
        .is_empty());
    assert!(engine
        .recent_events(user, "unknown", 3)
        .await
        .unwrap()
        .is_empty());
}
