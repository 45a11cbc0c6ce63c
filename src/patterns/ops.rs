use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;

use crate::db::schema::behavior_patterns;
use crate::db::{decode_optional_json, encode_json};
use crate::domains::pattern::{BehaviorPattern, ObserveOutcome, Observation, PatternStatus};
use crate::error::{CompanionError, Result};
use crate::guard;
use crate::policy::{self, PatternCounters};

#[derive(Queryable)]
pub(super) struct PatternRow {
    id: i32,
    user_id: i32,
    pattern_key: String,
    related_event_key: String,
    occurrence_count: i64,
    first_seen_at: i64,
    last_seen_at: i64,
    status: String,
    metadata: Option<String>,
    _created_at: i64,
    updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = behavior_patterns)]
struct NewPatternRow<'a> {
    user_id: i32,
    pattern_key: &'a str,
    related_event_key: &'a str,
    occurrence_count: i64,
    first_seen_at: i64,
    last_seen_at: i64,
    status: &'a str,
    metadata: Option<&'a str>,
    created_at: i64,
    updated_at: i64,
}

fn load(
    conn: &mut SqliteConnection,
    user_id: i32,
    pattern_key: &str,
) -> Result<Option<BehaviorPattern>> {
    let row: Option<PatternRow> = behavior_patterns::table
        .filter(behavior_patterns::user_id.eq(user_id))
        .filter(behavior_patterns::pattern_key.eq(pattern_key))
        .first(conn)
        .optional()?;
    row.map(map_row).transpose()
}

fn load_existing(
    conn: &mut SqliteConnection,
    user_id: i32,
    pattern_key: &str,
) -> Result<BehaviorPattern> {
    load(conn, user_id, pattern_key)?.ok_or_else(|| {
        CompanionError::Reference(format!(
            "pattern {pattern_key} does not exist for user {user_id}"
        ))
    })
}

fn store_counters(
    conn: &mut SqliteConnection,
    pattern_id: i32,
    counters: PatternCounters,
    now: i64,
) -> Result<()> {
    diesel::update(behavior_patterns::table.filter(behavior_patterns::id.eq(pattern_id)))
        .set((
            behavior_patterns::occurrence_count.eq(counters.occurrence_count),
            behavior_patterns::first_seen_at.eq(counters.first_seen_at),
            behavior_patterns::last_seen_at.eq(counters.last_seen_at),
            behavior_patterns::status.eq(counters.status.as_str()),
            behavior_patterns::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

/// Create-or-count for one observation of `event_key`.
pub(crate) fn observe(
    conn: &mut SqliteConnection,
    user_id: i32,
    key_prefix: &str,
    event_key: &str,
    occurred_at: i64,
    now: i64,
) -> Result<Observation> {
    let event_key = event_key.trim();
    crate::domains::require_key("event_key", event_key)?;
    guard::ops::ensure_user(conn, user_id)?;
    let pattern_key = policy::derive_pattern_key(key_prefix, event_key);

    let Some(existing) = load(conn, user_id, &pattern_key)? else {
        let counters = PatternCounters::first(occurred_at);
        diesel::insert_into(behavior_patterns::table)
            .values(&NewPatternRow {
                user_id,
                pattern_key: &pattern_key,
                related_event_key: event_key,
                occurrence_count: counters.occurrence_count,
                first_seen_at: counters.first_seen_at,
                last_seen_at: counters.last_seen_at,
                status: counters.status.as_str(),
                metadata: None,
                created_at: now,
                updated_at: now,
            })
            .execute(conn)?;
        return Ok(Observation {
            pattern: load_existing(conn, user_id, &pattern_key)?,
            outcome: ObserveOutcome::Created,
        });
    };

    let (counters, outcome) = policy::apply_observation(counters_of(&existing), occurred_at);
    if outcome == ObserveOutcome::Suppressed {
        return Ok(Observation {
            pattern: existing,
            outcome,
        });
    }
    store_counters(conn, existing.id, counters, now)?;
    Ok(Observation {
        pattern: load_existing(conn, user_id, &pattern_key)?,
        outcome,
    })
}

/// Explicit resolve / ignore.
pub(crate) fn close(
    conn: &mut SqliteConnection,
    user_id: i32,
    pattern_key: &str,
    to: PatternStatus,
    now: i64,
) -> Result<BehaviorPattern> {
    let existing = load_existing(conn, user_id, pattern_key)?;
    if to == PatternStatus::Active {
        return Err(CompanionError::InvalidStateTransition {
            from: existing.status.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    let status = existing.status.transition_to(to)?;
    let counters = PatternCounters {
        status,
        ..counters_of(&existing)
    };
    store_counters(conn, existing.id, counters, now)?;
    load_existing(conn, user_id, pattern_key)
}

/// Back to active with a fresh window starting at `triggered_at`.
pub(crate) fn reactivate(
    conn: &mut SqliteConnection,
    user_id: i32,
    pattern_key: &str,
    triggered_at: i64,
    now: i64,
) -> Result<BehaviorPattern> {
    let existing = load_existing(conn, user_id, pattern_key)?;
    existing.status.transition_to(PatternStatus::Active)?;
    store_counters(conn, existing.id, PatternCounters::first(triggered_at), now)?;
    load_existing(conn, user_id, pattern_key)
}

pub(crate) fn annotate(
    conn: &mut SqliteConnection,
    user_id: i32,
    pattern_key: &str,
    metadata: &Value,
    now: i64,
) -> Result<BehaviorPattern> {
    let existing = load_existing(conn, user_id, pattern_key)?;
    let current = existing.metadata.clone().unwrap_or(Value::Null);
    let merged = policy::merge_value(&current, metadata);
    let encoded = encode_json(&merged)?;
    diesel::update(behavior_patterns::table.filter(behavior_patterns::id.eq(existing.id)))
        .set((
            behavior_patterns::metadata.eq(Some(encoded)),
            behavior_patterns::updated_at.eq(now),
        ))
        .execute(conn)?;
    load_existing(conn, user_id, pattern_key)
}

fn counters_of(pattern: &BehaviorPattern) -> PatternCounters {
    PatternCounters {
        occurrence_count: pattern.occurrence_count,
        first_seen_at: pattern.first_seen_at,
        last_seen_at: pattern.last_seen_at,
        status: pattern.status,
    }
}

pub(super) fn map_row(row: PatternRow) -> Result<BehaviorPattern> {
    Ok(BehaviorPattern {
        id: row.id,
        user_id: row.user_id,
        pattern_key: row.pattern_key,
        related_event_key: row.related_event_key,
        occurrence_count: row.occurrence_count,
        first_seen_at: row.first_seen_at,
        last_seen_at: row.last_seen_at,
        status: row.status.parse()?,
        metadata: decode_optional_json(row.metadata)?,
        updated_at: row.updated_at,
    })
}
