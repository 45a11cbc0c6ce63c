use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema::memories;
use crate::db::{decode_json, encode_json};
use crate::domains::memory::{Memory, MemoryObservation};
use crate::error::{CompanionError, Result};
use crate::guard;
use crate::policy::{self, ReinforcementPolicy};

#[derive(Queryable)]
pub(super) struct MemoryRow {
    id: i32,
    user_id: i32,
    memory_key: String,
    memory_type: String,
    memory_value: String,
    confidence_score: f64,
    source: String,
    last_reinforced_at: i64,
    reinforcement_count: i64,
    created_at: i64,
    _updated_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = memories)]
struct NewMemoryRow<'a> {
    user_id: i32,
    memory_key: &'a str,
    memory_type: &'a str,
    memory_value: &'a str,
    confidence_score: f64,
    source: &'a str,
    last_reinforced_at: i64,
    reinforcement_count: i64,
    created_at: i64,
    updated_at: i64,
}

fn load(conn: &mut SqliteConnection, user_id: i32, memory_key: &str) -> Result<Option<Memory>> {
    let row: Option<MemoryRow> = memories::table
        .filter(memories::user_id.eq(user_id))
        .filter(memories::memory_key.eq(memory_key))
        .first(conn)
        .optional()?;
    row.map(map_row).transpose()
}

/// Create-or-reinforce. A new key starts at the policy's default confidence;
/// an existing one moves toward the observation's signal, merges the value
/// and bumps the count.
pub(crate) fn reinforce(
    conn: &mut SqliteConnection,
    policy: &ReinforcementPolicy,
    user_id: i32,
    observation: &MemoryObservation,
    now: i64,
) -> Result<Memory> {
    observation.validate()?;
    let signal = policy.signal_for(observation.source, observation.signal)?;
    guard::ops::ensure_user(conn, user_id)?;
    let memory_key = observation.memory_key.trim();

    match load(conn, user_id, memory_key)? {
        None => {
            let value = encode_json(&observation.value)?;
            diesel::insert_into(memories::table)
                .values(&NewMemoryRow {
                    user_id,
                    memory_key,
                    memory_type: observation.memory_type.as_str(),
                    memory_value: &value,
                    confidence_score: policy::clamp_unit(policy.default_confidence),
                    source: observation.source.as_str(),
                    last_reinforced_at: observation.observed_at,
                    reinforcement_count: 1,
                    created_at: now,
                    updated_at: now,
                })
                .execute(conn)?;
        }
        Some(existing) => {
            if existing.memory_type != observation.memory_type {
                return Err(CompanionError::Validation(format!(
                    "memory {memory_key} is {} and cannot be reinforced as {}",
                    existing.memory_type, observation.memory_type
                )));
            }
            let confidence = policy.next_confidence(existing.confidence_score, signal);
            let value = encode_json(&policy::merge_value(
                &existing.memory_value,
                &observation.value,
            ))?;
            diesel::update(memories::table.filter(memories::id.eq(existing.id)))
                .set((
                    memories::memory_value.eq(value),
                    memories::confidence_score.eq(confidence),
                    memories::source.eq(observation.source.as_str()),
                    memories::last_reinforced_at
                        .eq(existing.last_reinforced_at.max(observation.observed_at)),
                    memories::reinforcement_count
                        .eq(existing.reinforcement_count.saturating_add(1)),
                    memories::updated_at.eq(now),
                ))
                .execute(conn)?;
        }
    }

    load(conn, user_id, memory_key)?.ok_or_else(|| {
        CompanionError::Runtime(format!("memory {memory_key} vanished inside its transaction"))
    })
}

pub(super) fn map_row(row: MemoryRow) -> Result<Memory> {
    Ok(Memory {
        id: row.id,
        user_id: row.user_id,
        memory_key: row.memory_key,
        memory_type: row.memory_type.parse()?,
        memory_value: decode_json(&row.memory_value)?,
        confidence_score: row.confidence_score,
        source: row.source.parse()?,
        last_reinforced_at: row.last_reinforced_at,
        reinforcement_count: row.reinforcement_count,
        created_at: row.created_at,
    })
}
