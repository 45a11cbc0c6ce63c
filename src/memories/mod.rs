use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::db::schema::memories;
use crate::db::{now_ts, Database};
use crate::domains::memory::{Memory, MemoryObservation, MemoryType};
use crate::error::Result;
use crate::policy::ReinforcementPolicy;

pub(crate) mod ops;
use ops::MemoryRow;

/// Long-lived facts about a user, each with a bounded confidence score.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
    policy: ReinforcementPolicy,
}

impl MemoryStore {
    pub fn new(db: Database, policy: ReinforcementPolicy) -> Self {
        Self { db, policy }
    }

    pub fn policy(&self) -> &ReinforcementPolicy {
        &self.policy
    }

    pub async fn reinforce(&self, user_id: i32, observation: MemoryObservation) -> Result<Memory> {
        observation.validate()?;
        let policy = self.policy;
        let memory = self
            .db
            .write("reinforce", move |conn| {
                ops::reinforce(conn, &policy, user_id, &observation, now_ts())
            })
            .await?;
        tracing::debug!(
            user_id,
            memory_key = %memory.memory_key,
            confidence = memory.confidence_score,
            count = memory.reinforcement_count,
            "memory reinforced"
        );
        Ok(memory)
    }

    pub async fn get_memory(&self, user_id: i32, memory_key: &str) -> Result<Option<Memory>> {
        let db = self.db.clone();
        let memory_key = memory_key.trim().to_string();
        self.db
            .run("get_memory", async move {
                let mut conn = db.conn().await?;
                let row: Option<MemoryRow> = memories::table
                    .filter(memories::user_id.eq(user_id))
                    .filter(memories::memory_key.eq(&memory_key))
                    .first(&mut conn)
                    .await
                    .optional()?;
                row.map(ops::map_row).transpose()
            })
            .await
    }

    /// Highest confidence first, then most recently reinforced.
    pub async fn list_memories(
        &self,
        user_id: i32,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        let db = self.db.clone();
        self.db
            .run("list_memories", async move {
                let mut conn = db.conn().await?;
                let mut query = memories::table
                    .filter(memories::user_id.eq(user_id))
                    .into_boxed();
                if let Some(memory_type) = memory_type {
                    query = query.filter(memories::memory_type.eq(memory_type.as_str()));
                }
                let rows: Vec<MemoryRow> = query
                    .order((
                        memories::confidence_score.desc(),
                        memories::last_reinforced_at.desc(),
                        memories::id.asc(),
                    ))
                    .load(&mut conn)
                    .await?;
                rows.into_iter().map(ops::map_row).collect()
            })
            .await
    }
}
