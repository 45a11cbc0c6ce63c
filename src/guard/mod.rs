use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::schema::{behavior_patterns, memories};
use crate::db::Database;
use crate::error::Result;

pub(crate) mod ops;

/// Rows removed by a user cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub user_id: i32,
    pub events: usize,
    pub patterns: usize,
    pub memories: usize,
}

/// Cross-entity invariants: user existence, the all-or-nothing user cascade
/// and an after-the-fact scan for rows that break the counting/confidence rules.
#[derive(Clone)]
pub struct ConsistencyGuard {
    db: Database,
}

impl ConsistencyGuard {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn purge_user(&self, user_id: i32) -> Result<PurgeReport> {
        let report = self
            .db
            .write("purge_user", move |conn| ops::purge(conn, user_id))
            .await?;
        tracing::info!(
            user_id,
            events = report.events,
            patterns = report.patterns,
            memories = report.memories,
            "user cascade complete"
        );
        Ok(report)
    }

    /// Describes every stored row of the user that violates an invariant.
    /// An empty result means the user's derived state is consistent.
    pub async fn find_violations(&self, user_id: i32) -> Result<Vec<String>> {
        let db = self.db.clone();
        self.db
            .run("find_violations", async move {
                let mut conn = db.conn().await?;
                let patterns: Vec<(String, i64, i64, i64)> = behavior_patterns::table
                    .filter(behavior_patterns::user_id.eq(user_id))
                    .filter(
                        behavior_patterns::occurrence_count
                            .lt(1)
                            .or(behavior_patterns::last_seen_at
                                .lt(behavior_patterns::first_seen_at)),
                    )
                    .select((
                        behavior_patterns::pattern_key,
                        behavior_patterns::occurrence_count,
                        behavior_patterns::first_seen_at,
                        behavior_patterns::last_seen_at,
                    ))
                    .load(&mut conn)
                    .await?;
                let memories: Vec<(String, f64)> = memories::table
                    .filter(memories::user_id.eq(user_id))
                    .filter(
                        memories::confidence_score
                            .lt(0.0)
                            .or(memories::confidence_score.gt(1.0)),
                    )
                    .select((memories::memory_key, memories::confidence_score))
                    .load(&mut conn)
                    .await?;

                let mut violations = Vec::new();
                for (key, count, first, last) in patterns {
                    violations.push(format!(
                        "pattern {key}: count={count} first_seen_at={first} last_seen_at={last}"
                    ));
                }
                for (key, score) in memories {
                    violations.push(format!("memory {key}: confidence_score={score}"));
                }
                Ok(violations)
            })
            .await
    }
}
