use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde_json::Value;

use crate::db::schema::behavior_patterns;
use crate::db::{now_ts, Database};
use crate::domains::pattern::{BehaviorPattern, Observation, PatternStatus};
use crate::error::Result;

pub(crate) mod ops;
use ops::PatternRow;

/// Aggregates repeated event keys into per-user pattern counters.
#[derive(Clone)]
pub struct PatternDetector {
    db: Database,
    key_prefix: String,
}

impl PatternDetector {
    pub fn new(db: Database, key_prefix: impl Into<String>) -> Self {
        Self {
            db,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn pattern_key_for(&self, event_key: &str) -> String {
        crate::policy::derive_pattern_key(&self.key_prefix, event_key)
    }

    /// Counts one occurrence of `event_key` at `occurred_at`. Creation and
    /// increment happen under the same write lock, so concurrent observers of
    /// a fresh key never lose a count.
    pub async fn observe(
        &self,
        user_id: i32,
        event_key: &str,
        occurred_at: i64,
    ) -> Result<Observation> {
        let prefix = self.key_prefix.clone();
        let event_key = event_key.to_string();
        let observation = self
            .db
            .write("observe", move |conn| {
                ops::observe(conn, user_id, &prefix, &event_key, occurred_at, now_ts())
            })
            .await?;
        tracing::debug!(
            user_id,
            pattern_key = %observation.pattern.pattern_key,
            count = observation.pattern.occurrence_count,
            outcome = ?observation.outcome,
            "pattern observed"
        );
        Ok(observation)
    }

    pub async fn resolve(&self, user_id: i32, pattern_key: &str) -> Result<BehaviorPattern> {
        self.close(user_id, pattern_key, PatternStatus::Resolved).await
    }

    pub async fn ignore(&self, user_id: i32, pattern_key: &str) -> Result<BehaviorPattern> {
        self.close(user_id, pattern_key, PatternStatus::Ignored).await
    }

    async fn close(
        &self,
        user_id: i32,
        pattern_key: &str,
        to: PatternStatus,
    ) -> Result<BehaviorPattern> {
        let key = pattern_key.trim().to_string();
        let pattern = self
            .db
            .write("close_pattern", move |conn| {
                ops::close(conn, user_id, &key, to, now_ts())
            })
            .await?;
        tracing::info!(
            user_id,
            pattern_key = %pattern.pattern_key,
            status = %pattern.status,
            "pattern closed"
        );
        Ok(pattern)
    }

    /// Re-opens a resolved or ignored pattern. The counting window restarts at
    /// `triggered_at` with a count of one.
    pub async fn reactivate(
        &self,
        user_id: i32,
        pattern_key: &str,
        triggered_at: i64,
    ) -> Result<BehaviorPattern> {
        let key = pattern_key.trim().to_string();
        let pattern = self
            .db
            .write("reactivate_pattern", move |conn| {
                ops::reactivate(conn, user_id, &key, triggered_at, now_ts())
            })
            .await?;
        tracing::info!(user_id, pattern_key = %pattern.pattern_key, "pattern reactivated");
        Ok(pattern)
    }

    /// Merges `metadata` into the pattern's metadata (JSON merge patch).
    pub async fn annotate(
        &self,
        user_id: i32,
        pattern_key: &str,
        metadata: Value,
    ) -> Result<BehaviorPattern> {
        let key = pattern_key.trim().to_string();
        self.db
            .write("annotate_pattern", move |conn| {
                ops::annotate(conn, user_id, &key, &metadata, now_ts())
            })
            .await
    }

    pub async fn get_pattern(
        &self,
        user_id: i32,
        pattern_key: &str,
    ) -> Result<Option<BehaviorPattern>> {
        let db = self.db.clone();
        let pattern_key = pattern_key.trim().to_string();
        self.db
            .run("get_pattern", async move {
                let mut conn = db.conn().await?;
                let row: Option<PatternRow> = behavior_patterns::table
                    .filter(behavior_patterns::user_id.eq(user_id))
                    .filter(behavior_patterns::pattern_key.eq(&pattern_key))
                    .first(&mut conn)
                    .await
                    .optional()?;
                row.map(ops::map_row).transpose()
            })
            .await
    }

    /// Most recently seen first.
    pub async fn list_patterns(
        &self,
        user_id: i32,
        status: Option<PatternStatus>,
    ) -> Result<Vec<BehaviorPattern>> {
        let db = self.db.clone();
        self.db
            .run("list_patterns", async move {
                let mut conn = db.conn().await?;
                let mut query = behavior_patterns::table
                    .filter(behavior_patterns::user_id.eq(user_id))
                    .into_boxed();
                if let Some(status) = status {
                    query = query.filter(behavior_patterns::status.eq(status.as_str()));
                }
                let rows: Vec<PatternRow> = query
                    .order((
                        behavior_patterns::last_seen_at.desc(),
                        behavior_patterns::id.desc(),
                    ))
                    .load(&mut conn)
                    .await?;
                rows.into_iter().map(ops::map_row).collect()
            })
            .await
    }
}
