use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::PurgeReport;
use crate::db::schema::{behavior_patterns, events, memories, users};
use crate::error::{CompanionError, Result};

/// Every write path calls this inside its transaction before touching rows.
pub(crate) fn ensure_user(conn: &mut SqliteConnection, user_id: i32) -> Result<()> {
    let count: i64 = users::table
        .filter(users::id.eq(user_id))
        .count()
        .get_result(conn)?;
    if count == 0 {
        return Err(CompanionError::Reference(format!(
            "user {user_id} does not exist"
        )));
    }
    Ok(())
}

/// Deletes every row owned by the user, then the user. Callers run this in a
/// single transaction; an error anywhere rolls back the whole cascade.
pub(crate) fn purge(conn: &mut SqliteConnection, user_id: i32) -> Result<PurgeReport> {
    ensure_user(conn, user_id)?;
    let memories = diesel::delete(memories::table.filter(memories::user_id.eq(user_id)))
        .execute(conn)?;
    let patterns =
        diesel::delete(behavior_patterns::table.filter(behavior_patterns::user_id.eq(user_id)))
            .execute(conn)?;
    let events = diesel::delete(events::table.filter(events::user_id.eq(user_id))).execute(conn)?;
    let removed = diesel::delete(users::table.filter(users::id.eq(user_id))).execute(conn)?;
    if removed != 1 {
        return Err(CompanionError::Runtime(format!(
            "cascade for user {user_id} removed {removed} user rows"
        )));
    }
    Ok(PurgeReport {
        user_id,
        events,
        patterns,
        memories,
    })
}
