use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::schema::events;
use crate::db::{decode_optional_json, encode_json};
use crate::domains::event::{Event, NewEvent, RecordedEvent};
use crate::error::Result;
use crate::guard;

#[derive(Queryable)]
pub(super) struct EventRow {
    id: i32,
    user_id: i32,
    event_type: String,
    event_key: String,
    severity: String,
    source: String,
    context: Option<String>,
    occurred_at: i64,
    recorded_at: i64,
    idempotency_key: Option<String>,
}

#[derive(Insertable)]
#[diesel(table_name = events)]
struct NewEventRow<'a> {
    user_id: i32,
    event_type: &'a str,
    event_key: &'a str,
    severity: &'a str,
    source: &'a str,
    context: Option<&'a str>,
    occurred_at: i64,
    recorded_at: i64,
    idempotency_key: Option<&'a str>,
}

#[derive(QueryableByName)]
struct RowId {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    id: i64,
}

/// Appends one event. A repeated idempotency key returns the first row's id
/// without writing.
pub(crate) fn insert_event(
    conn: &mut SqliteConnection,
    user_id: i32,
    event: &NewEvent,
    recorded_at: i64,
) -> Result<RecordedEvent> {
    event.validate()?;
    guard::ops::ensure_user(conn, user_id)?;

    let idempotency_key = event.idempotency_key.as_deref().map(str::trim);
    if let Some(key) = idempotency_key {
        let existing: Option<i32> = events::table
            .filter(events::user_id.eq(user_id))
            .filter(events::idempotency_key.eq(key))
            .select(events::id)
            .first(conn)
            .optional()?;
        if let Some(id) = existing {
            return Ok(RecordedEvent {
                id,
                duplicate: true,
            });
        }
    }

    let context = event.context.as_ref().map(encode_json).transpose()?;
    diesel::insert_into(events::table)
        .values(&NewEventRow {
            user_id,
            event_type: event.event_type.trim(),
            event_key: event.event_key.trim(),
            severity: event.severity.as_str(),
            source: event.source.as_str(),
            context: context.as_deref(),
            occurred_at: event.occurred_at,
            recorded_at,
            idempotency_key,
        })
        .execute(conn)?;

    let row: RowId = diesel::sql_query("SELECT last_insert_rowid() as id").get_result(conn)?;
    Ok(RecordedEvent {
        id: row.id as i32,
        duplicate: false,
    })
}

pub(super) fn map_row(row: EventRow) -> Result<Event> {
    Ok(Event {
        id: row.id,
        user_id: row.user_id,
        event_type: row.event_type,
        event_key: row.event_key,
        severity: row.severity.parse()?,
        source: row.source.parse()?,
        context: decode_optional_json(row.context)?,
        occurred_at: row.occurred_at,
        recorded_at: row.recorded_at,
        idempotency_key: row.idempotency_key,
    })
}
