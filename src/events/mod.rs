use async_stream::try_stream;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use futures::stream::BoxStream;

use crate::db::schema::events;
use crate::db::{now_ts, Database};
use crate::domains::event::{Event, EventFilter, EventId, NewEvent, RecordedEvent};
use crate::error::Result;

pub(crate) mod ops;
use ops::EventRow;

/// Append-only ledger of behavioral events.
#[derive(Clone)]
pub struct EventStore {
    db: Database,
}

impl EventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn record_event(&self, user_id: i32, event: NewEvent) -> Result<EventId> {
        Ok(self.record(user_id, event).await?.id)
    }

    /// Like `record_event`, but reports whether the idempotency key had
    /// already been seen.
    pub async fn record(&self, user_id: i32, event: NewEvent) -> Result<RecordedEvent> {
        event.validate()?;
        let recorded_at = now_ts();
        let recorded = self
            .db
            .write("record_event", move |conn| {
                ops::insert_event(conn, user_id, &event, recorded_at)
            })
            .await?;
        tracing::debug!(
            user_id,
            event_id = recorded.id,
            duplicate = recorded.duplicate,
            "event recorded"
        );
        Ok(recorded)
    }

    /// Lazily pages through the user's events in `occurred_at` order (ties by
    /// id). The stream ends after the last page; call again to restart.
    pub fn query_events(
        &self,
        user_id: i32,
        filter: EventFilter,
    ) -> BoxStream<'static, Result<Event>> {
        let db = self.db.clone();
        let page_size = db.page_size().max(1);
        Box::pin(try_stream! {
            let mut cursor: Option<(i64, i32)> = None;
            loop {
                let page = fetch_page(&db, user_id, filter.clone(), cursor, page_size).await?;
                let exhausted = page.len() < page_size;
                for event in page {
                    cursor = Some((event.occurred_at, event.id));
                    yield event;
                }
                if exhausted {
                    break;
                }
            }
        })
    }

    /// Newest-first window of the user's events for one key.
    pub async fn recent_events(
        &self,
        user_id: i32,
        event_key: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let db = self.db.clone();
        let event_key = event_key.trim().to_string();
        self.db
            .run("recent_events", async move {
                let mut conn = db.conn().await?;
                let rows: Vec<EventRow> = events::table
                    .filter(events::user_id.eq(user_id))
                    .filter(events::event_key.eq(&event_key))
                    .order((events::occurred_at.desc(), events::id.desc()))
                    .limit(limit as i64)
                    .load(&mut conn)
                    .await?;
                rows.into_iter().map(ops::map_row).collect()
            })
            .await
    }
}

async fn fetch_page(
    db: &Database,
    user_id: i32,
    filter: EventFilter,
    cursor: Option<(i64, i32)>,
    page_size: usize,
) -> Result<Vec<Event>> {
    let pool = db.clone();
    db.run("query_events", async move {
        let mut conn = pool.conn().await?;
        let mut query = events::table
            .filter(events::user_id.eq(user_id))
            .into_boxed();
        if let Some(key) = filter.event_key.as_deref() {
            query = query.filter(events::event_key.eq(key.trim().to_string()));
        }
        if let Some(since) = filter.since {
            query = query.filter(events::occurred_at.ge(since));
        }
        if let Some((occurred_at, id)) = cursor {
            query = query.filter(
                events::occurred_at
                    .gt(occurred_at)
                    .or(events::occurred_at.eq(occurred_at).and(events::id.gt(id))),
            );
        }
        let rows: Vec<EventRow> = query
            .order((events::occurred_at.asc(), events::id.asc()))
            .limit(page_size as i64)
            .load(&mut conn)
            .await?;
        rows.into_iter().map(ops::map_row).collect()
    })
    .await
}
