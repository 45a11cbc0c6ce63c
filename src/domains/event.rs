use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{require_key, string_enum};
use crate::error::Result;

pub type EventId = i32;

string_enum!(
    /// How much weight a behavioral event carries.
    Severity, "severity" {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

string_enum!(
    /// Who produced the event.
    EventSource, "event source" {
        User => "user",
        Ai => "ai",
        System => "system",
    }
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    pub user_id: i32,
    pub event_type: String,
    pub event_key: String,
    pub severity: Severity,
    pub source: EventSource,
    pub context: Option<Value>,
    pub occurred_at: i64,
    pub recorded_at: i64,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub event_key: String,
    pub severity: Severity,
    pub source: EventSource,
    #[serde(default)]
    pub context: Option<Value>,
    pub occurred_at: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    pub fn new(
        event_type: impl Into<String>,
        event_key: impl Into<String>,
        severity: Severity,
        source: EventSource,
        occurred_at: i64,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_key: event_key.into(),
            severity,
            source,
            context: None,
            occurred_at,
            idempotency_key: None,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_key("event_type", &self.event_type)?;
        require_key("event_key", &self.event_key)?;
        if let Some(key) = &self.idempotency_key {
            require_key("idempotency_key", key)?;
        }
        Ok(())
    }
}

/// Result of appending to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordedEvent {
    pub id: EventId,
    /// True when an earlier delivery with the same idempotency key already exists.
    pub duplicate: bool,
}

/// Filter for `EventStore::query_events`.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_key: Option<String>,
    pub since: Option<i64>,
}

impl EventFilter {
    pub fn key(event_key: impl Into<String>) -> Self {
        Self {
            event_key: Some(event_key.into()),
            since: None,
        }
    }

    pub fn since(mut self, since: i64) -> Self {
        self.since = Some(since);
        self
    }
}
