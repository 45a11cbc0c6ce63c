#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tempfile::TempDir;

use companion_memory::error::Result;
use companion_memory::interfaces::audit::{AuditRecord, AuditSink};
use companion_memory::{
    CompanionEngine, Config, EventSource, MemoryObservation, MemorySource, MemoryType, NewEvent,
    NewUser, Severity,
};

/// Engine over a throwaway database. Keep the struct alive for the duration
/// of the test; dropping it removes the directory.
pub struct TestEngine {
    pub engine: CompanionEngine,
    pub dir: TempDir,
}

impl std::ops::Deref for TestEngine {
    type Target = CompanionEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

pub async fn engine() -> TestEngine {
    engine_with(json!({})).await
}

/// `overrides` is a config document; the storage path is always forced into
/// the temp dir.
pub async fn engine_with(overrides: Value) -> TestEngine {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("companion.db");
    let mut config: Config = serde_json::from_value(overrides).unwrap();
    let mut storage = config.storage.take().unwrap_or_default();
    storage.sqlite_path = Some(db_path.to_string_lossy().to_string());
    config.storage = Some(storage);
    let engine = CompanionEngine::open(config).await.unwrap();
    TestEngine { engine, dir }
}

pub async fn create_user(engine: &CompanionEngine, email: &str) -> i32 {
    engine
        .users()
        .create_user(NewUser::new(email, "argon2$hash"))
        .await
        .unwrap()
        .id
}

pub fn event(key: &str, occurred_at: i64) -> NewEvent {
    NewEvent::new("behavior", key, Severity::Medium, EventSource::User, occurred_at)
}

pub fn trust_observation(value: Value, source: MemorySource, at: i64) -> MemoryObservation {
    MemoryObservation::new(
        MemoryType::Trust,
        "reacts_well_to_gentle_tone",
        value,
        source,
        at,
    )
}

#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
