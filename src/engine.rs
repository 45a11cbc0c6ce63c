use std::path::Path;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::audit::{JsonlAuditSink, TracingAuditSink};
use crate::config::{Config, StorageSettings};
use crate::db::{now_ts, Database};
use crate::domains::event::{Event, EventFilter, NewEvent, RecordedEvent};
use crate::domains::memory::{Memory, MemoryObservation, MemoryType};
use crate::domains::pattern::{BehaviorPattern, Observation, PatternStatus};
use crate::domains::user::UserLifecycleEvent;
use crate::error::{CompanionError, Result};
use crate::events::{self, EventStore};
use crate::guard::{ConsistencyGuard, PurgeReport};
use crate::interfaces::audit::{AuditRecord, AuditSink};
use crate::interfaces::identity::IdentityService;
use crate::memories::{self, MemoryStore};
use crate::patterns::{self, PatternDetector};
use crate::policy::ReinforcementPolicy;
use crate::users::UserStore;

/// One behavioral signal from a producer: the raw event plus, optionally, the
/// memory it supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralSignal {
    pub event: NewEvent,
    #[serde(default)]
    pub memory: Option<MemoryObservation>,
}

impl BehavioralSignal {
    pub fn new(event: NewEvent) -> Self {
        Self {
            event,
            memory: None,
        }
    }

    pub fn with_memory(mut self, memory: MemoryObservation) -> Self {
        self.memory = Some(memory);
        self
    }
}

/// What `ingest` wrote. A duplicate delivery touches neither the pattern
/// nor the memory.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub event: RecordedEvent,
    pub pattern: Option<Observation>,
    pub memory: Option<Memory>,
}

#[derive(Clone)]
pub struct CompanionEngine {
    users: UserStore,
    events: EventStore,
    patterns: PatternDetector,
    memories: MemoryStore,
    guard: ConsistencyGuard,
    db: Database,
    audit: Arc<dyn AuditSink>,
    identity: Arc<dyn IdentityService>,
}

impl CompanionEngine {
    pub async fn open(config: Config) -> Result<Self> {
        let settings = StorageSettings::from_config(&config)?;
        let policy = ReinforcementPolicy::from_config(&config)?;
        let key_prefix = config.pattern_key_prefix()?;
        let audit: Arc<dyn AuditSink> = match config.audit_log_path() {
            Some(path) => Arc::new(JsonlAuditSink::new(path)),
            None => Arc::new(TracingAuditSink),
        };
        let db = Database::open(&settings).await?;
        tracing::info!(path = %settings.sqlite_path, %key_prefix, "companion engine ready");
        let users = UserStore::new(db.clone());
        Ok(Self {
            identity: Arc::new(users.clone()),
            users,
            events: EventStore::new(db.clone()),
            patterns: PatternDetector::new(db.clone(), key_prefix),
            memories: MemoryStore::new(db.clone(), policy),
            guard: ConsistencyGuard::new(db.clone()),
            db,
            audit,
        })
    }

    pub async fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::from_file(path)?;
        Self::open(config).await
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Replaces the identity source consulted before purging a user on a
    /// lifecycle `Deleted` event. Defaults to the engine's own `users` table.
    pub fn with_identity_service(mut self, identity: Arc<dyn IdentityService>) -> Self {
        self.identity = identity;
        self
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn events(&self) -> &EventStore {
        &self.events
    }

    pub fn patterns(&self) -> &PatternDetector {
        &self.patterns
    }

    pub fn memories(&self) -> &MemoryStore {
        &self.memories
    }

    pub fn guard(&self) -> &ConsistencyGuard {
        &self.guard
    }

    /// Records the event, counts it toward its pattern and reinforces the
    /// attached memory in one transaction. Nothing is written when any step
    /// fails, so a retry after `StoreUnavailable` cannot double-count.
    pub async fn ingest(&self, user_id: i32, signal: BehavioralSignal) -> Result<IngestOutcome> {
        let context = json!({
            "event_key": signal.event.event_key,
            "memory_key": signal.memory.as_ref().map(|m| m.memory_key.clone()),
        });
        let result = self.ingest_inner(user_id, signal).await;
        self.audited("ingest", Some(user_id), context, result)
    }

    async fn ingest_inner(&self, user_id: i32, signal: BehavioralSignal) -> Result<IngestOutcome> {
        let BehavioralSignal { event, memory } = signal;
        event.validate()?;
        if let Some(observation) = &memory {
            observation.validate()?;
            self.memories
                .policy()
                .signal_for(observation.source, observation.signal)?;
        }
        let policy = *self.memories.policy();
        let key_prefix = self.patterns.key_prefix().to_string();
        let now = now_ts();

        let outcome = self
            .db
            .write("ingest", move |conn| {
                let recorded = events::ops::insert_event(conn, user_id, &event, now)?;
                if recorded.duplicate {
                    return Ok(IngestOutcome {
                        event: recorded,
                        pattern: None,
                        memory: None,
                    });
                }
                let pattern = patterns::ops::observe(
                    conn,
                    user_id,
                    &key_prefix,
                    &event.event_key,
                    event.occurred_at,
                    now,
                )?;
                let memory = memory
                    .as_ref()
                    .map(|observation| {
                        memories::ops::reinforce(conn, &policy, user_id, observation, now)
                    })
                    .transpose()?;
                Ok(IngestOutcome {
                    event: recorded,
                    pattern: Some(pattern),
                    memory,
                })
            })
            .await?;
        tracing::debug!(
            user_id,
            event_id = outcome.event.id,
            duplicate = outcome.event.duplicate,
            "signal ingested"
        );
        Ok(outcome)
    }

    pub async fn record_event(&self, user_id: i32, event: NewEvent) -> Result<RecordedEvent> {
        let context = json!({ "event_key": event.event_key });
        let result = self.events.record(user_id, event).await;
        self.audited("record_event", Some(user_id), context, result)
    }

    pub fn query_events(
        &self,
        user_id: i32,
        filter: EventFilter,
    ) -> BoxStream<'static, Result<Event>> {
        self.events.query_events(user_id, filter)
    }

    pub async fn recent_events(
        &self,
        user_id: i32,
        event_key: &str,
        limit: usize,
    ) -> Result<Vec<Event>> {
        self.events.recent_events(user_id, event_key, limit).await
    }

    pub async fn observe(
        &self,
        user_id: i32,
        event_key: &str,
        occurred_at: i64,
    ) -> Result<Observation> {
        let result = self.patterns.observe(user_id, event_key, occurred_at).await;
        self.audited(
            "observe",
            Some(user_id),
            json!({ "event_key": event_key, "occurred_at": occurred_at }),
            result,
        )
    }

    pub async fn reinforce(&self, user_id: i32, observation: MemoryObservation) -> Result<Memory> {
        let context = json!({
            "memory_key": observation.memory_key,
            "memory_type": observation.memory_type,
        });
        let result = self.memories.reinforce(user_id, observation).await;
        self.audited("reinforce", Some(user_id), context, result)
    }

    pub async fn resolve(&self, user_id: i32, pattern_key: &str) -> Result<BehaviorPattern> {
        let result = self.patterns.resolve(user_id, pattern_key).await;
        self.audited(
            "resolve",
            Some(user_id),
            json!({ "pattern_key": pattern_key }),
            result,
        )
    }

    pub async fn ignore(&self, user_id: i32, pattern_key: &str) -> Result<BehaviorPattern> {
        let result = self.patterns.ignore(user_id, pattern_key).await;
        self.audited(
            "ignore",
            Some(user_id),
            json!({ "pattern_key": pattern_key }),
            result,
        )
    }

    pub async fn reactivate(
        &self,
        user_id: i32,
        pattern_key: &str,
        triggered_at: i64,
    ) -> Result<BehaviorPattern> {
        let result = self
            .patterns
            .reactivate(user_id, pattern_key, triggered_at)
            .await;
        self.audited(
            "reactivate",
            Some(user_id),
            json!({ "pattern_key": pattern_key, "triggered_at": triggered_at }),
            result,
        )
    }

    pub async fn get_pattern(
        &self,
        user_id: i32,
        pattern_key: &str,
    ) -> Result<Option<BehaviorPattern>> {
        self.patterns.get_pattern(user_id, pattern_key).await
    }

    pub async fn list_patterns(
        &self,
        user_id: i32,
        status: Option<PatternStatus>,
    ) -> Result<Vec<BehaviorPattern>> {
        self.patterns.list_patterns(user_id, status).await
    }

    pub async fn get_memory(&self, user_id: i32, memory_key: &str) -> Result<Option<Memory>> {
        self.memories.get_memory(user_id, memory_key).await
    }

    pub async fn list_memories(
        &self,
        user_id: i32,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<Memory>> {
        self.memories.list_memories(user_id, memory_type).await
    }

    /// Hard delete: the user and everything derived from them.
    pub async fn delete_user(&self, user_id: i32) -> Result<PurgeReport> {
        let result = self.guard.purge_user(user_id).await;
        self.audited("delete_user", Some(user_id), Value::Null, result)
    }

    /// Purges users as the identity service announces their deletion. A user
    /// the identity service no longer knows is skipped. The task ends when the
    /// sender side is dropped.
    pub fn spawn_deletion_listener(
        &self,
        mut events: broadcast::Receiver<UserLifecycleEvent>,
    ) -> JoinHandle<()> {
        let guard = self.guard.clone();
        let audit = Arc::clone(&self.audit);
        let identity = Arc::clone(&self.identity);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(UserLifecycleEvent::Deleted(user_id)) => {
                        let purged = match identity.user_exists(user_id).await {
                            Ok(true) => guard.purge_user(user_id).await.map(|_| ()),
                            Ok(false) => Err(CompanionError::Reference(format!(
                                "user {user_id} does not exist"
                            ))),
                            Err(err) => Err(err),
                        };
                        match purged {
                            Ok(()) => {}
                            Err(CompanionError::Reference(_)) => {
                                tracing::debug!(user_id, "deleted user already purged");
                            }
                            Err(err) => {
                                record_failure(
                                    audit.as_ref(),
                                    "delete_user",
                                    Some(user_id),
                                    &err,
                                    json!({ "trigger": "lifecycle" }),
                                );
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "user lifecycle listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Sends a failure that did not come from a typed engine call (for
    /// example an unparseable ingest line) to the audit sink.
    pub fn audit_failure(
        &self,
        operation: &str,
        user_id: Option<i32>,
        error: &CompanionError,
        context: Value,
    ) {
        record_failure(self.audit.as_ref(), operation, user_id, error, context);
    }

    fn audited<T>(
        &self,
        operation: &str,
        user_id: Option<i32>,
        context: Value,
        result: Result<T>,
    ) -> Result<T> {
        if let Err(err) = &result {
            record_failure(self.audit.as_ref(), operation, user_id, err, context);
        }
        result
    }
}

fn record_failure(
    audit: &dyn AuditSink,
    operation: &str,
    user_id: Option<i32>,
    error: &CompanionError,
    context: Value,
) {
    let record = AuditRecord::from_error(now_ts(), operation, user_id, error, context);
    if let Err(sink_err) = audit.record(&record) {
        tracing::warn!(operation, error = %sink_err, "failed to write audit record");
    }
}
