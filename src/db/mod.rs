use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::result::{ConnectionError, ConnectionResult};
use diesel::sqlite::SqliteConnection;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::{AsyncDieselConnectionManager, ManagerConfig};
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::config::StorageSettings;
use crate::error::{CompanionError, Result};

pub mod schema;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub(crate) type SqliteAsyncConn = SyncConnectionWrapper<SqliteConnection>;
type SqlitePool = Pool<SqliteAsyncConn>;
pub(crate) type SqlitePooledConn<'a> = PooledConnection<'a, SqliteAsyncConn>;

/// Pooled handle to the engine database. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    busy_timeout_ms: u64,
    page_size: usize,
}

impl Database {
    pub async fn open(settings: &StorageSettings) -> Result<Self> {
        let sqlite_path = settings.sqlite_path.as_str();
        let operation_timeout = Duration::from_millis(settings.operation_timeout_ms);
        ensure_parent_dir(sqlite_path)?;
        run_migrations(sqlite_path).await?;

        let mut manager_config = ManagerConfig::default();
        manager_config.custom_setup = Box::new(setup_connection);
        let manager = AsyncDieselConnectionManager::<SqliteAsyncConn>::new_with_config(
            sqlite_path,
            manager_config,
        );
        let pool: SqlitePool = Pool::builder()
            .max_size(settings.pool_size)
            .connection_timeout(operation_timeout)
            .build(manager)
            .await
            .map_err(|e| CompanionError::StoreUnavailable(e.to_string()))?;

        tracing::debug!(path = sqlite_path, pool_size = settings.pool_size, "database opened");
        Ok(Self {
            pool,
            busy_timeout_ms: settings.effective_busy_timeout_ms(),
            page_size: settings.page_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) async fn conn(&self) -> Result<SqlitePooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| CompanionError::StoreUnavailable(e.to_string()))
    }

    /// Runs a storage call on its own task. The call always runs to
    /// completion, so dropping the caller's future never tears a connection
    /// out from under an in-flight blocking query. Waiting is bounded by the
    /// pool's connection timeout and SQLite's busy timeout instead.
    pub(crate) async fn run<T, Fut>(&self, op: &'static str, work: Fut) -> Result<T>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let result = tokio::spawn(work)
            .await
            .map_err(|e| CompanionError::Runtime(format!("{op} task failed: {e}")))?;
        if let Err(err) = &result {
            if err.is_retriable() {
                tracing::debug!(op, error = %err, "storage call unavailable");
            }
        }
        result
    }

    /// Runs `work` inside a `BEGIN IMMEDIATE` transaction, so concurrent
    /// writers are serialized and either all of `work` commits or none of it.
    /// A write that loses a uniqueness race is replayed once against the
    /// winner's row. Lock waits longer than the busy timeout fail with
    /// `StoreUnavailable` before anything is written.
    pub(crate) async fn write<T, F>(&self, op: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut SqliteConnection) -> Result<T> + Send + Sync + 'static,
    {
        let work = Arc::new(work);
        match self.write_once(op, Arc::clone(&work)).await {
            Err(CompanionError::ConstraintViolation(message)) => {
                tracing::debug!(op, %message, "write lost a uniqueness race, replaying");
                self.write_once(op, work).await
            }
            other => other,
        }
    }

    async fn write_once<T, F>(&self, op: &'static str, work: Arc<F>) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut SqliteConnection) -> Result<T> + Send + Sync + 'static,
    {
        let db = self.clone();
        self.run(op, async move {
            let busy_timeout_ms = db.busy_timeout_ms;
            let mut conn = db.conn().await?;
            conn.spawn_blocking(move |inner| {
                inner.batch_execute(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))?;
                Ok(inner.immediate_transaction(|tx| (*work)(tx)))
            })
            .await?
        })
        .await
    }
}

fn setup_connection(url: &str) -> BoxFuture<'_, ConnectionResult<SqliteAsyncConn>> {
    async move {
        let mut conn = SqliteAsyncConn::establish(url).await?;
        conn.batch_execute(
            "PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;",
        )
        .await
        .map_err(ConnectionError::CouldntSetupConfiguration)?;
        Ok(conn)
    }
    .boxed()
}

pub fn ensure_parent_dir(path: &str) -> Result<()> {
    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CompanionError::Runtime(e.to_string()))?;
    }
    Ok(())
}

pub async fn run_migrations(database_url: &str) -> Result<()> {
    let database_url = database_url.to_string();
    tokio::task::spawn_blocking(move || {
        let mut conn = SqliteConnection::establish(&database_url)
            .map_err(|e| CompanionError::StoreUnavailable(e.to_string()))?;
        conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| CompanionError::Runtime(e.to_string()))?;
        Ok::<_, CompanionError>(())
    })
    .await
    .map_err(|e| CompanionError::Runtime(e.to_string()))??;
    Ok(())
}

pub(crate) fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub(crate) fn encode_json(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string(value).map_err(|e| CompanionError::Serialization(e.to_string()))
}

pub(crate) fn decode_json(text: &str) -> Result<serde_json::Value> {
    serde_json::from_str(text).map_err(|e| CompanionError::Serialization(e.to_string()))
}

pub(crate) fn decode_optional_json(text: Option<String>) -> Result<Option<serde_json::Value>> {
    text.as_deref().map(decode_json).transpose()
}
