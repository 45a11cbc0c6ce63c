use std::io::Write;
use std::sync::Mutex;

use crate::db::ensure_parent_dir;
use crate::error::{CompanionError, Result};
use crate::interfaces::audit::{AuditRecord, AuditSink};

/// Appends one JSON object per line to a log file.
pub struct JsonlAuditSink {
    path: String,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| CompanionError::Serialization(e.to_string()))?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| CompanionError::Runtime("audit log lock poisoned".to_string()))?;
        ensure_parent_dir(&self.path)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CompanionError::Runtime(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| CompanionError::Runtime(e.to_string()))?;
        Ok(())
    }
}

/// Emits audit records as `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) -> Result<()> {
        tracing::warn!(
            kind = %record.kind,
            operation = %record.operation,
            user_id = ?record.user_id,
            context = %record.context,
            "operation failed"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) -> Result<()> {
        Ok(())
    }
}
