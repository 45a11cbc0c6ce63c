use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CompanionError, Result};

/// Structured failure record handed to the audit sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub timestamp: i64,
    pub kind: String,
    pub operation: String,
    pub user_id: Option<i32>,
    pub context: Value,
}

impl AuditRecord {
    pub fn from_error(
        timestamp: i64,
        operation: &str,
        user_id: Option<i32>,
        error: &CompanionError,
        context: Value,
    ) -> Self {
        let context = match context {
            Value::Object(mut map) => {
                map.insert("message".to_string(), Value::String(error.to_string()));
                Value::Object(map)
            }
            Value::Null => serde_json::json!({ "message": error.to_string() }),
            other => serde_json::json!({ "message": error.to_string(), "details": other }),
        };
        Self {
            timestamp,
            kind: error.kind().to_string(),
            operation: operation.to_string(),
            user_id,
            context,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<()>;
}
