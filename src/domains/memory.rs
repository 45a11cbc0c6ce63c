use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{require_key, string_enum};
use crate::error::{CompanionError, Result};

string_enum!(
    MemoryType, "memory type" {
        Emotional => "emotional",
        Behavioral => "behavioral",
        Preference => "preference",
        Trust => "trust",
    }
);

string_enum!(
    /// Origin of a memory observation.
    MemorySource, "memory source" {
        Ai => "ai",
        System => "system",
        Manual => "manual",
    }
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Memory {
    pub id: i32,
    pub user_id: i32,
    pub memory_key: String,
    pub memory_type: MemoryType,
    pub memory_value: Value,
    pub confidence_score: f64,
    pub source: MemorySource,
    pub last_reinforced_at: i64,
    pub reinforcement_count: i64,
    pub created_at: i64,
}

/// One observation of a fact about the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryObservation {
    pub memory_type: MemoryType,
    pub memory_key: String,
    pub value: Value,
    pub source: MemorySource,
    /// Confidence implied by this observation; the per-source default when absent.
    #[serde(default)]
    pub signal: Option<f64>,
    pub observed_at: i64,
}

impl MemoryObservation {
    pub fn new(
        memory_type: MemoryType,
        memory_key: impl Into<String>,
        value: Value,
        source: MemorySource,
        observed_at: i64,
    ) -> Self {
        Self {
            memory_type,
            memory_key: memory_key.into(),
            value,
            source,
            signal: None,
            observed_at,
        }
    }

    pub fn with_signal(mut self, signal: f64) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_key("memory_key", &self.memory_key)?;
        if let Some(signal) = self.signal {
            if !signal.is_finite() || !(0.0..=1.0).contains(&signal) {
                return Err(CompanionError::Validation(format!(
                    "signal must be within [0, 1] (got {signal})"
                )));
            }
        }
        Ok(())
    }
}
