use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::string_enum;
use crate::error::{CompanionError, Result};

string_enum!(
    /// Lifecycle of a detected pattern.
    PatternStatus, "pattern status" {
        Active => "active",
        Resolved => "resolved",
        Ignored => "ignored",
    }
);

impl PatternStatus {
    /// Legal moves: active -> resolved | ignored, resolved | ignored -> active.
    pub fn can_transition_to(self, to: PatternStatus) -> bool {
        matches!(
            (self, to),
            (PatternStatus::Active, PatternStatus::Resolved)
                | (PatternStatus::Active, PatternStatus::Ignored)
                | (PatternStatus::Resolved, PatternStatus::Active)
                | (PatternStatus::Ignored, PatternStatus::Active)
        )
    }

    pub fn transition_to(self, to: PatternStatus) -> Result<PatternStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(CompanionError::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BehaviorPattern {
    pub id: i32,
    pub user_id: i32,
    pub pattern_key: String,
    pub related_event_key: String,
    pub occurrence_count: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub status: PatternStatus,
    pub metadata: Option<Value>,
    pub updated_at: i64,
}

/// What `observe` did to the stored pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserveOutcome {
    Created,
    Counted,
    /// Pattern is resolved or ignored; the observation was not applied.
    Suppressed,
}

#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub pattern: BehaviorPattern,
    pub outcome: ObserveOutcome,
}
