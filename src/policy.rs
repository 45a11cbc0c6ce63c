//! Reinforcement rules shared by the pattern detector and the memory store.
//!
//! Everything here is pure: the stores load the current row inside a write
//! transaction, apply these functions and write the result back.

use serde_json::Value;

use crate::config::{Config, DEFAULT_PATTERN_PREFIX};
use crate::domains::memory::MemorySource;
use crate::domains::pattern::{ObserveOutcome, PatternStatus};
use crate::error::{CompanionError, Result};

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const DEFAULT_RATE: f64 = 0.3;

/// Confidence each source implies when the caller gives no explicit signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSignals {
    pub ai: f64,
    pub system: f64,
    pub manual: f64,
}

impl Default for SourceSignals {
    fn default() -> Self {
        Self {
            ai: 0.7,
            system: 0.8,
            manual: 1.0,
        }
    }
}

impl SourceSignals {
    pub fn for_source(&self, source: MemorySource) -> f64 {
        match source {
            MemorySource::Ai => self.ai,
            MemorySource::System => self.system,
            MemorySource::Manual => self.manual,
        }
    }
}

/// Exponential-moving-average confidence update:
/// `new = clamp(old + rate * (signal - old), 0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReinforcementPolicy {
    pub default_confidence: f64,
    pub rate: f64,
    pub signals: SourceSignals,
}

impl Default for ReinforcementPolicy {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            rate: DEFAULT_RATE,
            signals: SourceSignals::default(),
        }
    }
}

impl ReinforcementPolicy {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut policy = Self::default();
        if let Some(reinforcement) = &config.reinforcement {
            if let Some(value) = reinforcement.default_confidence {
                policy.default_confidence = value;
            }
            if let Some(value) = reinforcement.rate {
                policy.rate = value;
            }
            if let Some(signals) = &reinforcement.signals {
                policy.signals.ai = signals.ai.unwrap_or(policy.signals.ai);
                policy.signals.system = signals.system.unwrap_or(policy.signals.system);
                policy.signals.manual = signals.manual.unwrap_or(policy.signals.manual);
            }
        }
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rate > 0.0 && self.rate <= 1.0) {
            return Err(CompanionError::Config(format!(
                "reinforcement.rate must be within (0, 1] (got {})",
                self.rate
            )));
        }
        let probabilities = [
            ("reinforcement.default_confidence", self.default_confidence),
            ("reinforcement.signals.ai", self.signals.ai),
            ("reinforcement.signals.system", self.signals.system),
            ("reinforcement.signals.manual", self.signals.manual),
        ];
        for (name, value) in probabilities {
            if !is_probability(value) {
                return Err(CompanionError::Config(format!(
                    "{name} must be within [0, 1] (got {value})"
                )));
            }
        }
        Ok(())
    }

    /// The signal an observation pulls toward: explicit when given, else the source default.
    pub fn signal_for(&self, source: MemorySource, explicit: Option<f64>) -> Result<f64> {
        match explicit {
            Some(signal) if is_probability(signal) => Ok(signal),
            Some(signal) => Err(CompanionError::Validation(format!(
                "signal must be within [0, 1] (got {signal})"
            ))),
            None => Ok(self.signals.for_source(source)),
        }
    }

    pub fn next_confidence(&self, current: f64, signal: f64) -> f64 {
        let current = clamp_unit(current);
        clamp_unit(current + self.rate * (signal - current))
    }
}

fn is_probability(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// JSON merge patch (RFC 7396): objects merge key by key, `null` removes a
/// key and any other value replaces what was there.
pub fn merge_value(current: &Value, patch: &Value) -> Value {
    match (current, patch) {
        (Value::Object(base), Value::Object(changes)) => {
            let mut merged = base.clone();
            for (key, change) in changes {
                if change.is_null() {
                    merged.remove(key);
                    continue;
                }
                let next = match merged.get(key) {
                    Some(existing) => merge_value(existing, change),
                    None => strip_nulls(change),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, patch) => strip_nulls(patch),
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `<prefix>:<event_key>`.
pub fn derive_pattern_key(prefix: &str, event_key: &str) -> String {
    let prefix = if prefix.is_empty() {
        DEFAULT_PATTERN_PREFIX
    } else {
        prefix
    };
    format!("{prefix}:{}", event_key.trim())
}

/// Counter state of a pattern row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternCounters {
    pub occurrence_count: i64,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub status: PatternStatus,
}

impl PatternCounters {
    pub fn first(occurred_at: i64) -> Self {
        Self {
            occurrence_count: 1,
            first_seen_at: occurred_at,
            last_seen_at: occurred_at,
            status: PatternStatus::Active,
        }
    }
}

/// Applies one observation. Inactive patterns are left untouched; timestamps
/// only ever widen the seen window.
pub fn apply_observation(
    counters: PatternCounters,
    occurred_at: i64,
) -> (PatternCounters, ObserveOutcome) {
    if counters.status != PatternStatus::Active {
        return (counters, ObserveOutcome::Suppressed);
    }
    let next = PatternCounters {
        occurrence_count: counters.occurrence_count.saturating_add(1),
        first_seen_at: counters.first_seen_at.min(occurred_at),
        last_seen_at: counters.last_seen_at.max(occurred_at),
        status: counters.status,
    };
    (next, ObserveOutcome::Counted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn confidence_moves_toward_signal_and_stays_bounded() {
        let policy = ReinforcementPolicy::default();
        let next = policy.next_confidence(0.5, 0.7);
        assert!((next - 0.56).abs() < 1e-9);

        let mut score = policy.default_confidence;
        for _ in 0..200 {
            score = policy.next_confidence(score, 1.0);
            assert!((0.0..=1.0).contains(&score));
        }
        assert!(score > 0.99);

        for _ in 0..200 {
            score = policy.next_confidence(score, 0.0);
            assert!((0.0..=1.0).contains(&score));
        }
        assert!(score < 0.01);

        assert_eq!(policy.next_confidence(4.0, 1.0), 1.0);
        assert_eq!(policy.next_confidence(f64::NAN, 0.0), 0.0);
    }

    #[test]
    fn signal_defaults_follow_source() {
        let policy = ReinforcementPolicy::default();
        assert_eq!(policy.signal_for(MemorySource::Manual, None).unwrap(), 1.0);
        assert_eq!(policy.signal_for(MemorySource::Ai, Some(0.2)).unwrap(), 0.2);
        assert!(matches!(
            policy.signal_for(MemorySource::Ai, Some(-0.1)),
            Err(CompanionError::Validation(_))
        ));
    }

    #[test]
    fn config_overrides_and_rejects_bad_rates() {
        let config: Config = serde_json::from_value(json!({
            "reinforcement": {"rate": 0.5, "signals": {"ai": 0.9}}
        }))
        .unwrap();
        let policy = ReinforcementPolicy::from_config(&config).unwrap();
        assert_eq!(policy.rate, 0.5);
        assert_eq!(policy.signals.ai, 0.9);
        assert_eq!(policy.signals.manual, 1.0);

        let config: Config =
            serde_json::from_value(json!({"reinforcement": {"rate": 0.0}})).unwrap();
        assert!(matches!(
            ReinforcementPolicy::from_config(&config),
            Err(CompanionError::Config(_))
        ));
    }

    #[test]
    fn merge_patch_semantics() {
        let current = json!({"tone": "gentle", "times": {"morning": 1}, "drop": true});
        let patch = json!({"times": {"evening": 2}, "drop": null, "new": {"a": null, "b": 1}});
        assert_eq!(
            merge_value(&current, &patch),
            json!({"tone": "gentle", "times": {"morning": 1, "evening": 2}, "new": {"b": 1}})
        );
        assert_eq!(merge_value(&current, &json!("plain")), json!("plain"));
        assert_eq!(merge_value(&json!(3), &json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn pattern_keys_are_stable() {
        assert_eq!(
            derive_pattern_key("repeated", "skipped_meal"),
            "repeated:skipped_meal"
        );
        assert_eq!(
            derive_pattern_key("repeated", "skipped_meal"),
            derive_pattern_key("repeated", " skipped_meal ")
        );
        assert_eq!(derive_pattern_key("", "x"), "repeated:x");
    }

    #[test]
    fn observations_widen_window_and_respect_status() {
        let start = PatternCounters::first(100);
        let (next, outcome) = apply_observation(start, 200);
        assert_eq!(outcome, ObserveOutcome::Counted);
        assert_eq!(next.occurrence_count, 2);
        assert_eq!((next.first_seen_at, next.last_seen_at), (100, 200));

        let (late, _) = apply_observation(next, 150);
        assert_eq!(late.occurrence_count, 3);
        assert_eq!(late.last_seen_at, 200);

        let resolved = PatternCounters {
            status: PatternStatus::Resolved,
            ..late
        };
        let (same, outcome) = apply_observation(resolved, 300);
        assert_eq!(outcome, ObserveOutcome::Suppressed);
        assert_eq!(same, resolved);
    }
}
