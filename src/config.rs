use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{CompanionError, Result};

pub const DB_PATH_ENV: &str = "COMPANION_MEMORY_DB";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    pub sqlite_path: Option<String>,
    pub pool_size: Option<u32>,
    pub busy_timeout_ms: Option<u64>,
    pub operation_timeout_ms: Option<u64>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SourceSignalsConfig {
    pub ai: Option<f64>,
    pub system: Option<f64>,
    pub manual: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReinforcementConfig {
    pub default_confidence: Option<f64>,
    pub rate: Option<f64>,
    pub signals: Option<SourceSignalsConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PatternConfig {
    pub key_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuditConfig {
    pub log_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub storage: Option<StorageConfig>,
    pub reinforcement: Option<ReinforcementConfig>,
    pub patterns: Option<PatternConfig>,
    pub audit: Option<AuditConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CompanionError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| CompanionError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Config with only the database path set.
    pub fn with_sqlite_path(sqlite_path: impl Into<String>) -> Self {
        Self {
            storage: Some(StorageConfig {
                sqlite_path: Some(sqlite_path.into()),
                ..StorageConfig::default()
            }),
            ..Config::default()
        }
    }

    /// Resolves the database path: environment override, then config, then default.
    pub fn sqlite_path(&self) -> String {
        if let Ok(value) = std::env::var(DB_PATH_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        self.storage
            .as_ref()
            .and_then(|storage| storage.sqlite_path.as_deref())
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .unwrap_or_else(default_db_path)
    }

    pub fn pattern_key_prefix(&self) -> Result<String> {
        let prefix = self
            .patterns
            .as_ref()
            .and_then(|patterns| patterns.key_prefix.as_deref())
            .unwrap_or(DEFAULT_PATTERN_PREFIX)
            .trim()
            .to_string();
        if prefix.is_empty() || prefix.contains(':') {
            return Err(CompanionError::Config(format!(
                "patterns.key_prefix must be non-empty and contain no ':' (got {prefix:?})"
            )));
        }
        Ok(prefix)
    }

    pub fn audit_log_path(&self) -> Option<String> {
        self.audit
            .as_ref()
            .and_then(|audit| audit.log_path.as_deref())
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
    }
}

pub const DEFAULT_PATTERN_PREFIX: &str = "repeated";

pub fn default_db_path() -> String {
    "./data/companion.db".to_string()
}

/// Storage knobs with defaults applied and bounds checked.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub sqlite_path: String,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub page_size: usize,
}

impl StorageSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let storage = config.storage.clone().unwrap_or_default();
        let settings = Self {
            sqlite_path: config.sqlite_path(),
            pool_size: storage.pool_size.unwrap_or(8),
            busy_timeout_ms: storage.busy_timeout_ms.unwrap_or(5_000),
            operation_timeout_ms: storage.operation_timeout_ms.unwrap_or(5_000),
            page_size: storage.page_size.unwrap_or(256),
        };
        if settings.pool_size == 0 {
            return Err(CompanionError::Config(
                "storage.pool_size must be positive".to_string(),
            ));
        }
        if settings.operation_timeout_ms == 0 {
            return Err(CompanionError::Config(
                "storage.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if settings.page_size == 0 {
            return Err(CompanionError::Config(
                "storage.page_size must be positive".to_string(),
            ));
        }
        Ok(settings)
    }

    /// Lock wait applied to each write. Never longer than the operation
    /// timeout, so a held lock surfaces as `StoreUnavailable` in time.
    pub fn effective_busy_timeout_ms(&self) -> u64 {
        self.busy_timeout_ms.min(self.operation_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_missing() {
        let config = Config::default();
        let settings = StorageSettings::from_config(&config).unwrap();
        assert_eq!(settings.pool_size, 8);
        assert_eq!(settings.page_size, 256);
        assert_eq!(config.pattern_key_prefix().unwrap(), "repeated");
        assert!(config.audit_log_path().is_none());
    }

    #[test]
    fn busy_wait_is_capped_by_operation_timeout() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "storage": {"busy_timeout_ms": 3000, "operation_timeout_ms": 300}
        }))
        .unwrap();
        let settings = StorageSettings::from_config(&config).unwrap();
        assert_eq!(settings.effective_busy_timeout_ms(), 300);
        assert_eq!(
            StorageSettings::from_config(&Config::default())
                .unwrap()
                .effective_busy_timeout_ms(),
            5_000
        );
    }

    #[test]
    fn rejects_bad_values() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "storage": {"pool_size": 0},
            "patterns": {"key_prefix": "a:b"}
        }))
        .unwrap();
        assert!(matches!(
            StorageSettings::from_config(&config),
            Err(CompanionError::Config(_))
        ));
        assert!(matches!(
            config.pattern_key_prefix(),
            Err(CompanionError::Config(_))
        ));
    }
}
