use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompanionError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("reference error: {0}")]
    Reference(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, CompanionError>;

impl CompanionError {
    /// Stable name of the error class, used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Reference(_) => "reference",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ConstraintViolation(_) => "constraint_violation",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
            Self::Runtime(_) => "runtime",
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<DieselError> for CompanionError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::Reference("record not found".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::ConstraintViolation(info.message().to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, info) => {
                Self::Reference(info.message().to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, info) => {
                Self::Validation(info.message().to_string())
            }
            DieselError::DatabaseError(_, info) => {
                let message = info.message().to_string();
                if is_busy_message(&message) {
                    Self::StoreUnavailable(message)
                } else {
                    Self::Runtime(message)
                }
            }
            other => Self::Runtime(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for CompanionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

fn is_busy_message(message: &str) -> bool {
    let lowered = message.to_ascii_lowercase();
    lowered.contains("database is locked")
        || lowered.contains("database table is locked")
        || lowered.contains("busy")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_display() {
        let err = CompanionError::Config("x".to_string());
        assert!(format!("{err}").contains("configuration error"));
        assert_eq!(err.kind(), "config");

        let err = CompanionError::InvalidStateTransition {
            from: "resolved".to_string(),
            to: "ignored".to_string(),
        };
        assert_eq!(format!("{err}"), "invalid state transition: resolved -> ignored");
        assert!(!err.is_retriable());
        assert!(CompanionError::StoreUnavailable("timeout".to_string()).is_retriable());
    }

    #[test]
    fn classifies_diesel_errors() {
        let err: CompanionError = DieselError::NotFound.into();
        assert!(matches!(err, CompanionError::Reference(_)));

        let err: CompanionError = DieselError::RollbackTransaction.into();
        assert!(matches!(err, CompanionError::Runtime(_)));

        assert!(is_busy_message("database is locked"));
        assert!(!is_busy_message("no such table: events"));
    }
}
