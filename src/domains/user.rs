use serde::{Deserialize, Serialize};

use super::require_key;
use crate::error::{CompanionError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub name: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
    pub last_login_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    pub name: Option<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>, hashed_password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            hashed_password: hashed_password.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_key("hashed_password", &self.hashed_password)?;
        normalize_email(&self.email).map(|_| ())
    }
}

/// Lower-cased, trimmed email; uniqueness is enforced on this form.
pub fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    let valid = normalized
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && !domain.is_empty())
        .unwrap_or(false);
    if !valid {
        return Err(CompanionError::Validation(format!(
            "invalid email address {email:?}"
        )));
    }
    Ok(normalized)
}

/// Notification from the identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserLifecycleEvent {
    Created(i32),
    Disabled(i32),
    Deleted(i32),
}
