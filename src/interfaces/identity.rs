use async_trait::async_trait;

use crate::error::Result;

/// Source of truth for whether a user exists. The engine asks it before
/// running a lifecycle purge. Write paths check existence inside their own
/// transaction instead, so a check and its write cannot be split by a delete.
#[async_trait]
pub trait IdentityService: Send + Sync {
    async fn user_exists(&self, user_id: i32) -> Result<bool>;
}
