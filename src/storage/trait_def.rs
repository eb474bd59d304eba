use crate::models::{ShortLink, VisitEvent};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists")]
    Conflict,
    #[error("short code not found")]
    NotFound,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence seam for short links and their visit histories.
///
/// Implementations must allow `append_visit` to run concurrently with
/// `visits` on the same code; a read may or may not observe an in-flight
/// append.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (run migrations, etc.)
    async fn init(&self) -> Result<()>;

    /// Create a new short link with a caller-provided code
    async fn create_with_code(
        &self,
        short_code: &str,
        original_url: &str,
        created_by: Option<&str>,
    ) -> StorageResult<ShortLink>;

    /// Get a short link by code
    async fn get(&self, short_code: &str) -> Result<Option<ShortLink>>;

    /// Append one visit to the link's history.
    ///
    /// Returns [`StorageError::NotFound`] when the link does not exist.
    async fn append_visit(&self, short_code: &str, visit: &VisitEvent) -> StorageResult<()>;

    /// Full visit history in insertion order
    async fn visits(&self, short_code: &str) -> Result<Vec<VisitEvent>>;

    /// List links, newest first. `None` lists every link.
    async fn list(&self, created_by: Option<&str>) -> Result<Vec<ShortLink>>;

    /// Delete a link and its history if it is owned by `owner`
    async fn delete(&self, short_code: &str, owner: &str) -> Result<bool>;

    /// Whether the user has been promoted to administrator
    async fn is_admin(&self, user_id: &str) -> Result<bool>;

    async fn promote_to_admin(&self, user_id: &str) -> Result<()>;

    async fn demote_from_admin(&self, user_id: &str) -> Result<bool>;

    async fn list_admins(&self) -> Result<Vec<String>>;
}
