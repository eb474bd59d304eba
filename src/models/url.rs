use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A short code and where it points.
///
/// The visit history lives in its own table and is loaded separately through
/// [`crate::storage::Storage::visits`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ShortLink {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    pub created_at: i64,
    pub created_by: Option<String>,
}

impl ShortLink {
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.created_by.as_deref() == Some(user_id)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUrlRequest {
    pub url: String,
    pub custom_code: Option<String>,
}
