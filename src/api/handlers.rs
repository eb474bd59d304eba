use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::analytics::Aggregator;
use crate::auth::AuthUser;
use crate::models::{CreateUrlRequest, ShortLink};
use crate::storage::{Storage, StorageError};

const SHORT_CODE_LEN: usize = 8;
const MAX_CUSTOM_CODE_LEN: usize = 20;
const GENERATE_ATTEMPTS: usize = 10;

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub aggregator: Aggregator,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Generate a random alphanumeric short code
pub fn generate_short_code() -> String {
    const CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    std::iter::repeat_with(|| CHARS[rand::random_range(0..CHARS.len())] as char)
        .take(SHORT_CODE_LEN)
        .collect()
}

fn is_valid_custom_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_CUSTOM_CODE_LEN
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Prefix `https://` when the submitted URL carries no scheme
fn normalize_destination(url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Create a new short link owned by the caller
pub async fn create_url(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateUrlRequest>,
) -> Result<(StatusCode, Json<ShortLink>), ApiError> {
    if payload.url.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "URL cannot be empty"));
    }
    let destination = normalize_destination(&payload.url);

    if let Some(custom) = payload.custom_code {
        if !is_valid_custom_code(&custom) {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "Custom code must be 1-20 letters, digits, '-' or '_'",
            ));
        }

        return match state
            .storage
            .create_with_code(&custom, &destination, Some(&user.user_id))
            .await
        {
            Ok(link) => {
                info!(short_code = %link.short_code, "created short link");
                Ok((StatusCode::CREATED, Json(link)))
            }
            Err(StorageError::Conflict) => Err(api_error(
                StatusCode::CONFLICT,
                "Short code already exists",
            )),
            Err(e) => {
                error!("Failed to create URL: {}", e);
                Err(api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to create URL: {}", e),
                ))
            }
        };
    }

    // Generated codes retry on collision
    for _ in 0..GENERATE_ATTEMPTS {
        let code = generate_short_code();
        match state
            .storage
            .create_with_code(&code, &destination, Some(&user.user_id))
            .await
        {
            Ok(link) => {
                info!(short_code = %link.short_code, "created short link");
                return Ok((StatusCode::CREATED, Json(link)));
            }
            Err(StorageError::Conflict) => continue,
            Err(e) => {
                error!("Failed to create URL: {}", e);
                return Err(api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to create URL: {}", e),
                ));
            }
        }
    }

    Err(api_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to generate unique short code",
    ))
}

/// List the caller's links, or every link for administrators
pub async fn list_urls(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Vec<ShortLink>>, ApiError> {
    let owner = (!user.is_admin).then_some(user.user_id.as_str());

    state.storage.list(owner).await.map(Json).map_err(|e| {
        error!("Failed to list URLs: {}", e);
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to list URLs: {}", e),
        )
    })
}

/// Delete a link and its history. Only the owner may delete.
pub async fn delete_url(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(code): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let link = match state.storage.get(&code).await {
        Ok(Some(link)) => link,
        Ok(None) => return Err(api_error(StatusCode::NOT_FOUND, "URL not found")),
        Err(e) => {
            error!("Failed to get URL: {}", e);
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to get URL: {}", e),
            ));
        }
    };

    if !link.is_owned_by(&user.user_id) {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            "Only the owner can delete this URL",
        ));
    }

    match state.storage.delete(&code, &user.user_id).await {
        Ok(true) => {
            info!(short_code = %code, "deleted short link");
            Ok(Json(SuccessResponse {
                message: "URL deleted successfully".to_string(),
            }))
        }
        // Deleted concurrently between the lookup and now
        Ok(false) => Err(api_error(StatusCode::NOT_FOUND, "URL not found")),
        Err(e) => {
            error!("Failed to delete URL: {}", e);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to delete URL: {}", e),
            ))
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
