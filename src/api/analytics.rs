//! Analytics API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error};

use crate::analytics::{Aggregator, Report};
use crate::auth::AuthUser;
use crate::storage::Storage;

use super::handlers::{api_error, AppState};

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("short link not found")]
    NotFound,
    #[error("not allowed to view analytics for this link")]
    Unauthorized,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
    #[error("failed to render report: {0}")]
    Render(#[from] serde_json::Error),
}

impl IntoResponse for AnalyticsError {
    fn into_response(self) -> Response {
        match self {
            AnalyticsError::NotFound => api_error(StatusCode::NOT_FOUND, "URL not found"),
            AnalyticsError::Unauthorized => api_error(
                StatusCode::FORBIDDEN,
                "You are not allowed to view analytics for this URL",
            ),
            AnalyticsError::Storage(e) => {
                error!("Failed to load analytics: {:#}", e);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to retrieve analytics",
                )
            }
            AnalyticsError::Render(e) => {
                error!("Failed to render analytics: {}", e);
                api_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to render analytics",
                )
            }
        }
        .into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQueryParams {
    /// `template` returns the flat dashboard context instead of the report
    pub format: Option<String>,
}

/// Load a link's history and aggregate it for `viewer`.
///
/// Ownership is checked before any history is read.
pub async fn build_report(
    storage: &dyn Storage,
    aggregator: &Aggregator,
    short_code: &str,
    viewer: &AuthUser,
    now_ms: i64,
) -> Result<Report, AnalyticsError> {
    let link = storage
        .get(short_code)
        .await?
        .ok_or(AnalyticsError::NotFound)?;

    if !viewer.is_admin && !link.is_owned_by(&viewer.user_id) {
        return Err(AnalyticsError::Unauthorized);
    }

    let history = storage.visits(short_code).await?;
    debug!(short_code = %short_code, visits = history.len(), "aggregating history");
    Ok(aggregator.aggregate(&history, now_ms))
}

/// Get the analytics report for a specific short code
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(short_code): Path<String>,
    Query(params): Query<AnalyticsQueryParams>,
) -> Result<Response, AnalyticsError> {
    let report = build_report(
        state.storage.as_ref(),
        &state.aggregator,
        &short_code,
        &user,
        Utc::now().timestamp_millis(),
    )
    .await?;

    if params.format.as_deref() == Some("template") {
        let context = report.template_context()?;
        return Ok(Json(context).into_response());
    }

    Ok(Json(report).into_response())
}
