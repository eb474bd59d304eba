use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{
        header::{self, HeaderMap, HeaderValue},
        StatusCode,
    },
    response::IntoResponse,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

use super::middleware::RequestStart;
use crate::analytics::{
    attribute_referrer, classify, extract_client_ip, normalize_client_ip, PendingVisit,
    VisitRecorder,
};
use crate::config::AnalyticsConfig;
use crate::storage::Storage;

pub struct RedirectState {
    pub storage: Arc<dyn Storage>,
    /// `None` when analytics is disabled
    pub recorder: Option<Arc<VisitRecorder>>,
    pub analytics_config: AnalyticsConfig,
}

/// Campaign parameters that name a visit's source explicitly
#[derive(Debug, Default, Deserialize)]
pub struct CampaignParams {
    pub source: Option<String>,
    pub utm_source: Option<String>,
}

impl CampaignParams {
    fn campaign(&self) -> Option<&str> {
        self.source
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.utm_source.as_deref())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|h| h.to_str().ok())
}

/// Classify the request and build the visit to record, or `None` for bots
pub fn pending_visit(
    short_code: &str,
    headers: &HeaderMap,
    socket_addr: SocketAddr,
    params: &CampaignParams,
    config: &AnalyticsConfig,
) -> Option<PendingVisit> {
    let user_agent = header_str(headers, header::USER_AGENT).unwrap_or("");
    let classification = classify(user_agent);
    if classification.is_bot {
        debug!(short_code = %short_code, "bot detected, skipping visit");
        return None;
    }

    let client_ip = extract_client_ip(headers, socket_addr.ip(), config);

    Some(PendingVisit {
        short_code: short_code.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        device: classification.device,
        os: classification.os.to_string(),
        ip: normalize_client_ip(client_ip),
        referrer: attribute_referrer(
            params.campaign(),
            header_str(headers, header::REFERER),
            header_str(headers, header::HOST),
        ),
    })
}

/// Redirect to the destination and queue the visit
pub async fn redirect_url(
    State(state): State<Arc<RedirectState>>,
    Path(code): Path<String>,
    Query(params): Query<CampaignParams>,
    Extension(RequestStart(request_start)): Extension<RequestStart>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let link = match state.storage.get(&code).await {
        Ok(Some(link)) => link,
        Ok(None) => return (StatusCode::NOT_FOUND, "URL not found").into_response(),
        Err(e) => {
            error!(short_code = %code, error = %e, "failed to look up short link");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let Ok(location) = HeaderValue::from_str(&link.original_url) else {
        error!(short_code = %code, "destination is not a valid header value");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Invalid destination").into_response();
    };

    if let Some(recorder) = &state.recorder {
        if let Some(visit) = pending_visit(&code, &headers, addr, &params, &state.analytics_config)
        {
            recorder.record(visit);
        }
    }

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::LOCATION, location);
    response_headers.insert(
        "x-clickmap-timing-total-ms",
        HeaderValue::from(request_start.elapsed().as_millis() as u64),
    );

    (StatusCode::FOUND, response_headers).into_response()
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    #[derive(Serialize)]
    struct HealthResponse {
        status: String,
    }

    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;

    fn socket() -> SocketAddr {
        "203.0.113.9:5000".parse().unwrap()
    }

    #[test]
    fn bots_are_not_recorded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("Googlebot/2.1 (+http://www.google.com/bot.html)"),
        );

        let visit = pending_visit(
            "abc",
            &headers,
            socket(),
            &CampaignParams::default(),
            &AnalyticsConfig::default(),
        );
        assert!(visit.is_none());
    }

    #[test]
    fn visit_is_classified_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static("Mozilla/5.0 (Linux; Android 14) Mobile Safari"),
        );
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://www.google.com/search?q=x"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("49.36.12.1"));

        let visit = pending_visit(
            "abc",
            &headers,
            socket(),
            &CampaignParams::default(),
            &AnalyticsConfig::default(),
        )
        .unwrap();

        assert_eq!(visit.device, Device::Mobile);
        assert_eq!(visit.os, "Android");
        assert_eq!(visit.ip, "49.36.12.1");
        assert_eq!(visit.referrer, "google.com");
        assert!(visit.timestamp > 0);
    }

    #[test]
    fn campaign_source_wins_over_referer() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::REFERER,
            HeaderValue::from_static("https://t.co/abc"),
        );
        let params = CampaignParams {
            source: None,
            utm_source: Some("newsletter".to_string()),
        };

        let visit = pending_visit(
            "abc",
            &headers,
            socket(),
            &params,
            &AnalyticsConfig::default(),
        )
        .unwrap();
        assert_eq!(visit.referrer, "newsletter");
        assert_eq!(visit.ip, "203.0.113.9");
    }
}
