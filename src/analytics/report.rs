//! Dashboard report shapes
//!
//! Field names are a contract with the dashboard templates and must not be
//! renamed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const TOP_SOURCES: usize = 5;
pub const TOP_LOCATIONS: usize = 10;
pub const RECENT_ACTIVITY: usize = 50;

/// Chart fields that the template layer expects as JSON-encoded strings
const CHART_FIELDS: &[&str] = &[
    "trendLabels",
    "trendData",
    "deviceStats",
    "osStats",
    "hourlyStats",
    "hourlyUnique",
    "sourceLabels",
    "sourceData",
    "topCities",
    "topStates",
    "topCountries",
    "heatmapPoints",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopEntry {
    pub name: String,
    pub total: u64,
    pub unique: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPoint {
    pub lat: f64,
    pub lng: f64,
    pub location: String,
    pub total_clicks: u64,
    pub unique_visitors: u64,
    pub intensity_total: f64,
    pub intensity_unique: f64,
}

/// One row of the recent activity table, display-ready
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentVisit {
    pub timestamp: String,
    pub location: String,
    pub referrer: String,
    pub device: String,
    pub os: String,
    /// Masked address, never the stored one
    pub ip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub total_clicks: u64,
    pub unique_total: u64,
    pub clicks_today: u64,
    pub unique_today: u64,
    pub trend_labels: Vec<String>,
    pub trend_data: Vec<u64>,
    /// Desktop, Mobile, Tablet, Bot
    pub device_stats: [u64; 4],
    pub os_stats: BTreeMap<String, u64>,
    pub hourly_stats: [u64; 24],
    pub hourly_unique: [u64; 24],
    pub source_labels: Vec<String>,
    pub source_data: Vec<u64>,
    pub top_cities: Vec<TopEntry>,
    pub top_states: Vec<TopEntry>,
    pub top_countries: Vec<TopEntry>,
    pub heatmap_points: Vec<HeatmapPoint>,
    pub max_total_clicks: u64,
    pub max_unique_visitors: u64,
    pub recent_activity: Vec<RecentVisit>,
}

impl Report {
    /// The flat context handed to the dashboard template: chart fields are
    /// JSON-encoded strings, scalars and `recentActivity` stay plain values.
    pub fn template_context(&self) -> serde_json::Result<Map<String, Value>> {
        let Value::Object(mut fields) = serde_json::to_value(self)? else {
            return Err(serde::ser::Error::custom("report did not serialize to an object"));
        };

        for key in CHART_FIELDS {
            if let Some(value) = fields.get_mut(*key) {
                let encoded = serde_json::to_string(value)?;
                *value = Value::String(encoded);
            }
        }

        Ok(fields)
    }
}

/// Sort `(name, total, unique)` rows by total descending and keep `cap`.
///
/// The sort is stable, so equal totals keep their first-seen order.
pub fn top_entries(mut rows: Vec<(String, u64, u64)>, cap: usize) -> Vec<TopEntry> {
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows.into_iter()
        .take(cap)
        .map(|(name, total, unique)| TopEntry {
            name,
            total,
            unique,
        })
        .collect()
}

/// Split the top sources into parallel label/count vectors
pub fn top_sources(mut rows: Vec<(String, u64)>, cap: usize) -> (Vec<String>, Vec<u64>) {
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows.into_iter().take(cap).unzip()
}

/// Raw per-coordinate counts before normalization
#[derive(Debug, Clone)]
pub struct HeatBucket {
    pub lat: f64,
    pub lng: f64,
    pub location: String,
    pub total: u64,
    pub unique: u64,
}

/// Normalize buckets into intensity points.
///
/// Returns the points together with the maxima used as divisors, each
/// floored at 1 so an empty map never divides by zero.
pub fn heatmap_points(buckets: Vec<HeatBucket>) -> (Vec<HeatmapPoint>, u64, u64) {
    let max_total = buckets.iter().map(|b| b.total).max().unwrap_or(0).max(1);
    let max_unique = buckets.iter().map(|b| b.unique).max().unwrap_or(0).max(1);

    let points = buckets
        .into_iter()
        .map(|b| HeatmapPoint {
            lat: b.lat,
            lng: b.lng,
            location: b.location,
            total_clicks: b.total,
            unique_visitors: b.unique,
            intensity_total: b.total as f64 / max_total as f64,
            intensity_unique: b.unique as f64 / max_unique as f64,
        })
        .collect();

    (points, max_total, max_unique)
}
