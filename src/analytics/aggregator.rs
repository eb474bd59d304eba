//! Single-pass visit aggregation
//!
//! [`Aggregator::aggregate`] folds a link's full visit history into a
//! [`Report`]. It is a pure function of the history, the supplied "now" and
//! the viewer timezone: it performs no I/O and never fails. Malformed or
//! missing fields degrade to their defaults instead of aborting the pass.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::analytics::ip_extractor::mask_ip;
use crate::analytics::locations::LocationNames;
use crate::analytics::report::{
    heatmap_points, top_entries, top_sources, HeatBucket, RecentVisit, Report, RECENT_ACTIVITY,
    TOP_LOCATIONS, TOP_SOURCES,
};
use crate::models::{VisitEvent, DIRECT, UNKNOWN};

const TREND_WINDOW_DAYS: i64 = 30;

/// Counts keyed by label, remembering first-seen order
#[derive(Default)]
struct Tally {
    index: HashMap<String, usize>,
    rows: Vec<(String, u64)>,
}

impl Tally {
    fn add(&mut self, key: &str) {
        match self.index.get(key) {
            Some(&i) => self.rows[i].1 += 1,
            None => {
                self.index.insert(key.to_string(), self.rows.len());
                self.rows.push((key.to_string(), 1));
            }
        }
    }
}

/// Per-name clicks plus the distinct addresses behind them
#[derive(Default)]
struct GeoTally<'a> {
    index: HashMap<&'a str, usize>,
    rows: Vec<(&'a str, u64, HashSet<&'a str>)>,
}

impl<'a> GeoTally<'a> {
    fn add(&mut self, name: &'a str, ip: &'a str) {
        let i = *self.index.entry(name).or_insert_with(|| {
            self.rows.push((name, 0, HashSet::new()));
            self.rows.len() - 1
        });
        let row = &mut self.rows[i];
        row.1 += 1;
        row.2.insert(ip);
    }

    fn into_rows(self) -> Vec<(String, u64, u64)> {
        self.rows
            .into_iter()
            .map(|(name, total, ips)| (name.to_string(), total, ips.len() as u64))
            .collect()
    }
}

struct Spot<'a> {
    lat: f64,
    lng: f64,
    location: &'a str,
    total: u64,
    ips: HashSet<&'a str>,
}

/// Coordinate buckets keyed by exact value, in first-seen order
#[derive(Default)]
struct Heatmap<'a> {
    index: HashMap<(u64, u64), usize>,
    spots: Vec<Spot<'a>>,
}

impl<'a> Heatmap<'a> {
    fn add(&mut self, event: &'a VisitEvent, ip: &'a str) {
        let key = (event.latitude.to_bits(), event.longitude.to_bits());
        let i = *self.index.entry(key).or_insert_with(|| {
            self.spots.push(Spot {
                lat: event.latitude,
                lng: event.longitude,
                location: &event.location,
                total: 0,
                ips: HashSet::new(),
            });
            self.spots.len() - 1
        });
        let spot = &mut self.spots[i];
        spot.total += 1;
        spot.ips.insert(ip);
    }

    fn into_buckets(self) -> Vec<HeatBucket> {
        self.spots
            .into_iter()
            .map(|s| HeatBucket {
                lat: s.lat,
                lng: s.lng,
                location: s.location.to_string(),
                total: s.total,
                unique: s.ips.len() as u64,
            })
            .collect()
    }
}

fn or_default<'a>(value: &'a str, default: &'static str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

/// Folds visit histories into dashboard reports for one viewer timezone
#[derive(Debug, Clone)]
pub struct Aggregator {
    names: LocationNames,
    tz: FixedOffset,
}

impl Aggregator {
    pub fn new(names: LocationNames, tz: FixedOffset) -> Self {
        Self { names, tz }
    }

    pub fn timezone(&self) -> FixedOffset {
        self.tz
    }

    fn local_time(&self, timestamp_ms: i64) -> Option<DateTime<FixedOffset>> {
        DateTime::from_timestamp_millis(timestamp_ms).map(|t| t.with_timezone(&self.tz))
    }

    /// Aggregate `history` as seen at `now_ms` (epoch milliseconds).
    ///
    /// Events with a non-positive timestamp are skipped entirely, so every
    /// count in the report covers the same set of visits.
    pub fn aggregate(&self, history: &[VisitEvent], now_ms: i64) -> Report {
        let today = self.local_time(now_ms).map(|t| t.date_naive());
        let window_start = now_ms - Duration::days(TREND_WINDOW_DAYS).num_milliseconds();

        let mut total_clicks = 0u64;
        let mut clicks_today = 0u64;
        let mut unique_total: HashSet<&str> = HashSet::new();
        let mut unique_today: HashSet<&str> = HashSet::new();
        let mut trend: BTreeMap<NaiveDate, u64> = BTreeMap::new();
        let mut device_stats = [0u64; 4];
        let mut os_stats: BTreeMap<String, u64> = BTreeMap::new();
        let mut hourly_stats = [0u64; 24];
        let mut hourly_ips: [HashSet<&str>; 24] = std::array::from_fn(|_| HashSet::new());
        let mut sources = Tally::default();
        let mut cities = GeoTally::default();
        let mut states = GeoTally::default();
        let mut countries = GeoTally::default();
        let mut heatmap = Heatmap::default();
        let mut counted: Vec<(&VisitEvent, DateTime<FixedOffset>)> = Vec::new();

        for event in history {
            if event.timestamp <= 0 {
                continue;
            }
            let Some(local) = self.local_time(event.timestamp) else {
                continue;
            };

            let ip = or_default(&event.ip, UNKNOWN);
            total_clicks += 1;
            unique_total.insert(ip);

            let day = local.date_naive();
            if Some(day) == today {
                clicks_today += 1;
                unique_today.insert(ip);
            }
            if event.timestamp >= window_start {
                *trend.entry(day).or_insert(0) += 1;
            }

            device_stats[event.device.index()] += 1;
            *os_stats
                .entry(or_default(&event.os, UNKNOWN).to_string())
                .or_insert(0) += 1;
            sources.add(or_default(&event.referrer, DIRECT));

            let hour = local.hour() as usize;
            hourly_stats[hour] += 1;
            if ip != UNKNOWN {
                hourly_ips[hour].insert(ip);
            }

            if !event.location.is_empty() && event.location != UNKNOWN {
                let mut parts = event.location.split(',').map(str::trim);
                let city = parts.next().filter(|s| !s.is_empty()).unwrap_or(UNKNOWN);
                let country = match parts.next().filter(|s| !s.is_empty()) {
                    Some(code) => self.names.country_name(code),
                    None => UNKNOWN,
                };
                cities.add(city, ip);
                countries.add(country, ip);
            }

            if !event.region.is_empty() && event.region != UNKNOWN {
                states.add(self.names.region_name(&event.region), ip);
            }

            if event.latitude != 0.0
                && event.longitude != 0.0
                && event.latitude.is_finite()
                && event.longitude.is_finite()
            {
                heatmap.add(event, ip);
            }

            counted.push((event, local));
        }

        let (trend_labels, trend_data): (Vec<String>, Vec<u64>) = trend
            .into_iter()
            .map(|(day, count)| (day.format("%b %-d").to_string(), count))
            .unzip();

        let (source_labels, source_data) = top_sources(sources.rows, TOP_SOURCES);
        let (heatmap_points, max_total_clicks, max_unique_visitors) =
            heatmap_points(heatmap.into_buckets());

        let recent_activity = counted
            .iter()
            .rev()
            .take(RECENT_ACTIVITY)
            .map(|(event, local)| RecentVisit {
                timestamp: local.format("%-d %b %Y, %I:%M %P").to_string(),
                location: or_default(&event.location, UNKNOWN).to_string(),
                referrer: or_default(&event.referrer, DIRECT).to_string(),
                device: event.device.as_str().to_string(),
                os: or_default(&event.os, UNKNOWN).to_string(),
                ip: mask_ip(&event.ip),
            })
            .collect();

        Report {
            total_clicks,
            unique_total: unique_total.len() as u64,
            clicks_today,
            unique_today: unique_today.len() as u64,
            trend_labels,
            trend_data,
            device_stats,
            os_stats,
            hourly_stats,
            hourly_unique: hourly_ips.map(|ips| ips.len() as u64),
            source_labels,
            source_data,
            top_cities: top_entries(cities.into_rows(), TOP_LOCATIONS),
            top_states: top_entries(states.into_rows(), TOP_LOCATIONS),
            top_countries: top_entries(countries.into_rows(), TOP_LOCATIONS),
            heatmap_points,
            max_total_clicks,
            max_unique_visitors,
            recent_activity,
        }
    }
}

/// One-shot form of [`Aggregator::aggregate`]
pub fn aggregate(
    history: &[VisitEvent],
    now_ms: i64,
    tz: FixedOffset,
    names: &LocationNames,
) -> Report {
    Aggregator::new(names.clone(), tz).aggregate(history, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;
    use chrono::TimeZone;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(330 * 60).unwrap()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(LocationNames::new(), ist())
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        ist()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn visit(timestamp: i64, ip: &str) -> VisitEvent {
        VisitEvent {
            ip: ip.to_string(),
            ..VisitEvent::at(timestamp)
        }
    }

    fn now() -> i64 {
        at(2025, 3, 5, 12, 0)
    }

    #[test]
    fn empty_history_yields_zeroed_report() {
        let report = aggregator().aggregate(&[], now());

        assert_eq!(report.total_clicks, 0);
        assert_eq!(report.unique_total, 0);
        assert!(report.trend_labels.is_empty());
        assert_eq!(report.device_stats, [0; 4]);
        assert_eq!(report.hourly_stats, [0; 24]);
        assert!(report.heatmap_points.is_empty());
        assert_eq!(report.max_total_clicks, 1);
        assert_eq!(report.max_unique_visitors, 1);
        assert!(report.recent_activity.is_empty());
    }

    #[test]
    fn three_visit_history() {
        let mumbai = VisitEvent {
            device: Device::Mobile,
            os: "Android".to_string(),
            location: "Mumbai, IN".to_string(),
            region: "MH".to_string(),
            latitude: 19.07,
            longitude: 72.87,
            referrer: "Direct".to_string(),
            ..visit(at(2025, 3, 5, 9, 15), "103.240.232.15")
        };
        let delhi_morning = VisitEvent {
            device: Device::Desktop,
            os: "Windows".to_string(),
            location: "Delhi, IN".to_string(),
            region: "DL".to_string(),
            latitude: 28.61,
            longitude: 77.20,
            referrer: "google.com".to_string(),
            ..visit(at(2025, 3, 4, 9, 40), "49.36.12.1")
        };
        let delhi_afternoon = VisitEvent {
            timestamp: at(2025, 3, 4, 14, 30),
            ..delhi_morning.clone()
        };

        let history = vec![delhi_morning, delhi_afternoon, mumbai];
        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.total_clicks, 3);
        assert_eq!(report.unique_total, 2);
        assert_eq!(report.clicks_today, 1);
        assert_eq!(report.unique_today, 1);
        assert_eq!(report.trend_labels, vec!["Mar 4", "Mar 5"]);
        assert_eq!(report.trend_data, vec![2, 1]);
        assert_eq!(report.device_stats, [2, 1, 0, 0]);
        assert_eq!(report.os_stats.get("Windows"), Some(&2));
        assert_eq!(report.os_stats.get("Android"), Some(&1));
        assert_eq!(report.hourly_stats[9], 2);
        assert_eq!(report.hourly_stats[14], 1);
        assert_eq!(report.hourly_unique[9], 2);
        assert_eq!(report.source_labels, vec!["google.com", "Direct"]);
        assert_eq!(report.source_data, vec![2, 1]);

        assert_eq!(report.top_cities[0].name, "Delhi");
        assert_eq!(report.top_cities[0].total, 2);
        assert_eq!(report.top_cities[0].unique, 1);
        assert_eq!(report.top_states[0].name, "Delhi");
        assert_eq!(report.top_states[1].name, "Maharashtra");
        assert_eq!(report.top_countries.len(), 1);
        assert_eq!(report.top_countries[0].name, "India");
        assert_eq!(report.top_countries[0].total, 3);
        assert_eq!(report.top_countries[0].unique, 2);

        assert_eq!(report.heatmap_points.len(), 2);
        assert_eq!(report.max_total_clicks, 2);
        assert_eq!(report.heatmap_points[0].location, "Delhi, IN");
        assert_eq!(report.heatmap_points[0].intensity_total, 1.0);
        assert_eq!(report.heatmap_points[1].intensity_total, 0.5);
        assert_eq!(report.heatmap_points[1].intensity_unique, 1.0);

        assert_eq!(report.recent_activity.len(), 3);
        assert_eq!(report.recent_activity[0].location, "Mumbai, IN");
        assert_eq!(report.recent_activity[0].ip, "103.240.xx.xx");
        assert_eq!(report.recent_activity[0].timestamp, "5 Mar 2025, 09:15 am");
        assert_eq!(report.recent_activity[2].timestamp, "4 Mar 2025, 09:40 am");
    }

    #[test]
    fn counts_stay_consistent() {
        let history: Vec<VisitEvent> = (0..40)
            .map(|i| VisitEvent {
                device: Device::ALL[i % 4],
                ..visit(now() - (i as i64) * 3_600_000, &format!("10.0.0.{}", i % 7))
            })
            .collect();

        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.total_clicks, 40);
        assert_eq!(report.device_stats.iter().sum::<u64>(), 40);
        assert_eq!(report.hourly_stats.iter().sum::<u64>(), 40);
        assert_eq!(report.os_stats.values().sum::<u64>(), 40);
        assert_eq!(report.trend_data.iter().sum::<u64>(), 40);
        assert!(report.unique_today <= report.unique_total);
        assert!(report.clicks_today <= report.total_clicks);
        assert!(report
            .hourly_unique
            .iter()
            .zip(report.hourly_stats.iter())
            .all(|(u, t)| u <= t));
    }

    #[test]
    fn days_are_bucketed_in_viewer_timezone() {
        // 20:00 UTC on Mar 4 is 01:30 on Mar 5 in IST
        let ts = chrono::Utc
            .with_ymd_and_hms(2025, 3, 4, 20, 0, 0)
            .unwrap()
            .timestamp_millis();
        let report = aggregator().aggregate(&[visit(ts, "1.2.3.4")], now());

        assert_eq!(report.clicks_today, 1);
        assert_eq!(report.trend_labels, vec!["Mar 5"]);
        assert_eq!(report.hourly_stats[1], 1);
    }

    #[test]
    fn old_visits_count_but_leave_the_trend() {
        let old = visit(at(2025, 1, 1, 10, 0), "1.1.1.1");
        let recent = visit(at(2025, 3, 1, 10, 0), "1.1.1.1");
        let report = aggregator().aggregate(&[old, recent], now());

        assert_eq!(report.total_clicks, 2);
        assert_eq!(report.trend_labels, vec!["Mar 1"]);
        assert_eq!(report.trend_data, vec![1]);
    }

    #[test]
    fn unknown_addresses_share_one_unique_slot() {
        let history = vec![
            visit(at(2025, 3, 5, 8, 0), ""),
            visit(at(2025, 3, 5, 8, 10), "Unknown"),
            visit(at(2025, 3, 5, 8, 20), "5.6.7.8"),
        ];
        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.unique_total, 2);
        assert_eq!(report.unique_today, 2);
        assert_eq!(report.hourly_unique[8], 1);
    }

    #[test]
    fn undated_events_are_skipped() {
        let history = vec![visit(0, "1.1.1.1"), visit(-5, "2.2.2.2"), visit(now(), "3.3.3.3")];
        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.total_clicks, 1);
        assert_eq!(report.unique_total, 1);
        assert_eq!(report.recent_activity.len(), 1);
    }

    #[test]
    fn sources_keep_top_five_with_stable_ties() {
        let referrers = ["a.com", "b.com", "c.com", "d.com", "e.com", "f.com", "b.com"];
        let history: Vec<VisitEvent> = referrers
            .iter()
            .map(|r| VisitEvent {
                referrer: r.to_string(),
                ..visit(now(), "1.1.1.1")
            })
            .collect();
        let report = aggregator().aggregate(&history, now());

        assert_eq!(
            report.source_labels,
            vec!["b.com", "a.com", "c.com", "d.com", "e.com"]
        );
        assert_eq!(report.source_data, vec![2, 1, 1, 1, 1]);
    }

    #[test]
    fn location_parsing_edge_cases() {
        let history = vec![
            VisitEvent {
                location: "Springfield".to_string(),
                ..visit(now(), "1.1.1.1")
            },
            VisitEvent {
                location: "Lyon, ZZ".to_string(),
                region: "ARA".to_string(),
                ..visit(now(), "1.1.1.2")
            },
        ];
        let report = aggregator().aggregate(&history, now());

        let countries: Vec<&str> = report.top_countries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(countries, vec!["Unknown", "ZZ"]);
        let cities: Vec<&str> = report.top_cities.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(cities, vec!["Springfield", "Lyon"]);
        assert_eq!(report.top_states[0].name, "ARA");
    }

    #[test]
    fn zero_coordinates_stay_off_the_map() {
        let history = vec![
            VisitEvent {
                latitude: 0.0,
                longitude: 72.0,
                ..visit(now(), "1.1.1.1")
            },
            VisitEvent {
                latitude: 19.0,
                longitude: 72.0,
                ..visit(now(), "1.1.1.1")
            },
        ];
        let report = aggregator().aggregate(&history, now());
        assert_eq!(report.heatmap_points.len(), 1);
        assert_eq!(report.heatmap_points[0].lat, 19.0);
    }

    #[test]
    fn top_locations_cap_at_ten() {
        let history: Vec<VisitEvent> = (0..15)
            .map(|i| VisitEvent {
                location: format!("City{i}, IN"),
                ..visit(now(), "1.1.1.1")
            })
            .collect();
        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.top_cities.len(), 10);
        assert_eq!(report.top_cities[0].name, "City0");
    }

    #[test]
    fn recent_activity_is_newest_first_and_capped() {
        let history: Vec<VisitEvent> = (1..=60)
            .map(|i| visit(now() - (60 - i) * 1000, "9.9.9.9"))
            .collect();
        let report = aggregator().aggregate(&history, now());

        assert_eq!(report.recent_activity.len(), 50);
        assert_eq!(report.recent_activity[0].ip, "9.9.xx.xx");
        assert_eq!(report.recent_activity[0].timestamp, "5 Mar 2025, 12:00 pm");
    }

    #[test]
    fn aggregation_is_repeatable() {
        let history = vec![
            VisitEvent {
                location: "Pune, IN".to_string(),
                region: "MH".to_string(),
                latitude: 18.5,
                longitude: 73.8,
                ..visit(now(), "1.1.1.1")
            },
            visit(now() - 86_400_000, "2.2.2.2"),
        ];
        let engine = aggregator();
        assert_eq!(engine.aggregate(&history, now()), engine.aggregate(&history, now()));
        assert_eq!(
            engine.aggregate(&history, now()),
            aggregate(&history, now(), ist(), &LocationNames::new())
        );
    }
}
