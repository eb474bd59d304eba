//! IP geolocation behind one normalized return type
//!
//! Two backends are supported, one active at a time:
//! - [`MaxMindLookup`]: memory-mapped MaxMind GeoLite2/GeoIP2 City database
//! - [`IpApiLookup`]: remote ip-api.com style JSON service with a bounded
//!   timeout and a TTL cache in front of it
//!
//! [`GeoResolver`] wraps whichever backend is configured and never fails:
//! every miss or error degrades to [`GeoPoint::unknown`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::analytics::locations::LocationNames;
use crate::config::{AnalyticsConfig, GeoIpBackend};
use crate::models::UNKNOWN;

const GEOIP_CACHE_TTL_SECS: u64 = 15 * 60;
const GEOIP_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Coarse location attached to a visit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// "City, Region", or a country/region name, or "Unknown"
    pub location: String,
    /// Raw region code as reported by the backend, or "Unknown"
    pub region: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn unknown() -> Self {
        Self {
            location: UNKNOWN.to_string(),
            region: UNKNOWN.to_string(),
            latitude: 0.0,
            longitude: 0.0,
        }
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Backend-neutral lookup result before location composition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRecord {
    pub city: Option<String>,
    /// Region/subdivision code, e.g. "MH"
    pub region: Option<String>,
    pub region_name: Option<String>,
    pub country: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A geolocation backend
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Look the address up; `None` on a miss or any failure
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Backend used when geolocation is disabled
pub struct NullLookup;

#[async_trait]
impl GeoLookup for NullLookup {
    async fn lookup(&self, _ip: IpAddr) -> Option<GeoRecord> {
        None
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Offline lookups against a MaxMind City database
pub struct MaxMindLookup {
    reader: Arc<Reader<Mmap>>,
    names: LocationNames,
}

impl MaxMindLookup {
    pub fn new(path: &str, names: LocationNames) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
        Ok(Self {
            reader: Arc::new(reader),
            names,
        })
    }

    fn extract_from_city(&self, city: &geoip2::City) -> GeoRecord {
        let subdivision = city.subdivisions.first();
        let country = city
            .country
            .names
            .english
            .map(str::to_string)
            .or_else(|| {
                city.country
                    .iso_code
                    .map(|code| self.names.country_name(code).to_string())
            });

        GeoRecord {
            city: city.city.names.english.map(str::to_string),
            region: subdivision.and_then(|s| s.iso_code).map(str::to_string),
            region_name: subdivision
                .and_then(|s| s.names.english)
                .map(str::to_string),
            country,
            latitude: city.location.latitude,
            longitude: city.location.longitude,
        }
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord> {
        let result = match self.reader.lookup(ip) {
            Ok(result) => result,
            Err(e) => {
                debug!("MaxMind lookup for {} failed: {}", ip, e);
                return None;
            }
        };

        match result.decode::<geoip2::City>() {
            Ok(Some(city)) => Some(self.extract_from_city(&city)),
            Ok(None) => None,
            Err(e) => {
                debug!("MaxMind record for {} could not be decoded: {}", ip, e);
                None
            }
        }
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}

/// Flat payload returned by ip-api.com
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    status: Option<String>,
    city: Option<String>,
    region: Option<String>,
    region_name: Option<String>,
    country: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
}

impl From<IpApiResponse> for GeoRecord {
    fn from(resp: IpApiResponse) -> Self {
        let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
        Self {
            city: non_empty(resp.city),
            region: non_empty(resp.region),
            region_name: non_empty(resp.region_name),
            country: non_empty(resp.country),
            latitude: resp.lat,
            longitude: resp.lon,
        }
    }
}

/// Remote lookups against an ip-api.com compatible service
///
/// Results, including misses, are cached per address; concurrent lookups for
/// the same address share one HTTP request.
pub struct IpApiLookup {
    client: reqwest::Client,
    api_url_template: String,
    cache: Cache<IpAddr, Option<GeoRecord>>,
}

impl IpApiLookup {
    /// `api_url_template` uses `{ip}` as the placeholder,
    /// e.g. `http://ip-api.com/json/{ip}`
    pub fn new(api_url_template: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("clickmap-geoip/0.1.0")
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for GeoIP lookups")?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(GEOIP_CACHE_TTL_SECS))
            .max_capacity(GEOIP_CACHE_MAX_CAPACITY)
            .build();

        Ok(Self {
            client,
            api_url_template: api_url_template.to_string(),
            cache,
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Result<Option<GeoRecord>> {
        let url = self.api_url_template.replace("{ip}", &ip.to_string());

        let response: IpApiResponse = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GeoIP request to {url} failed"))?
            .error_for_status()
            .context("GeoIP service returned an error status")?
            .json()
            .await
            .context("failed to parse GeoIP response")?;

        if response.status.as_deref() == Some("fail") {
            trace!("GeoIP service reported failure for {}", ip);
            return Ok(None);
        }

        Ok(Some(response.into()))
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord> {
        self.cache
            .get_with(ip, async move {
                self.fetch(ip).await.unwrap_or_else(|e| {
                    warn!("GeoIP lookup for {} failed: {:#}", ip, e);
                    None
                })
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ipapi"
    }
}

/// Resolves client addresses into [`GeoPoint`]s
#[derive(Clone)]
pub struct GeoResolver {
    lookup: Arc<dyn GeoLookup>,
    names: LocationNames,
    fallback_ip: Option<IpAddr>,
}

impl GeoResolver {
    pub fn new(
        lookup: Arc<dyn GeoLookup>,
        names: LocationNames,
        fallback_ip: Option<IpAddr>,
    ) -> Self {
        Self {
            lookup,
            names,
            fallback_ip,
        }
    }

    /// A resolver that never looks anything up
    pub fn disabled(names: LocationNames) -> Self {
        Self::new(Arc::new(NullLookup), names, None)
    }

    /// Build the backend selected by configuration
    pub fn from_config(config: &AnalyticsConfig, names: LocationNames) -> Result<Self> {
        let lookup: Arc<dyn GeoLookup> = match config.geoip_backend {
            GeoIpBackend::None => Arc::new(NullLookup),
            GeoIpBackend::MaxMind => {
                let path = config
                    .geoip_city_db_path
                    .as_deref()
                    .context("GEOIP_CITY_DB_PATH must be set when GEOIP_BACKEND=maxmind")?;
                Arc::new(MaxMindLookup::new(path, names.clone())?)
            }
            GeoIpBackend::IpApi => Arc::new(IpApiLookup::new(
                &config.geoip_api_url,
                Duration::from_millis(config.geoip_timeout_ms),
            )?),
        };

        let fallback_ip = match config.geoip_fallback_ip.parse::<IpAddr>() {
            Ok(ip) => Some(ip),
            Err(_) => {
                warn!(
                    "GEOIP_FALLBACK_IP '{}' is not an IP address, loopback visits will resolve to Unknown",
                    config.geoip_fallback_ip
                );
                None
            }
        };

        info!("GeoIP: Initialized with {} provider", lookup.name());
        Ok(Self::new(lookup, names, fallback_ip))
    }

    pub fn provider_name(&self) -> &'static str {
        self.lookup.name()
    }

    /// Resolve a stored client address. Never fails.
    pub async fn resolve(&self, ip: &str) -> GeoPoint {
        let Some(addr) = self.lookup_target(ip) else {
            return GeoPoint::unknown();
        };

        match self.lookup.lookup(addr).await {
            Some(record) => self.compose(record),
            None => GeoPoint::unknown(),
        }
    }

    /// Loopback clients are looked up as the fallback address so local
    /// runs still produce a location.
    fn lookup_target(&self, ip: &str) -> Option<IpAddr> {
        if ip == "localhost" {
            return self.fallback_ip;
        }
        let addr = ip.parse::<IpAddr>().ok()?.to_canonical();
        if addr.is_loopback() {
            return self.fallback_ip;
        }
        Some(addr)
    }

    fn compose(&self, record: GeoRecord) -> GeoPoint {
        let region_name = record.region_name.clone().or_else(|| {
            record
                .region
                .as_deref()
                .map(|code| self.names.region_name(code).to_string())
        });

        let location = match (&record.city, &record.region) {
            (Some(city), Some(region)) => format!("{}, {}", city, region),
            _ => record
                .country
                .clone()
                .or(region_name)
                .unwrap_or_else(|| UNKNOWN.to_string()),
        };

        GeoPoint {
            location,
            region: record.region.unwrap_or_else(|| UNKNOWN.to_string()),
            latitude: record.latitude.unwrap_or(0.0),
            longitude: record.longitude.unwrap_or(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Returns a fixed record and remembers every address it was asked for
    struct FixedLookup {
        record: Option<GeoRecord>,
        seen: Mutex<Vec<IpAddr>>,
    }

    impl FixedLookup {
        fn new(record: Option<GeoRecord>) -> Arc<Self> {
            Arc::new(Self {
                record,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GeoLookup for FixedLookup {
        async fn lookup(&self, ip: IpAddr) -> Option<GeoRecord> {
            self.seen.lock().unwrap().push(ip);
            self.record.clone()
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn mumbai() -> GeoRecord {
        GeoRecord {
            city: Some("Mumbai".to_string()),
            region: Some("MH".to_string()),
            region_name: Some("Maharashtra".to_string()),
            country: Some("India".to_string()),
            latitude: Some(19.07),
            longitude: Some(72.88),
        }
    }

    fn resolver(lookup: Arc<FixedLookup>) -> GeoResolver {
        GeoResolver::new(
            lookup,
            LocationNames::new(),
            Some("110.227.199.146".parse().unwrap()),
        )
    }

    #[tokio::test]
    async fn composes_city_and_region() {
        let lookup = FixedLookup::new(Some(mumbai()));
        let point = resolver(lookup).resolve("103.240.232.15").await;

        assert_eq!(point.location, "Mumbai, MH");
        assert_eq!(point.region, "MH");
        assert_eq!(point.latitude, 19.07);
        assert_eq!(point.longitude, 72.88);
    }

    #[tokio::test]
    async fn falls_back_to_country_then_region() {
        let lookup = FixedLookup::new(Some(GeoRecord {
            city: None,
            ..mumbai()
        }));
        let point = resolver(lookup).resolve("103.240.232.15").await;
        assert_eq!(point.location, "India");

        let lookup = FixedLookup::new(Some(GeoRecord {
            city: None,
            country: None,
            region_name: None,
            ..mumbai()
        }));
        let point = resolver(lookup).resolve("103.240.232.15").await;
        assert_eq!(point.location, "Maharashtra");

        let lookup = FixedLookup::new(Some(GeoRecord::default()));
        let point = resolver(lookup).resolve("103.240.232.15").await;
        assert_eq!(point, GeoPoint::unknown());
    }

    #[tokio::test]
    async fn loopback_is_remapped_before_lookup() {
        let lookup = FixedLookup::new(Some(mumbai()));
        let geo = resolver(Arc::clone(&lookup));

        geo.resolve("127.0.0.1").await;
        geo.resolve("::1").await;
        geo.resolve("localhost").await;

        let fallback: IpAddr = "110.227.199.146".parse().unwrap();
        assert_eq!(*lookup.seen.lock().unwrap(), vec![fallback; 3]);
    }

    #[tokio::test]
    async fn misses_and_garbage_degrade_to_unknown() {
        let lookup = FixedLookup::new(None);
        let geo = resolver(Arc::clone(&lookup));

        assert_eq!(geo.resolve("8.8.8.8").await, GeoPoint::unknown());
        assert_eq!(geo.resolve("Unknown").await, GeoPoint::unknown());
        assert_eq!(lookup.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disabled_resolver_returns_unknown() {
        let geo = GeoResolver::disabled(LocationNames::new());
        assert_eq!(geo.resolve("8.8.8.8").await, GeoPoint::unknown());
        assert_eq!(geo.provider_name(), "none");
    }

    #[test]
    fn ip_api_payload_normalizes() {
        let payload = r#"{"status":"success","country":"India","countryCode":"IN","region":"MH","regionName":"Maharashtra","city":"Mumbai","lat":19.07,"lon":72.88}"#;
        let resp: IpApiResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(GeoRecord::from(resp), mumbai());
    }

    #[test]
    fn test_maxmind_creation_invalid_path() {
        let result = MaxMindLookup::new("/nonexistent/path.mmdb", LocationNames::new());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_unknown() {
        let lookup = IpApiLookup::new("http://127.0.0.1:9/json/{ip}", Duration::from_millis(200))
            .unwrap();
        let geo = GeoResolver::new(Arc::new(lookup), LocationNames::new(), None);
        assert_eq!(geo.resolve("8.8.8.8").await, GeoPoint::unknown());
    }
}
