use anyhow::{bail, Context};
use chrono::{FixedOffset, Offset, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub redirect_server: ServerConfig,
    pub auth: AuthConfig,
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    None,
    Token,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    /// HMAC secret used to verify session tokens (required in token mode)
    #[serde(default)]
    pub token_secret: Option<String>,
    /// Cookie carrying the session token when no bearer header is sent
    #[serde(default = "AuthConfig::default_cookie_name")]
    pub cookie_name: String,
}

impl AuthConfig {
    fn default_cookie_name() -> String {
        "uid".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Ignore forwarding headers, use the socket address
    None,
    /// Honour Forwarded / X-Forwarded-For
    Standard,
    /// Honour CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoIpBackend {
    /// No lookups, every visit resolves to Unknown
    None,
    /// Remote ip-api.com style JSON service
    IpApi,
    /// Local MaxMind City database
    MaxMind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub geoip_backend: GeoIpBackend,
    pub geoip_city_db_path: Option<String>,
    /// URL template for the remote lookup, `{ip}` is replaced with the address
    pub geoip_api_url: String,
    pub geoip_timeout_ms: u64,
    /// Address looked up in place of loopback clients
    pub geoip_fallback_ip: String,
    /// Viewer timezone used for day and hour bucketing
    pub utc_offset_minutes: i32,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
    pub recorder_buffer_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            geoip_backend: GeoIpBackend::IpApi,
            geoip_city_db_path: None,
            geoip_api_url: "http://ip-api.com/json/{ip}".to_string(),
            geoip_timeout_ms: 2000,
            geoip_fallback_ip: "110.227.199.146".to_string(),
            utc_offset_minutes: 330,
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: vec![],
            num_trusted_proxies: None,
            recorder_buffer_size: 10_000,
        }
    }
}

impl AnalyticsConfig {
    /// The viewer timezone as a fixed offset, UTC when out of range
    pub fn viewer_timezone(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "ANALYTICS_UTC_OFFSET_MINUTES={} is out of range, using UTC",
                    self.utc_offset_minutes
                );
                Utc.fix()
            })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = env_or("DATABASE_URL", "sqlite://./clickmap.db?mode=rwc");
        let max_connections = env_or("DATABASE_MAX_CONNECTIONS", "10")
            .parse::<u32>()
            .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_or("API_PORT", "8080")
            .parse::<u16>()
            .context("API_PORT must be a valid port")?;

        let redirect_host = env_or("REDIRECT_HOST", "127.0.0.1");
        let redirect_port = env_or("REDIRECT_PORT", "3000")
            .parse::<u16>()
            .context("REDIRECT_PORT must be a valid port")?;

        let auth_mode = match env_or("AUTH_MODE", "none").to_lowercase().as_str() {
            "none" => AuthMode::None,
            "token" => AuthMode::Token,
            other => {
                tracing::warn!(
                    "Unknown AUTH_MODE '{other}', falling back to 'none'. Supported values: none, token"
                );
                AuthMode::None
            }
        };

        let token_secret = std::env::var("AUTH_TOKEN_SECRET").ok();
        if matches!(auth_mode, AuthMode::Token) && token_secret.is_none() {
            bail!("AUTH_TOKEN_SECRET must be set when AUTH_MODE=token");
        }

        let analytics = Self::analytics_from_env()?;

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            redirect_server: ServerConfig {
                host: redirect_host,
                port: redirect_port,
            },
            auth: AuthConfig {
                mode: auth_mode,
                token_secret,
                cookie_name: env_or("AUTH_COOKIE_NAME", "uid"),
            },
            analytics,
        })
    }

    fn analytics_from_env() -> anyhow::Result<AnalyticsConfig> {
        let defaults = AnalyticsConfig::default();

        let geoip_city_db_path = std::env::var("GEOIP_CITY_DB_PATH").ok();

        let geoip_backend = match std::env::var("GEOIP_BACKEND")
            .map(|v| v.to_lowercase())
            .as_deref()
        {
            Ok("none") | Ok("disabled") => GeoIpBackend::None,
            Ok("maxmind") => GeoIpBackend::MaxMind,
            Ok("ipapi") | Ok("ip-api") => GeoIpBackend::IpApi,
            Ok(other) => {
                tracing::warn!(
                    "Unknown GEOIP_BACKEND '{other}', falling back to 'ipapi'. Supported values: none, ipapi, maxmind"
                );
                GeoIpBackend::IpApi
            }
            // A configured database selects the offline backend implicitly
            Err(_) if geoip_city_db_path.is_some() => GeoIpBackend::MaxMind,
            Err(_) => defaults.geoip_backend,
        };

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "standard")
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            _ => TrustedProxyMode::Standard,
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .ok()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<IpNet>()
                            .with_context(|| format!("invalid CIDR in TRUSTED_PROXIES: {s}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
            })
            .transpose()?
            .unwrap_or_default();

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok());

        let utc_offset_minutes = std::env::var("ANALYTICS_UTC_OFFSET_MINUTES")
            .ok()
            .map(|v| v.parse::<i32>())
            .transpose()
            .context("ANALYTICS_UTC_OFFSET_MINUTES must be an integer")?
            .unwrap_or(defaults.utc_offset_minutes);

        Ok(AnalyticsConfig {
            enabled: env_flag("ANALYTICS_ENABLED", defaults.enabled),
            geoip_backend,
            geoip_city_db_path,
            geoip_api_url: env_or("GEOIP_API_URL", &defaults.geoip_api_url),
            geoip_timeout_ms: std::env::var("GEOIP_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.geoip_timeout_ms),
            geoip_fallback_ip: env_or("GEOIP_FALLBACK_IP", &defaults.geoip_fallback_ip),
            utc_offset_minutes,
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
            recorder_buffer_size: std::env::var("RECORDER_BUFFER_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.recorder_buffer_size),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timezone_is_india_standard_time() {
        let tz = AnalyticsConfig::default().viewer_timezone();
        assert_eq!(tz.local_minus_utc(), 330 * 60);
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        let config = AnalyticsConfig {
            utc_offset_minutes: 100_000,
            ..AnalyticsConfig::default()
        };
        assert_eq!(config.viewer_timezone().local_minus_utc(), 0);
    }

    #[test]
    fn overflowing_offset_falls_back_to_utc() {
        for minutes in [i32::MAX, i32::MIN] {
            let config = AnalyticsConfig {
                utc_offset_minutes: minutes,
                ..AnalyticsConfig::default()
            };
            assert_eq!(config.viewer_timezone().local_minus_utc(), 0);
        }
    }
}
