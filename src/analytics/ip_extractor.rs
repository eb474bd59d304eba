//! Client IP extraction from HTTP headers with trust validation
//!
//! This module implements client IP extraction that:
//! - Validates trust chains for X-Forwarded-For and Forwarded headers
//! - Supports vendor-specific headers (e.g., CF-Connecting-IP)
//! - Falls back to socket remote address when headers are untrusted
//! - Normalizes the result into the string stored on a visit
//! - Masks stored addresses for display

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};
use crate::models::UNKNOWN;

/// Extract the client IP address from HTTP headers
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `socket_addr` - The socket remote address (fallback)
/// * `config` - Analytics configuration with trust settings
///
/// # Returns
/// The client IP address, extracted according to the trust configuration
pub fn extract_client_ip(
    headers: &HeaderMap,
    socket_addr: IpAddr,
    config: &AnalyticsConfig,
) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => extract_standard_ip(headers, config).unwrap_or(socket_addr),
        TrustedProxyMode::None => socket_addr,
    }
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Extract IP from standard headers (Forwarded, X-Forwarded-For) with trust validation
fn extract_standard_ip(headers: &HeaderMap, config: &AnalyticsConfig) -> Option<IpAddr> {
    // Prefer RFC 7239 Forwarded header
    let chain = forwarded_chain(headers)
        .filter(|ips| !ips.is_empty())
        .or_else(|| x_forwarded_for_chain(headers))?;

    select_from_chain(&chain, config)
}

/// Parse RFC 7239 Forwarded header into its `for=` chain, left to right
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    // Forwarded: for=192.0.2.60;proto=http;by=203.0.113.43, for="[2001:db8::1]:4711"
    let ips = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let value = param.trim().strip_prefix("for=")?;
            parse_forwarded_node(value.trim_matches('"'))
        })
        .collect();

    Some(ips)
}

fn parse_forwarded_node(node: &str) -> Option<IpAddr> {
    if let Some(rest) = node.strip_prefix('[') {
        // Bracketed IPv6, optional port after the bracket
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = node.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    node.split(':').next()?.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let ips: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    if ips.is_empty() {
        None
    } else {
        Some(ips)
    }
}

/// Pick the client out of a proxy chain
///
/// - `num_trusted_proxies`: skip that many hops from the right
/// - `trusted_proxies`: first hop from the right outside every trusted CIDR
/// - neither: the leftmost hop, i.e. the address the first proxy saw
fn select_from_chain(ips: &[IpAddr], config: &AnalyticsConfig) -> Option<IpAddr> {
    if let Some(num_trusted) = config.num_trusted_proxies {
        if ips.len() > num_trusted {
            return Some(ips[ips.len() - num_trusted - 1]);
        }
        // Not enough IPs in chain, return the leftmost (least trusted)
        return ips.first().copied();
    }

    if !config.trusted_proxies.is_empty() {
        return ips
            .iter()
            .rev()
            .find(|ip| !is_trusted(**ip, &config.trusted_proxies))
            .or_else(|| ips.first())
            .copied();
    }

    ips.first().copied()
}

fn is_trusted(ip: IpAddr, trusted: &[IpNet]) -> bool {
    trusted.iter().any(|net| net.contains(&ip))
}

/// Render an address the way it is stored on a visit.
///
/// IPv4-mapped IPv6 addresses lose their `::ffff:` prefix and every loopback
/// address collapses to `127.0.0.1`.
pub fn normalize_client_ip(ip: IpAddr) -> String {
    let ip = ip.to_canonical();
    if ip.is_loopback() {
        return Ipv4Addr::LOCALHOST.to_string();
    }
    ip.to_string()
}

/// Mask an address for display.
///
/// Dotted quads keep their first two octets, colon-delimited addresses their
/// first two groups. `Unknown` stays as is, anything else is fully masked.
pub fn mask_ip(ip: &str) -> String {
    if ip.is_empty() || ip == UNKNOWN {
        return UNKNOWN.to_string();
    }

    if ip.contains('.') {
        let parts: Vec<&str> = ip.split('.').collect();
        if parts.len() == 4 {
            return format!("{}.{}.xx.xx", parts[0], parts[1]);
        }
    }

    if ip.contains(':') {
        let parts: Vec<&str> = ip.split(':').collect();
        if parts.len() >= 2 {
            return format!("{}:{}:xx:xx", parts[0], parts[1]);
        }
    }

    "xx.xx.xx.xx".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn create_config(mode: TrustedProxyMode) -> AnalyticsConfig {
        AnalyticsConfig {
            trusted_proxy_mode: mode,
            ..AnalyticsConfig::default()
        }
    }

    #[test]
    fn test_extract_client_ip_none_mode() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = create_config(TrustedProxyMode::None);

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, socket_addr);
    }

    #[test]
    fn test_extract_cloudflare_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = create_config(TrustedProxyMode::Cloudflare);

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_extract_x_forwarded_for_leftmost_by_default() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = create_config(TrustedProxyMode::Standard);

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_extract_x_forwarded_for_with_trusted_cidrs() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 203.0.113.1, 10.0.0.5"),
        );
        let socket_addr: IpAddr = "10.0.0.1".parse().unwrap();
        let config = AnalyticsConfig {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: vec!["10.0.0.0/8".parse().unwrap()],
            ..AnalyticsConfig::default()
        };

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_extract_x_forwarded_for_with_hop_count() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 203.0.113.1, 10.0.0.5"),
        );
        let socket_addr: IpAddr = "10.0.0.1".parse().unwrap();
        let config = AnalyticsConfig {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            num_trusted_proxies: Some(1),
            ..AnalyticsConfig::default()
        };

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "203.0.113.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_forwarded_header_preferred() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "forwarded",
            HeaderValue::from_static("for=\"[2001:db8::1]:4711\";proto=https"),
        );
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        let socket_addr: IpAddr = "192.168.1.1".parse().unwrap();
        let config = create_config(TrustedProxyMode::Standard);

        let result = extract_client_ip(&headers, socket_addr, &config);
        assert_eq!(result, "2001:db8::1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_normalize_strips_mapped_prefix_and_loopback() {
        let mapped: IpAddr = "::ffff:103.240.232.15".parse().unwrap();
        assert_eq!(normalize_client_ip(mapped), "103.240.232.15");

        let v6_loopback: IpAddr = "::1".parse().unwrap();
        assert_eq!(normalize_client_ip(v6_loopback), "127.0.0.1");

        let mapped_loopback: IpAddr = "::ffff:127.0.0.1".parse().unwrap();
        assert_eq!(normalize_client_ip(mapped_loopback), "127.0.0.1");
    }

    #[test]
    fn test_mask_ip() {
        assert_eq!(mask_ip("103.240.232.15"), "103.240.xx.xx");
        assert_eq!(mask_ip("2001:0db8:85a3::1"), "2001:0db8:xx:xx");
        assert_eq!(mask_ip("Unknown"), "Unknown");
        assert_eq!(mask_ip(""), "Unknown");
        assert_eq!(mask_ip("garbage"), "xx.xx.xx.xx");
        assert_eq!(mask_ip("1.2.3"), "xx.xx.xx.xx");
    }
}
