//! User-agent and referrer classification
//!
//! Pure keyword heuristics over the lower-cased user agent. Device and OS
//! are matched independently, each with its own priority order.

use url::Url;

use crate::models::{Device, DIRECT, UNKNOWN};

const BOT_MARKERS: &[&str] = &["bot", "crawl", "spider", "googlebot"];
const MOBILE_MARKERS: &[&str] = &["mobile", "android", "iphone"];
const TABLET_MARKERS: &[&str] = &["tablet", "ipad"];

/// Result of classifying one user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub device: Device,
    pub os: &'static str,
    pub is_bot: bool,
}

pub fn classify(user_agent: &str) -> Classification {
    let device = classify_device(user_agent);
    Classification {
        device,
        os: classify_os(user_agent),
        is_bot: device == Device::Bot,
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Bot markers win over mobile markers, which win over tablet markers
pub fn classify_device(user_agent: &str) -> Device {
    if user_agent.is_empty() {
        return Device::Desktop;
    }
    let ua = user_agent.to_lowercase();

    if contains_any(&ua, BOT_MARKERS) {
        Device::Bot
    } else if contains_any(&ua, MOBILE_MARKERS) {
        Device::Mobile
    } else if contains_any(&ua, TABLET_MARKERS) {
        Device::Tablet
    } else {
        Device::Desktop
    }
}

pub fn classify_os(user_agent: &str) -> &'static str {
    if user_agent.is_empty() {
        return UNKNOWN;
    }
    let ua = user_agent.to_lowercase();

    // Mobile platforms first: their UAs also carry "linux" or "mac os x"
    if ua.contains("android") {
        "Android"
    } else if contains_any(&ua, &["iphone", "ipad", "ipod"]) {
        "iOS"
    } else if ua.contains("windows phone") {
        "Windows Phone"
    } else if ua.contains("win") {
        "Windows"
    } else if ua.contains("mac") || ua.contains("darwin") {
        "macOS"
    } else if ua.contains("cros") {
        "Chrome OS"
    } else if ua.contains("linux") || ua.contains("ubuntu") {
        "Linux"
    } else {
        "Other"
    }
}

fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

/// Attribute the visit to a traffic source.
///
/// `campaign` is the explicit `source`/`utm_source` query value, which always
/// wins. Otherwise the `Referer` header is parsed; self-referrals, loopback
/// hosts, a missing header and unparsable values all count as direct traffic.
/// `request_host` is the `Host` header of the redirect request, port allowed.
pub fn attribute_referrer(
    campaign: Option<&str>,
    referer: Option<&str>,
    request_host: Option<&str>,
) -> String {
    if let Some(source) = campaign.filter(|s| !s.is_empty()) {
        return source.to_string();
    }

    let Some(referer) = referer.filter(|r| !r.is_empty()) else {
        return DIRECT.to_string();
    };

    let Ok(parsed) = Url::parse(referer) else {
        return DIRECT.to_string();
    };
    let Some(hostname) = parsed.host_str() else {
        return DIRECT.to_string();
    };
    let hostname = strip_www(hostname);

    let current_host = request_host
        .map(|h| h.split(':').next().unwrap_or(h))
        .map(strip_www)
        .unwrap_or_default();

    if hostname == "localhost" || hostname == "127.0.0.1" || hostname == current_host {
        return DIRECT.to_string();
    }

    hostname.to_string()
}
