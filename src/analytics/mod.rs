//! Visit analytics
//!
//! The redirect path classifies a request ([`classifier`]) and hands it to
//! the [`recorder`], which geolocates it ([`geoip`]) off the hot path. The
//! dashboard path loads a link's history and folds it into a [`Report`]
//! with the [`aggregator`].

pub mod aggregator;
pub mod classifier;
pub mod geoip;
pub mod ip_extractor;
pub mod locations;
pub mod recorder;
pub mod report;

pub use aggregator::{aggregate, Aggregator};
pub use classifier::{attribute_referrer, classify, Classification};
pub use geoip::{GeoLookup, GeoPoint, GeoResolver};
pub use ip_extractor::{extract_client_ip, mask_ip, normalize_client_ip};
pub use locations::LocationNames;
pub use recorder::{PendingVisit, VisitRecorder};
pub use report::{HeatmapPoint, RecentVisit, Report, TopEntry};
