//! Collector address handling and the prepared tracker options.

use std::fmt;
use std::sync::Arc;

use crate::config::TrackingConfig;
use crate::tracking::dispatch::{BeaconTransport, ReqwestTransport};

/// Endpoint file the collector accepts beacons on.
pub const COLLECTOR_ENDPOINT: &str = "piwik.php";

/// Normalize a collector address to `<base>/piwik.php?`.
///
/// Accepts the address with or without the endpoint file and trailing
/// slashes. Malformed input is normalized best-effort, never rejected.
pub fn normalize_collector_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('?').trim_end_matches('/');
    let base = trimmed
        .strip_suffix(COLLECTOR_ENDPOINT)
        .unwrap_or(trimmed)
        .trim_end_matches('/');
    format!("{}/{}?", base, COLLECTOR_ENDPOINT)
}

/// Process-wide tracking settings, prepared once at startup.
pub struct Tracker {
    collector_base: String,
    ignore_do_not_track: bool,
    site_id: String,
    token: String,
    transport: Arc<dyn BeaconTransport>,
}

impl Tracker {
    /// Prepare tracker options with a custom transport.
    pub fn new(config: &TrackingConfig, transport: Arc<dyn BeaconTransport>) -> Self {
        Self {
            collector_base: normalize_collector_url(&config.collector_url),
            ignore_do_not_track: config.ignore_do_not_track,
            site_id: config.site_id.clone(),
            token: config.token.clone(),
            transport,
        }
    }

    /// Prepare tracker options delivering over HTTP with `reqwest`.
    pub fn from_config(config: &TrackingConfig) -> Self {
        Self::new(config, Arc::new(ReqwestTransport::new()))
    }

    /// Normalized collector address, ending in `?`.
    pub fn collector_base(&self) -> &str {
        &self.collector_base
    }

    pub fn ignore_do_not_track(&self) -> bool {
        self.ignore_do_not_track
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn transport(&self) -> Arc<dyn BeaconTransport> {
        Arc::clone(&self.transport)
    }
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("collector_base", &self.collector_base)
            .field("ignore_do_not_track", &self.ignore_do_not_track)
            .field("site_id", &self.site_id)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}
