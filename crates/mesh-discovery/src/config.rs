//! Discovery server configuration.

use std::time::Duration;

/// Configuration for the discovery server.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Log every discovery request and push at info level.
    pub debug_ads: bool,
    /// Window within which change events coalesce into one fanout.
    pub debounce_window: Duration,
    /// Response buffer size per stream.
    pub response_buffer_size: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            debug_ads: false,
            debounce_window: Duration::from_millis(200),
            response_buffer_size: 16,
        }
    }
}

impl DiscoveryConfig {
    /// Read the verbose-ADS toggle from the environment
    /// (`MESH_DEBUG_ADS`, any value except `0` enables it).
    #[must_use]
    pub fn from_env() -> Self {
        let debug_ads = std::env::var("MESH_DEBUG_ADS")
            .map(|v| v != "0")
            .unwrap_or(false);
        Self {
            debug_ads,
            ..Default::default()
        }
    }
}
