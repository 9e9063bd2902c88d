use std::time::Duration;

/// Configuration for the cross-site sync worker (spec §4.5, §6:
/// `CROSS_SITE_SYNC_ENABLED`, `CROSS_SITE_REMOTE_ENDPOINTS`,
/// `CROSS_SITE_POLL_INTERVAL_SEC`, `REORG_DEPTH_LIMIT`).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub enabled: bool,
    pub remote_endpoints: Vec<String>,
    pub poll_interval: Duration,
    pub reorg_depth_limit: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_endpoints: Vec::new(),
            poll_interval: Duration::from_secs(meridian_core::DEFAULT_CROSS_SITE_POLL_INTERVAL_SEC),
            reorg_depth_limit: meridian_core::DEFAULT_REORG_DEPTH_LIMIT,
            circuit_breaker_threshold: meridian_core::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_cooldown: Duration::from_secs(
                meridian_core::DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SEC,
            ),
        }
    }
}
