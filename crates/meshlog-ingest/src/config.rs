//! Runtime configuration for the ingestion daemon.

use std::time::Duration;

/// Default destination identifier for synthesized direct traceroutes.
///
/// The deployed system records zero-hop observations against this
/// well-known listener id rather than the live local node identity; kept
/// configurable pending a product decision.
pub const DEFAULT_DIRECT_DEST_ID: i64 = 15;

/// Configuration for the ingestion daemon.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Device TCP address (`host:port`).
    pub device_addr: String,

    /// Connection establishment timeout.
    pub connect_timeout: Duration,

    /// Delay before reconnecting after a transport failure.
    pub reconnect_delay: Duration,

    /// Delay before reconnecting after an unexpected (non-transport) failure.
    pub error_retry_delay: Duration,

    /// Period between watchdog liveness pulses.
    pub watchdog_period: Duration,

    /// Node identifier recorded as the destination of synthesized direct
    /// traceroutes.
    pub direct_dest_id: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            device_addr: "127.0.0.1:4403".to_string(),
            connect_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(5),
            error_retry_delay: Duration::from_secs(5),
            watchdog_period: Duration::from_secs(10),
            direct_dest_id: DEFAULT_DIRECT_DEST_ID,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = IngestConfig::default();
        assert_eq!(config.device_addr, "127.0.0.1:4403");
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.watchdog_period, Duration::from_secs(10));
        assert_eq!(config.direct_dest_id, 15);
    }
}
