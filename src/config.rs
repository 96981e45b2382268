//! Application configuration
//!
//! One flat `AppConfig` loaded from YAML at boot. Every key has a default so
//! a missing file or sparse config still boots a complete system.

use anyhow::Context;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Engine partition count; instruments shard as `instrument_id % partitions`.
    pub partitions: u32,
    /// Stream id base for gateway -> engine streams.
    pub inbound_stream_base: u32,
    /// Stream id base for engine -> gateway streams.
    pub outbound_stream_base: u32,
    /// TCP listen port. 0 binds an ephemeral port (tests).
    pub gateway_port: u16,
    /// Capacity of each partition stream; a full stream backpressures.
    pub backpressure_queue_limit: usize,
    pub run_gateway: bool,
    pub run_engine: bool,
    /// Counter/latency report interval; 0 disables the reporter thread.
    pub metrics_interval_secs: u64,
    /// Order records per engine partition.
    pub order_pool_capacity: usize,
    /// Price-level records per engine partition.
    pub level_pool_capacity: usize,

    // Logging
    pub log_dir: String,
    pub log_file: String,
    pub log_level: String,
    /// "hourly", "daily", or anything else for a single file.
    pub rotation: String,
    pub use_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            partitions: 32,
            inbound_stream_base: 1000,
            outbound_stream_base: 2000,
            gateway_port: 7001,
            backpressure_queue_limit: 16384,
            run_gateway: true,
            run_engine: true,
            metrics_interval_secs: 5,
            order_pool_capacity: 65536,
            level_pool_capacity: 8192,
            log_dir: "logs".into(),
            log_file: "matchgate.log".into(),
            log_level: "info".into(),
            rotation: "daily".into(),
            use_json: false,
        }
    }
}

impl AppConfig {
    /// Load from a YAML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.partitions > 0, "partitions must be positive");
        anyhow::ensure!(
            self.backpressure_queue_limit > 0,
            "backpressure_queue_limit must be positive"
        );
        anyhow::ensure!(
            self.order_pool_capacity > 0 && self.level_pool_capacity > 0,
            "pool capacities must be positive"
        );
        anyhow::ensure!(
            self.run_gateway || self.run_engine,
            "at least one of run_gateway/run_engine must be enabled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.partitions, 32);
        assert_eq!(c.inbound_stream_base, 1000);
        assert_eq!(c.outbound_stream_base, 2000);
        assert_eq!(c.gateway_port, 7001);
        assert!(c.run_gateway && c.run_engine);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_sparse_yaml_overlays_defaults() {
        let c: AppConfig = serde_yaml::from_str("partitions: 4\ngateway_port: 9100\n").unwrap();
        assert_eq!(c.partitions, 4);
        assert_eq!(c.gateway_port, 9100);
        assert_eq!(c.outbound_stream_base, 2000);
    }

    #[test]
    fn test_validate_rejects_zero_partitions() {
        let c = AppConfig {
            partitions: 0,
            ..AppConfig::default()
        };
        assert!(c.validate().is_err());
    }
}
