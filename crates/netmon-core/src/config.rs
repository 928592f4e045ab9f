//! Environment-driven configuration for the telemetry core.
//!
//! Every knob has a safe default that kicks in when the variable is unset,
//! unparsable or non-positive, so a blank environment yields a working
//! pipeline.

use std::env;
use std::time::Duration;

use crate::bus::BusConfig;
use crate::pipeline::PipelineConfig;

/// Aggregated tuning configuration, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub pipeline: PipelineConfig,
    pub bus: BusConfig,
}

impl TelemetryConfig {
    /// Reads `NETMON_*` variables from the environment.
    pub fn from_env() -> Self {
        let pipeline = PipelineConfig {
            batch_size: env_positive("NETMON_BATCH_SIZE"),
            flush_interval: Duration::from_millis(env_positive("NETMON_FLUSH_INTERVAL_MS") as u64),
            max_consecutive_failures: env_positive("NETMON_MAX_WRITE_FAILURES") as u32,
            write_timeout: Duration::from_millis(env_positive("NETMON_WRITE_TIMEOUT_MS") as u64),
        }
        .normalized();

        // Zero capacities are replaced with the defaults by the bus itself.
        let bus = BusConfig {
            discovery_request_capacity: env_positive("NETMON_DISCOVERY_REQUEST_CHANNEL_SIZE"),
            discovery_status_capacity: env_positive("NETMON_DISCOVERY_STATUS_CHANNEL_SIZE"),
            device_validated_capacity: env_positive("NETMON_DEVICE_VALIDATED_CHANNEL_SIZE"),
            monitor_state_capacity: env_positive("NETMON_MONITOR_STATE_CHANNEL_SIZE"),
            plugin_fault_capacity: env_positive("NETMON_PLUGIN_FAULT_CHANNEL_SIZE"),
            cache_invalidate_capacity: env_positive("NETMON_CACHE_INVALIDATE_CHANNEL_SIZE"),
        };

        Self { pipeline, bus }
    }
}

/// Parses a positive integer from the environment. Unset, unparsable or
/// non-positive values yield 0, which downstream normalization replaces
/// with the component default.
fn env_positive(name: &str) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|n| *n > 0)
        .map(|n| n as usize)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};

    #[test]
    fn blank_environment_yields_defaults() {
        let cfg = TelemetryConfig::from_env();
        assert_eq!(cfg.pipeline.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(cfg.pipeline.flush_interval, DEFAULT_FLUSH_INTERVAL);
    }
}
