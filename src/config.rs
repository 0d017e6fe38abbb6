use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::str::FromStr;

/// Tunables for tracking, ETA estimation and fan-out.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Silence after which a vehicle is Stale and excluded from ETAs.
    pub stale_after_secs: u64,
    /// Silence after which a vehicle is evicted entirely.
    pub evict_after_secs: u64,
    /// Bounded queue length per listener group.
    pub group_queue_capacity: usize,
    pub eta_change_threshold_minutes: u32,
    /// A vehicle maps onto a connection only when its perpendicular offset is
    /// within this multiple of the connection's declared length.
    pub projection_tolerance_factor: f64,
    pub sweep_interval_secs: u64,
    /// How far past the ingest clock a report may be dated before it is rejected.
    pub max_clock_skew_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 300,
            evict_after_secs: 1800,
            group_queue_capacity: 64,
            eta_change_threshold_minutes: 1,
            projection_tolerance_factor: 2.0,
            sweep_interval_secs: 30,
            max_clock_skew_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.evict_after_secs <= self.stale_after_secs {
            bail!(
                "evict_after_secs ({}) must exceed stale_after_secs ({})",
                self.evict_after_secs,
                self.stale_after_secs
            );
        }
        if self.group_queue_capacity == 0 {
            bail!("group_queue_capacity must be at least 1");
        }
        if self.projection_tolerance_factor.is_nan() || self.projection_tolerance_factor <= 0.0 {
            bail!("projection_tolerance_factor must be positive");
        }
        Ok(())
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }

    pub fn evict_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.evict_after_secs as i64)
    }

    pub fn max_clock_skew(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.max_clock_skew_secs as i64)
    }
}

/// Settings for the service binary, read from the environment.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub topology_path: String,
    pub telemetry_port: u16,
    pub topology_reload_secs: u64,
    pub engine: EngineConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            stale_after_secs: env_or("STALE_AFTER_SECS", defaults.stale_after_secs)?,
            evict_after_secs: env_or("EVICT_AFTER_SECS", defaults.evict_after_secs)?,
            group_queue_capacity: env_or("GROUP_QUEUE_CAPACITY", defaults.group_queue_capacity)?,
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            max_clock_skew_secs: env_or("MAX_CLOCK_SKEW_SECS", defaults.max_clock_skew_secs)?,
            ..defaults
        };
        engine.validate()?;

        Ok(Self {
            topology_path: std::env::var("TOPOLOGY_PATH")
                .unwrap_or_else(|_| "./data/topology.json".to_string()),
            telemetry_port: env_or("TELEMETRY_PORT", 7070)?,
            topology_reload_secs: env_or("TOPOLOGY_RELOAD_SECS", 3600)?,
            engine,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid {} env variable: {:?}", key, raw)),
        Err(_) => Ok(default),
    }
}
