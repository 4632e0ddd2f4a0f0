//! TOML configuration for uploadgate.
//!
//! Layered model: compiled-in defaults, overridden section by section by a
//! TOML file located via the `UPLOADGATE_CONFIG` environment variable or the
//! standard system path.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "UPLOADGATE_CONFIG";

/// Standard system location checked when the environment variable is unset.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/uploadgate/uploadgate.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadGateConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl UploadGateConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded uploadgate configuration");
        Ok(config)
    }

    /// Try to load configuration from, in order:
    /// 1. The path in `UPLOADGATE_CONFIG`.
    /// 2. `/etc/uploadgate/uploadgate.toml`.
    /// 3. Compiled-in defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "UPLOADGATE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject combinations the scheduler cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.session.validate()?;
        if self.sampler.period_ms == 0 {
            bail!("sampler.period_ms must be greater than zero");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Slot limits and the bandwidth floor used by admission control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Active uploads always allowed.
    pub soft_max_uploads: usize,
    /// Active uploads never exceeded.  Between soft and hard, another upload
    /// is allowed only while some active upload is above the speed floor.
    pub hard_max_uploads: usize,
    /// Capacity of the HTTP (polling) queue.
    pub upload_queue_size: usize,
    /// Speed floor in KB/s.
    pub minimum_upload_speed: f32,
    /// Number of aggregate samples in the rolling bandwidth window.
    pub bandwidth_window: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            soft_max_uploads: 5,
            hard_max_uploads: 10,
            upload_queue_size: 10,
            minimum_upload_speed: 3.0,
            bandwidth_window: 10,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hard_max_uploads == 0 {
            bail!("scheduler.hard_max_uploads must be greater than zero");
        }
        if self.hard_max_uploads < self.soft_max_uploads {
            bail!(
                "scheduler.hard_max_uploads ({}) is below soft_max_uploads ({})",
                self.hard_max_uploads,
                self.soft_max_uploads
            );
        }
        if self.bandwidth_window == 0 {
            bail!("scheduler.bandwidth_window must be greater than zero");
        }
        if self.minimum_upload_speed.is_nan() || self.minimum_upload_speed < 0.0 {
            bail!("scheduler.minimum_upload_speed must be a non-negative number");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Poll-rate limits for queued polling consumers (milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Re-polls sooner than this after being queued are rejected.
    pub min_poll_time_ms: u64,
    /// A queued consumer silent for longer than this has given up its place.
    pub max_poll_time_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_poll_time_ms: 45_000,
            max_poll_time_ms: 120_000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_poll_time_ms > self.max_poll_time_ms {
            bail!(
                "session.min_poll_time_ms ({}) exceeds max_poll_time_ms ({})",
                self.min_poll_time_ms,
                self.max_poll_time_ms
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Background bandwidth sampling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Interval between `measure_bandwidth` calls.
    pub period_ms: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self { period_ms: 1_000 }
    }
}

impl SamplerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
