use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_HEAVY_COMPONENT_MB, DEFAULT_MAX_CPU_PERCENT, DEFAULT_MAX_RETRIES,
    DEFAULT_MIN_RESERVE_MB, DEFAULT_PROFILE_DIR, DEFAULT_SAMPLER_INTERVAL_SECS,
    DEFAULT_STARTUP_TARGET_MS, DEFAULT_WORKER_COUNT,
};
use crate::{Result, StartupError};

/// Configuration for the loader engine, read once at construction
///
/// Hosts either take the defaults, build a value directly, or load overrides
/// from the environment with [`LoaderConfig::from_env`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Memory kept free when admitting components.
    pub min_reserve_mb: u64,
    /// CPU usage ceiling for affordability checks.
    pub max_cpu_percent: f32,
    /// Bounded worker pool size for parallel loading.
    pub worker_count: usize,
    /// Loader retries allowed before a component is marked unretryable.
    pub max_retries: u32,
    /// Interval between background resource samples.
    pub sampler_interval: Duration,
    /// Footprint above which the profiler suggests lazy loading.
    pub heavy_component_mb: u64,
    /// Startup duration target used by the profiler.
    pub startup_target_ms: u64,
    /// Optional per-component load timeout. Off by default; when set it is
    /// capped by `startup_target_ms` so one component cannot consume the
    /// whole startup budget.
    pub component_timeout: Option<Duration>,
    /// Workspace inspected by intent detection.
    pub workspace_dir: PathBuf,
    /// Directory where startup profiles are persisted.
    pub profile_dir: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            min_reserve_mb: DEFAULT_MIN_RESERVE_MB,
            max_cpu_percent: DEFAULT_MAX_CPU_PERCENT,
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            sampler_interval: Duration::from_secs(DEFAULT_SAMPLER_INTERVAL_SECS),
            heavy_component_mb: DEFAULT_HEAVY_COMPONENT_MB,
            startup_target_ms: DEFAULT_STARTUP_TARGET_MS,
            component_timeout: None,
            workspace_dir: PathBuf::from("."),
            profile_dir: PathBuf::from(DEFAULT_PROFILE_DIR),
        }
    }
}

impl LoaderConfig {
    /// Load configuration with environment overrides.
    ///
    /// Reads a `.env` file when present, then applies any `STARTUP_*`
    /// variables on top of the defaults and validates the result.
    pub fn from_env() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded .env file from {:?}", path),
            Err(_) => tracing::debug!("no .env file found, using process environment"),
        }

        let mut config = Self::default();

        if let Some(v) = parse_var::<u64>("STARTUP_MIN_RESERVE_MB")? {
            config.min_reserve_mb = v;
        }
        if let Some(v) = parse_var::<f32>("STARTUP_MAX_CPU_PERCENT")? {
            config.max_cpu_percent = v;
        }
        if let Some(v) = parse_var::<usize>("STARTUP_WORKER_COUNT")? {
            config.worker_count = v;
        }
        if let Some(v) = parse_var::<u32>("STARTUP_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse_var::<u64>("STARTUP_SAMPLER_INTERVAL_SECS")? {
            config.sampler_interval = Duration::from_secs(v);
        }
        if let Some(v) = parse_var::<u64>("STARTUP_HEAVY_COMPONENT_MB")? {
            config.heavy_component_mb = v;
        }
        if let Some(v) = parse_var::<u64>("STARTUP_TARGET_MS")? {
            config.startup_target_ms = v;
        }
        if let Some(v) = parse_var::<u64>("STARTUP_COMPONENT_TIMEOUT_MS")? {
            config.component_timeout = Some(Duration::from_millis(v));
        }
        if let Ok(v) = env::var("STARTUP_WORKSPACE_DIR") {
            config.workspace_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var("STARTUP_PROFILE_DIR") {
            config.profile_dir = PathBuf::from(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints. Called by [`from_env`]; hosts that
    /// build a config by hand can call it directly.
    ///
    /// [`from_env`]: LoaderConfig::from_env
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(StartupError::Configuration(
                "worker_count must be at least 1".to_string(),
            ));
        }

        if !(self.max_cpu_percent > 0.0 && self.max_cpu_percent <= 100.0) {
            return Err(StartupError::Configuration(format!(
                "max_cpu_percent must be in (0, 100], got {}",
                self.max_cpu_percent
            )));
        }

        if let Some(timeout) = self.component_timeout {
            if timeout.as_millis() as u64 > self.startup_target_ms {
                return Err(StartupError::Configuration(format!(
                    "component_timeout ({}ms) exceeds startup_target_ms ({}ms)",
                    timeout.as_millis(),
                    self.startup_target_ms
                )));
            }
            if timeout.is_zero() {
                return Err(StartupError::Configuration(
                    "component_timeout must be non-zero when set".to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = dir.into();
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|_| {
            StartupError::Configuration(format!("{name} has invalid value '{raw}'"))
        }),
        Err(_) => Ok(None),
    }
}
