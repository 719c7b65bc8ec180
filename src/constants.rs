//! System-wide default values for the loader engine.
//!
//! Every value here can be overridden through [`crate::config::LoaderConfig`];
//! these are the defaults applied when the host does not configure one.

/// Memory kept free for the host application when admitting components.
pub const DEFAULT_MIN_RESERVE_MB: u64 = 512;

/// CPU usage ceiling above which component loading is considered unaffordable.
pub const DEFAULT_MAX_CPU_PERCENT: f32 = 80.0;

/// Bounded worker pool size for parallel loading.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Loader retries allowed before a component is considered unretryable.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Seconds between background resource samples.
pub const DEFAULT_SAMPLER_INTERVAL_SECS: u64 = 5;

/// Components above this footprint get flagged for lazy loading by the profiler.
pub const DEFAULT_HEAVY_COMPONENT_MB: u64 = 100;

/// Startup duration target used by the profiler's suggestions.
pub const DEFAULT_STARTUP_TARGET_MS: u64 = 3000;

/// Directory where startup profiles are persisted.
pub const DEFAULT_PROFILE_DIR: &str = "./data/profiles";

/// Snapshots retained in the resource monitor's ring buffer.
pub const MAX_SNAPSHOTS: usize = 100;

/// Window used when sampling CPU usage from the scheduler counters.
pub const CPU_SAMPLE_WINDOW_MS: u64 = 100;

/// Maximum files inspected by the code-editing intent probe.
pub const CODE_PROBE_SAMPLE_LIMIT: usize = 5;

/// File extensions recognized by the code-editing intent probe.
pub const CODE_EXTENSIONS: &[&str] = &["py", "js", "ts", "go", "rs", "java", "cpp", "c"];

/// Filename keywords recognized by the web-research intent probe.
pub const RESEARCH_KEYWORDS: &[&str] = &["research", "search", "web", "scrape", "crawl"];

/// Project manifest files recognized by the existing-project intent probe.
pub const PROJECT_MANIFESTS: &[&str] = &["package.json", "pyproject.toml", "Cargo.toml", "go.mod"];
