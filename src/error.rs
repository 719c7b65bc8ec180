use thiserror::Error;

/// Convenience type alias for Results with StartupError
pub type Result<T> = std::result::Result<T, StartupError>;

/// Main error type for the loader engine
///
/// This enum represents all errors observable at the loader API surface.
/// Per-component loader failures are contained by error isolation and never
/// propagate past the orchestrator; they show up here only as the recorded
/// outcome of an individual load.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("component not registered: {0}")]
    NotFound(String),

    #[error("component '{0}' is already being loaded")]
    AlreadyLoading(String),

    #[error("cannot load '{component}': missing dependencies {missing:?}")]
    MissingDeps {
        component: String,
        missing: Vec<String>,
    },

    #[error("loader for '{component}' failed: {message}")]
    LoaderFailure { component: String, message: String },

    #[error("dependency cycle detected: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("loading cancelled")]
    Cancelled,

    #[error("component '{0}' is disabled")]
    Disabled(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StartupError {
    /// Short kind tag used in report summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            StartupError::NotFound(_) => "not_found",
            StartupError::AlreadyLoading(_) => "already_loading",
            StartupError::MissingDeps { .. } => "missing_deps",
            StartupError::LoaderFailure { .. } => "loader_failure",
            StartupError::CycleDetected(_) => "cycle_detected",
            StartupError::Cancelled => "cancelled",
            StartupError::Disabled(_) => "disabled",
            StartupError::Configuration(_) => "configuration",
            StartupError::Serialization(_) => "serialization",
            StartupError::Io(_) => "io",
        }
    }
}
