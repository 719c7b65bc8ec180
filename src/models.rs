use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::isolation::ComponentFailure;

/// Category of a system component
///
/// Used for grouping in the registry and for host-side presentation; the
/// loader itself treats all categories identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentCategory {
    Core,
    Ui,
    Tool,
    Memory,
    Execution,
    Network,
    Security,
    Storage,
    Integration,
}

/// Lifecycle status of a component
///
/// Transitions are enforced by the registry:
/// NotLoaded → Loading → {Loaded, Failed}; Loaded → NotLoaded on unload;
/// Failed → Loading on retry; any → Disabled by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    NotLoaded,
    Loading,
    Loaded,
    Failed,
    Disabled,
}

/// Opaque handle to a loaded component instance
///
/// The loader never inspects instances beyond the optional [`cleanup`]
/// hook invoked on unload. Hosts downcast through [`as_any`] when they
/// know the concrete type.
///
/// [`cleanup`]: ComponentInstance::cleanup
/// [`as_any`]: ComponentInstance::as_any
pub trait ComponentInstance: Send + Sync + std::fmt::Debug {
    /// Invoked on unload. Default is a no-op.
    fn cleanup(&self) {}

    /// Downcasting hook for hosts that know the concrete instance type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared reference to a loaded component instance.
pub type SharedInstance = Arc<dyn ComponentInstance>;

/// Loader thunk for a single component
///
/// Registered alongside the component metadata; the lazy loader invokes it
/// exactly once per load attempt. Failures are opaque [`anyhow::Error`]s so
/// loaders can surface whatever error type their subsystem produces.
#[async_trait]
pub trait ComponentLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<SharedInstance>;
}

struct FnLoader<F>(F);

#[async_trait]
impl<F> ComponentLoader for FnLoader<F>
where
    F: Fn() -> anyhow::Result<SharedInstance> + Send + Sync,
{
    async fn load(&self) -> anyhow::Result<SharedInstance> {
        (self.0)()
    }
}

/// Wrap a plain closure as a component loader.
pub fn loader_fn<F>(f: F) -> Arc<dyn ComponentLoader>
where
    F: Fn() -> anyhow::Result<SharedInstance> + Send + Sync + 'static,
{
    Arc::new(FnLoader(f))
}

struct AsyncFnLoader<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ComponentLoader for AsyncFnLoader<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<SharedInstance>> + Send,
{
    async fn load(&self) -> anyhow::Result<SharedInstance> {
        (self.f)().await
    }
}

/// Wrap an async closure as a component loader.
pub fn async_loader_fn<F, Fut>(f: F) -> Arc<dyn ComponentLoader>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<SharedInstance>> + Send + 'static,
{
    Arc::new(AsyncFnLoader {
        f,
        _marker: PhantomData,
    })
}

/// Boxed future form occasionally useful for trait-object loaders.
pub type BoxedLoadFuture = Pin<Box<dyn Future<Output = anyhow::Result<SharedInstance>> + Send>>;

/// Query-time predicate gating whether a component may load.
pub type Precondition = Arc<dyn Fn() -> bool + Send + Sync>;

/// Immutable metadata describing a registered component
///
/// Captured once at registration. The loader thunk is a first-class value so
/// the registry stays decoupled from any module system.
#[derive(Clone)]
pub struct ComponentMetadata {
    pub name: String,
    pub category: ComponentCategory,
    pub dependencies: Vec<String>,
    pub optional: bool,
    pub resource_requirement_mb: u64,
    pub load_priority: i32,
    pub precondition: Option<Precondition>,
    pub loader: Arc<dyn ComponentLoader>,
    pub description: String,
}

impl fmt::Debug for ComponentMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentMetadata")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("dependencies", &self.dependencies)
            .field("optional", &self.optional)
            .field("resource_requirement_mb", &self.resource_requirement_mb)
            .field("load_priority", &self.load_priority)
            .field("precondition", &self.precondition.is_some())
            .field("description", &self.description)
            .finish()
    }
}

impl ComponentMetadata {
    /// Creates metadata with defaults: no dependencies, optional, zero
    /// footprint, priority 10, no precondition.
    pub fn new(
        name: impl Into<String>,
        category: ComponentCategory,
        loader: Arc<dyn ComponentLoader>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            dependencies: Vec::new(),
            optional: true,
            resource_requirement_mb: 0,
            load_priority: 10,
            precondition: None,
            loader,
            description: String::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Marks the component as required for startup to succeed.
    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_resource_mb(mut self, resource_requirement_mb: u64) -> Self {
        self.resource_requirement_mb = resource_requirement_mb;
        self
    }

    pub fn with_priority(mut self, load_priority: i32) -> Self {
        self.load_priority = load_priority;
        self
    }

    pub fn with_precondition<F>(mut self, precondition: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.precondition = Some(Arc::new(precondition));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Mutable per-component runtime state, owned by the registry.
#[derive(Clone)]
pub struct ComponentState {
    pub status: ComponentStatus,
    pub instance: Option<SharedInstance>,
    pub last_error: Option<ComponentFailure>,
    pub load_time_ms: f64,
    pub retry_count: u32,
    /// Wall-clock instant the most recent load attempt began. Recorded so
    /// profiles reflect actual load order under parallel execution.
    pub load_started_at: Option<DateTime<Utc>>,
}

impl Default for ComponentState {
    fn default() -> Self {
        Self {
            status: ComponentStatus::NotLoaded,
            instance: None,
            last_error: None,
            load_time_ms: 0.0,
            retry_count: 0,
            load_started_at: None,
        }
    }
}

impl fmt::Debug for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentState")
            .field("status", &self.status)
            .field("instance", &self.instance.is_some())
            .field("last_error", &self.last_error)
            .field("load_time_ms", &self.load_time_ms)
            .field("retry_count", &self.retry_count)
            .field("load_started_at", &self.load_started_at)
            .finish()
    }
}

/// Snapshot of a component's metadata plus runtime state, as returned by
/// registry accessors. Always a copy; mutations go through registry methods.
#[derive(Debug, Clone)]
pub struct ComponentRecord {
    pub metadata: ComponentMetadata,
    pub state: ComponentState,
}

/// Progress of a single component load
///
/// `Running` percentages are advisory; the only guaranteed emissions are
/// `Running(0)` at load start and a terminal `Succeeded` or `Failed`.
/// Intermediate values are monotonically non-decreasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    Running(u8),
    Succeeded,
    Failed,
}

impl LoadProgress {
    /// Numeric form for observers that want the legacy percent channel:
    /// `Succeeded` maps to 100.0 and `Failed` to -1.0.
    pub fn percent(self) -> f32 {
        match self {
            LoadProgress::Running(p) => f32::from(p),
            LoadProgress::Succeeded => 100.0,
            LoadProgress::Failed => -1.0,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, LoadProgress::Succeeded | LoadProgress::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Dummy;
    impl ComponentInstance for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_metadata_builder_defaults() {
        let meta = ComponentMetadata::new(
            "database",
            ComponentCategory::Storage,
            loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance)),
        );

        assert_eq!(meta.name, "database");
        assert!(meta.optional);
        assert!(meta.dependencies.is_empty());
        assert_eq!(meta.load_priority, 10);
        assert_eq!(meta.resource_requirement_mb, 0);
        assert!(meta.precondition.is_none());
    }

    #[test]
    fn test_metadata_builder_chaining() {
        let meta = ComponentMetadata::new(
            "sandbox",
            ComponentCategory::Execution,
            loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance)),
        )
        .with_dependencies(&["guardian"])
        .required()
        .with_resource_mb(500)
        .with_priority(8)
        .with_precondition(|| false)
        .with_description("Sandbox execution environment");

        assert_eq!(meta.dependencies, vec!["guardian".to_string()]);
        assert!(!meta.optional);
        assert_eq!(meta.resource_requirement_mb, 500);
        assert_eq!(meta.load_priority, 8);
        assert!(!(meta.precondition.as_ref().map(|p| p()).unwrap_or(true)));
    }

    #[tokio::test]
    async fn test_loader_fn_and_async_loader_fn() {
        let sync_loader = loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance));
        assert!(sync_loader.load().await.is_ok());

        let async_loader = async_loader_fn(|| async { Ok(Arc::new(Dummy) as SharedInstance) });
        assert!(async_loader.load().await.is_ok());
    }

    #[test]
    fn test_progress_percent_mapping() {
        assert_eq!(LoadProgress::Running(30).percent(), 30.0);
        assert_eq!(LoadProgress::Succeeded.percent(), 100.0);
        assert_eq!(LoadProgress::Failed.percent(), -1.0);
        assert!(LoadProgress::Failed.is_terminal());
        assert!(!LoadProgress::Running(60).is_terminal());
    }
}
