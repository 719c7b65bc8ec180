use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::LoaderConfig;
use crate::intent::IntentDetector;
use crate::isolation::ErrorIsolation;
use crate::loader::{LazyLoader, ProgressObserver};
use crate::monitor::{ResourceMonitor, ResourceProbe};
use crate::orchestrator::{StartupOrchestrator, StartupReport};
use crate::parallel::ParallelLoader;
use crate::profiler::StartupProfiler;
use crate::registry::ComponentRegistry;
use crate::resolver::DependencyResolver;

/// Composition root for the loader engine
///
/// Constructs every subsystem exactly once and wires them together. Hosts
/// register their components on `registry`, then call [`start`]. There is
/// no global state: tests build as many independent systems as they need
/// and substitute a resource probe through [`with_probe`].
///
/// [`start`]: StartupSystem::start
/// [`with_probe`]: StartupSystem::with_probe
pub struct StartupSystem {
    pub config: LoaderConfig,
    pub registry: Arc<ComponentRegistry>,
    pub monitor: Arc<ResourceMonitor>,
    pub intent: Arc<IntentDetector>,
    pub isolation: Arc<ErrorIsolation>,
    pub resolver: Arc<DependencyResolver>,
    pub lazy_loader: Arc<LazyLoader>,
    pub parallel_loader: Arc<ParallelLoader>,
    pub orchestrator: Arc<StartupOrchestrator>,
    pub profiler: Arc<StartupProfiler>,
}

impl StartupSystem {
    /// Build a system reading real host resources.
    pub fn new(config: LoaderConfig) -> Self {
        let monitor = Arc::new(ResourceMonitor::new(
            config.min_reserve_mb,
            config.max_cpu_percent,
        ));
        Self::assemble(config, monitor)
    }

    /// Build a system with a substitute resource probe.
    pub fn with_probe(config: LoaderConfig, probe: Arc<dyn ResourceProbe>) -> Self {
        let monitor = Arc::new(ResourceMonitor::with_probe(
            probe,
            config.min_reserve_mb,
            config.max_cpu_percent,
        ));
        Self::assemble(config, monitor)
    }

    fn assemble(config: LoaderConfig, monitor: Arc<ResourceMonitor>) -> Self {
        let registry = Arc::new(ComponentRegistry::new());
        let intent = Arc::new(IntentDetector::new(config.workspace_dir.clone()));
        let isolation = Arc::new(ErrorIsolation::new(config.max_retries));
        let resolver = Arc::new(DependencyResolver::new(Arc::clone(&registry)));
        let lazy_loader = Arc::new(LazyLoader::new(
            Arc::clone(&registry),
            Arc::clone(&isolation),
            config.component_timeout,
        ));
        let parallel_loader = Arc::new(ParallelLoader::new(
            Arc::clone(&registry),
            Arc::clone(&lazy_loader),
            config.worker_count,
        ));
        let orchestrator = Arc::new(StartupOrchestrator::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&monitor),
            Arc::clone(&intent),
            Arc::clone(&isolation),
            Arc::clone(&parallel_loader),
        ));
        let profiler = Arc::new(StartupProfiler::new(Arc::clone(&registry), &config));

        info!(
            "loader engine assembled: {} workers, {}MB reserve",
            config.worker_count, config.min_reserve_mb
        );

        Self {
            config,
            registry,
            monitor,
            intent,
            isolation,
            resolver,
            lazy_loader,
            parallel_loader,
            orchestrator,
            profiler,
        }
    }

    /// Run the startup sequence. Convenience passthrough to the orchestrator.
    pub async fn start(
        &self,
        progress: Option<ProgressObserver>,
        cancel: &CancellationToken,
    ) -> StartupReport {
        self.orchestrator.start(progress, cancel).await
    }

    /// Stop background activity (the resource sampler).
    pub async fn shutdown(&self) {
        self.monitor.stop_monitoring().await;
    }
}
