use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::loader::{LazyLoader, ProgressObserver};
use crate::models::SharedInstance;
use crate::registry::ComponentRegistry;
use crate::resolver::{DependencyResolver, LoadPlan};
use crate::{Result, StartupError};

/// Load sets of components concurrently, respecting dependency order
///
/// The resolver turns a request into level-ordered batches; within a level
/// components load concurrently on a bounded worker pool, and every level is
/// joined before the next begins. A failure in one level does not stop its
/// siblings; dependents in later levels observe the missing dependency
/// through the registry and fail with `MissingDeps`.
pub struct ParallelLoader {
    resolver: DependencyResolver,
    lazy_loader: Arc<LazyLoader>,
    worker_count: usize,
}

impl ParallelLoader {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        lazy_loader: Arc<LazyLoader>,
        worker_count: usize,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(registry),
            lazy_loader,
            worker_count: worker_count.max(1),
        }
    }

    /// Compute the loading plan for a request without executing it.
    pub fn plan(&self, names: &[String]) -> Result<LoadPlan> {
        self.resolver.plan(names)
    }

    /// Human-readable rendering of the plan for a request.
    pub fn format_plan(&self, names: &[String]) -> Result<String> {
        let plan = self.resolver.plan(names)?;
        Ok(self.resolver.format_plan(&plan))
    }

    /// Load the requested components and their transitive dependencies.
    ///
    /// Returns one outcome per attempted component. Components never
    /// attempted — because the plan failed, a cycle was detected, or
    /// cancellation was observed first — are absent from the map, except
    /// that planning failures and cycles are reported as per-component
    /// errors so callers see why nothing ran.
    ///
    /// Cancellation is honored between levels and between submissions
    /// within a level; tasks already submitted are drained before returning.
    pub async fn load_many(
        &self,
        names: &[String],
        cancel: &CancellationToken,
        progress: Option<ProgressObserver>,
    ) -> HashMap<String, Result<SharedInstance>> {
        let mut results: HashMap<String, Result<SharedInstance>> = HashMap::new();
        if names.is_empty() {
            return results;
        }

        let started = Instant::now();

        let plan = match self.resolver.plan(names) {
            Ok(plan) => plan,
            Err(StartupError::NotFound(unknown)) => {
                error!("load plan failed: component '{}' not registered", unknown);
                for name in names {
                    results.insert(name.clone(), Err(StartupError::NotFound(unknown.clone())));
                }
                return results;
            }
            Err(err) => {
                error!("load plan failed: {}", err);
                return results;
            }
        };

        if plan.has_cycle() {
            warn!(
                "refusing to load: dependency cycle among {:?}",
                plan.cycle
            );
            for name in plan.components() {
                results.insert(name, Err(StartupError::CycleDetected(plan.cycle.clone())));
            }
            return results;
        }

        info!(
            "loading {} components across {} levels",
            plan.component_count(),
            plan.levels.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut cancelled = false;

        for level in &plan.levels {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let mut tasks: JoinSet<(String, Result<SharedInstance>)> = JoinSet::new();

            for name in level {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let lazy_loader = Arc::clone(&self.lazy_loader);
                let semaphore = Arc::clone(&semaphore);
                let progress = progress.clone();
                let name = name.clone();

                tasks.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (name, Err(StartupError::Cancelled)),
                    };
                    let result = lazy_loader.load(&name, false, progress).await;
                    (name, result)
                });
            }

            // Level barrier: everything submitted must finish before the
            // next level may start.
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((name, result)) => {
                        match &result {
                            Ok(_) => debug!("loaded component: {}", name),
                            Err(err) => error!("failed to load component {}: {}", name, err),
                        }
                        results.insert(name, result);
                    }
                    Err(join_err) => {
                        error!("component loading task panicked: {}", join_err);
                    }
                }
            }

            if cancelled {
                debug!("cancellation observed; abandoning remaining levels");
                break;
            }
        }

        let elapsed = started.elapsed().as_secs_f64();
        let success_count = results.values().filter(|r| r.is_ok()).count();
        if cancelled {
            info!(
                "parallel loading cancelled after {:.2}s: {}/{} loaded",
                elapsed,
                success_count,
                plan.component_count()
            );
        } else {
            info!(
                "parallel loading completed in {:.2}s: {}/{} successful",
                elapsed,
                success_count,
                plan.component_count()
            );
        }

        results
    }
}
