use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::isolation::ErrorIsolation;
use crate::models::{ComponentStatus, LoadProgress, SharedInstance};
use crate::registry::ComponentRegistry;
use crate::{Result, StartupError};

/// Observer of per-component load progress. Must not block; runs on the
/// loading worker.
pub type ProgressObserver = Arc<dyn Fn(&str, LoadProgress) + Send + Sync>;

/// Observer fired once a load attempt finishes: the instance on success,
/// `None` on failure.
pub type LoadedObserver = Arc<dyn Fn(&str, Option<&SharedInstance>) + Send + Sync>;

/// Load a single component on demand, with caching and progress reporting
///
/// A load checks dependencies and preconditions against the registry, takes
/// the registry's exclusive `Loading` transition, runs the registered loader
/// thunk under error isolation, and caches the instance back into the
/// registry. Repeat loads return the cached instance without invoking the
/// thunk.
pub struct LazyLoader {
    registry: Arc<ComponentRegistry>,
    isolation: Arc<ErrorIsolation>,
    component_timeout: Option<Duration>,
    progress_observers: Mutex<Vec<ProgressObserver>>,
    loaded_observers: Mutex<Vec<LoadedObserver>>,
}

impl LazyLoader {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        isolation: Arc<ErrorIsolation>,
        component_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            isolation,
            component_timeout,
            progress_observers: Mutex::new(Vec::new()),
            loaded_observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for progress of every component load.
    pub fn on_progress<F>(&self, observer: F)
    where
        F: Fn(&str, LoadProgress) + Send + Sync + 'static,
    {
        self.progress_observers.lock().push(Arc::new(observer));
    }

    /// Register an observer fired when any load attempt finishes.
    pub fn on_loaded<F>(&self, observer: F)
    where
        F: Fn(&str, Option<&SharedInstance>) + Send + Sync + 'static,
    {
        self.loaded_observers.lock().push(Arc::new(observer));
    }

    /// Load a component, returning the cached instance when one exists.
    ///
    /// `force_reload` bypasses the cache and re-invokes the loader thunk.
    /// The optional `progress` callback receives this load's progress in
    /// addition to any globally registered observers.
    pub async fn load(
        &self,
        name: &str,
        force_reload: bool,
        progress: Option<ProgressObserver>,
    ) -> Result<SharedInstance> {
        let record = self.registry.get(name).ok_or_else(|| {
            error!("component '{}' not found in registry", name);
            StartupError::NotFound(name.to_string())
        })?;

        if record.state.status == ComponentStatus::Loaded && !force_reload {
            if let Some(instance) = record.state.instance {
                debug!("component '{}' already loaded", name);
                return Ok(instance);
            }
        }

        if record.state.status == ComponentStatus::Loading {
            warn!("component '{}' is already being loaded", name);
            return Err(StartupError::AlreadyLoading(name.to_string()));
        }

        if !self.registry.can_load(name) {
            let missing = self.registry.missing_dependencies(name);
            if missing.is_empty() {
                debug!("precondition for '{}' not satisfied", name);
            } else {
                error!("cannot load '{}': missing dependencies {:?}", name, missing);
            }
            return Err(StartupError::MissingDeps {
                component: name.to_string(),
                missing,
            });
        }

        // Exclusive Loading transition; a concurrent load loses here.
        self.registry.begin_loading(name)?;
        self.emit_progress(name, LoadProgress::Running(0), &progress);

        let started = Instant::now();
        self.emit_progress(name, LoadProgress::Running(30), &progress);

        let outcome = self
            .isolation
            .safe_load(
                name,
                &record.metadata.loader,
                self.component_timeout,
                None,
                None,
            )
            .await;

        let load_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.registry.set_load_time(name, load_time_ms);

        match outcome {
            Ok(instance) => {
                self.emit_progress(name, LoadProgress::Running(60), &progress);
                self.registry.complete_load(name, Arc::clone(&instance));
                info!("component '{}' loaded in {:.1}ms", name, load_time_ms);
                self.emit_progress(name, LoadProgress::Succeeded, &progress);
                self.notify_loaded(name, Some(&instance));
                Ok(instance)
            }
            Err(err) => {
                if let Some(failure) = self.isolation.error(name) {
                    self.registry.fail_load(name, failure);
                }
                self.emit_progress(name, LoadProgress::Failed, &progress);
                self.notify_loaded(name, None);
                Err(err)
            }
        }
    }

    /// Load several components sequentially, collecting per-component
    /// outcomes. Use the parallel loader for dependency-aware concurrency.
    pub async fn load_all(
        &self,
        names: &[String],
        progress: Option<ProgressObserver>,
    ) -> HashMap<String, Result<SharedInstance>> {
        let mut results = HashMap::new();
        for name in names {
            let result = self.load(name, false, progress.clone()).await;
            results.insert(name.clone(), result);
        }
        results
    }

    /// Unload a component: run its cleanup hook if present, then return it
    /// to `NotLoaded` and drop the instance. Unloading a component that is
    /// not loaded is a no-op.
    pub fn unload(&self, name: &str) -> Result<()> {
        let record = self
            .registry
            .get(name)
            .ok_or_else(|| StartupError::NotFound(name.to_string()))?;

        if record.state.status != ComponentStatus::Loaded {
            warn!("component '{}' is not loaded; nothing to unload", name);
            return Ok(());
        }

        if let Some(instance) = record.state.instance {
            if catch_unwind(AssertUnwindSafe(|| instance.cleanup())).is_err() {
                error!("cleanup for component '{}' panicked; ignoring", name);
            }
        }

        self.registry.reset(name);
        info!("component '{}' unloaded", name);
        Ok(())
    }

    fn emit_progress(&self, name: &str, progress: LoadProgress, per_call: &Option<ProgressObserver>) {
        if let Some(callback) = per_call {
            guard(name, || callback(name, progress));
        }
        let observers = self.progress_observers.lock().clone();
        for observer in observers {
            guard(name, || observer(name, progress));
        }
    }

    fn notify_loaded(&self, name: &str, instance: Option<&SharedInstance>) {
        let observers = self.loaded_observers.lock().clone();
        for observer in observers {
            guard(name, || observer(name, instance));
        }
    }
}

fn guard(name: &str, observer: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(observer)).is_err() {
        warn!("progress observer for '{}' panicked; ignoring", name);
    }
}
