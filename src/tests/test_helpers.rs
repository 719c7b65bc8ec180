//! Shared fixtures for the scenario tests: fake components with
//! controllable loaders, and a fully wired system over a fixed resource
//! probe so outcomes do not depend on the host machine.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::LoaderConfig;
use crate::models::{
    async_loader_fn, loader_fn, ComponentCategory, ComponentInstance, ComponentMetadata,
    SharedInstance,
};
use crate::monitor::FixedProbe;
use crate::system::StartupSystem;

/// Minimal instance carrying its component name for downcast checks.
#[derive(Debug)]
pub struct FakeComponent {
    pub name: String,
}

impl ComponentInstance for FakeComponent {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Tracks loader thunk invocations per component.
#[derive(Default)]
pub struct InvocationLog {
    counts: Mutex<HashMap<String, usize>>,
}

impl InvocationLog {
    pub fn record(&self, name: &str) {
        *self.counts.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, name: &str) -> usize {
        self.counts.lock().get(name).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.lock().values().sum()
    }
}

/// Component whose loader succeeds instantly.
pub fn instant_component(
    name: &str,
    deps: &[&str],
    mb: u64,
    log: &Arc<InvocationLog>,
) -> ComponentMetadata {
    let log = Arc::clone(log);
    let component_name = name.to_string();
    ComponentMetadata::new(
        name,
        ComponentCategory::Core,
        loader_fn(move || {
            log.record(&component_name);
            Ok(Arc::new(FakeComponent {
                name: component_name.clone(),
            }) as SharedInstance)
        }),
    )
    .with_dependencies(deps)
    .with_resource_mb(mb)
}

/// Component whose loader sleeps before succeeding.
pub fn slow_component(
    name: &str,
    deps: &[&str],
    delay: Duration,
    log: &Arc<InvocationLog>,
) -> ComponentMetadata {
    let log = Arc::clone(log);
    let component_name = name.to_string();
    ComponentMetadata::new(
        name,
        ComponentCategory::Core,
        async_loader_fn(move || {
            let log = Arc::clone(&log);
            let component_name = component_name.clone();
            async move {
                log.record(&component_name);
                tokio::time::sleep(delay).await;
                Ok(Arc::new(FakeComponent {
                    name: component_name.clone(),
                }) as SharedInstance)
            }
        }),
    )
    .with_dependencies(deps)
}

/// Component whose loader always fails with the given message.
pub fn failing_component(
    name: &str,
    deps: &[&str],
    message: &'static str,
) -> ComponentMetadata {
    ComponentMetadata::new(
        name,
        ComponentCategory::Core,
        loader_fn(move || Err(anyhow::anyhow!(message))),
    )
    .with_dependencies(deps)
}

/// Concurrency gauge: records the peak number of simultaneously running
/// loaders that share it.
#[derive(Default)]
pub struct ConcurrencyGauge {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Component that sleeps while tracking overlap with its peers.
pub fn gauged_component(
    name: &str,
    deps: &[&str],
    delay: Duration,
    gauge: &Arc<ConcurrencyGauge>,
) -> ComponentMetadata {
    let gauge = Arc::clone(gauge);
    let component_name = name.to_string();
    ComponentMetadata::new(
        name,
        ComponentCategory::Core,
        async_loader_fn(move || {
            let gauge = Arc::clone(&gauge);
            let component_name = component_name.clone();
            async move {
                let now = gauge.active.fetch_add(1, Ordering::SeqCst) + 1;
                gauge.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                gauge.active.fetch_sub(1, Ordering::SeqCst);
                Ok(Arc::new(FakeComponent {
                    name: component_name.clone(),
                }) as SharedInstance)
            }
        }),
    )
    .with_dependencies(deps)
}

/// A wired system over a fixed resource probe and a temp workspace.
pub fn test_system(
    workspace: &std::path::Path,
    available_mb: u64,
    min_reserve_mb: u64,
    worker_count: usize,
) -> StartupSystem {
    let config = LoaderConfig {
        min_reserve_mb,
        worker_count,
        workspace_dir: workspace.to_path_buf(),
        ..LoaderConfig::default()
    };
    StartupSystem::with_probe(
        config,
        Arc::new(FixedProbe {
            total_mb: 16384,
            available_mb,
            cpu_percent: 10.0,
        }),
    )
}
