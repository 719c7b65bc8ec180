use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LoaderConfig;
use crate::models::ComponentStatus;
use crate::registry::ComponentRegistry;
use crate::Result;

/// Performance record for one component's load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentProfile {
    pub name: String,
    pub load_time_ms: f64,
    pub resource_requirement_mb: u64,
    pub dependencies: Vec<String>,
    pub status: ComponentStatus,
    /// When the load attempt actually began; meaningful under parallel
    /// loading where registry order is not.
    pub load_started_at: Option<DateTime<Utc>>,
    /// Whether other components waited on this one.
    pub is_blocking: bool,
}

/// Complete startup performance profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupProfile {
    pub total_duration_ms: f64,
    pub component_count: usize,
    pub successful_count: usize,
    pub failed_count: usize,
    /// Serialized load time divided by wall-clock duration; values above 1
    /// indicate realized parallelism.
    pub parallel_efficiency: f64,
    pub bottlenecks: Vec<String>,
    pub optimization_suggestions: Vec<String>,
    pub components: Vec<ComponentProfile>,
    pub timestamp: DateTime<Utc>,
}

/// Per-component load-time change between two profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDelta {
    pub component: String,
    pub time_diff_ms: f64,
    pub time_diff_percent: f64,
}

/// Differences between two startup profiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileComparison {
    pub duration_diff_ms: f64,
    pub duration_diff_percent: f64,
    pub efficiency_diff: f64,
    /// Largest absolute changes first, capped at ten entries.
    pub component_deltas: Vec<ComponentDelta>,
    pub improvement: bool,
}

/// Analyze startup performance after the fact
///
/// Collects per-component load times from the registry, ranks bottlenecks,
/// and derives optimization suggestions. Profiles serialize to JSON so runs
/// can be compared across sessions.
pub struct StartupProfiler {
    registry: Arc<ComponentRegistry>,
    profile_dir: PathBuf,
    heavy_component_mb: u64,
    startup_target_ms: u64,
    profiles: Mutex<Vec<StartupProfile>>,
}

impl StartupProfiler {
    pub fn new(registry: Arc<ComponentRegistry>, config: &LoaderConfig) -> Self {
        Self {
            registry,
            profile_dir: config.profile_dir.clone(),
            heavy_component_mb: config.heavy_component_mb,
            startup_target_ms: config.startup_target_ms,
            profiles: Mutex::new(Vec::new()),
        }
    }

    /// Build a profile from the current component states.
    ///
    /// Only components with a recorded load attempt participate. Components
    /// are ordered by when their load actually started.
    pub fn build(&self, total_duration_ms: f64) -> StartupProfile {
        let mut components: Vec<ComponentProfile> = self
            .registry
            .all()
            .into_iter()
            .filter(|record| record.state.load_time_ms > 0.0)
            .map(|record| ComponentProfile {
                name: record.metadata.name.clone(),
                load_time_ms: record.state.load_time_ms,
                resource_requirement_mb: record.metadata.resource_requirement_mb,
                dependencies: record.metadata.dependencies.clone(),
                status: record.state.status,
                load_started_at: record.state.load_started_at,
                is_blocking: !record.metadata.dependencies.is_empty(),
            })
            .collect();

        components.sort_by(|a, b| match (a.load_started_at, b.load_started_at) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });

        let successful_count = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Loaded)
            .count();
        let failed_count = components
            .iter()
            .filter(|c| c.status == ComponentStatus::Failed)
            .count();

        let total_serial_ms: f64 = components.iter().map(|c| c.load_time_ms).sum();
        let parallel_efficiency = if total_duration_ms > 0.0 {
            total_serial_ms / total_duration_ms
        } else {
            0.0
        };

        let bottleneck_threshold = total_duration_ms * 0.2;
        let bottlenecks: Vec<String> = components
            .iter()
            .filter(|c| c.load_time_ms > bottleneck_threshold)
            .map(|c| c.name.clone())
            .collect();

        let optimization_suggestions =
            self.suggestions(&components, total_duration_ms, total_serial_ms, &bottlenecks);

        let profile = StartupProfile {
            total_duration_ms,
            component_count: components.len(),
            successful_count,
            failed_count,
            parallel_efficiency,
            bottlenecks,
            optimization_suggestions,
            components,
            timestamp: Utc::now(),
        };

        self.profiles.lock().push(profile.clone());
        profile
    }

    fn suggestions(
        &self,
        components: &[ComponentProfile],
        total_duration_ms: f64,
        total_serial_ms: f64,
        bottlenecks: &[String],
    ) -> Vec<String> {
        let mut suggestions = Vec::new();

        if !bottlenecks.is_empty() {
            suggestions.push(format!(
                "Bottleneck components detected: {}. Consider optimizing these components or deferring their loading.",
                bottlenecks.join(", ")
            ));
        }

        let heavy: Vec<&str> = components
            .iter()
            .filter(|c| c.resource_requirement_mb > self.heavy_component_mb)
            .map(|c| c.name.as_str())
            .collect();
        if !heavy.is_empty() {
            suggestions.push(format!(
                "Heavy components found: {}. Consider lazy loading these components.",
                heavy.join(", ")
            ));
        }

        if total_serial_ms > 0.0 {
            let inverse_efficiency = total_duration_ms / total_serial_ms;
            if inverse_efficiency < 0.3 {
                suggestions.push(format!(
                    "Low parallelization efficiency ({:.0}%). Review dependency chains to enable more parallel loading.",
                    inverse_efficiency * 100.0
                ));
            }
        }

        let max_depth = components
            .iter()
            .map(|c| self.registry.dependency_depth(&c.name))
            .max()
            .unwrap_or(0);
        if max_depth > 3 {
            suggestions.push(format!(
                "Long dependency chains detected (depth {max_depth}). Consider flattening dependencies where possible."
            ));
        }

        if total_duration_ms > self.startup_target_ms as f64 {
            suggestions.push(format!(
                "Startup time ({:.1}s) exceeds target ({:.1}s). Focus on optimizing critical path components.",
                total_duration_ms / 1000.0,
                self.startup_target_ms as f64 / 1000.0
            ));
        }

        suggestions
    }

    /// Persist a profile as JSON under the profile directory.
    pub fn save(&self, profile: &StartupProfile) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.profile_dir)?;

        let filename = format!(
            "startup_profile_{}.json",
            profile.timestamp.format("%Y%m%d_%H%M%S")
        );
        let path = self.profile_dir.join(filename);

        let rendered = serde_json::to_string_pretty(profile)?;
        std::fs::write(&path, rendered)?;
        info!("startup profile saved to {}", path.display());

        Ok(path)
    }

    /// Load a previously saved profile.
    pub fn load(&self, path: &Path) -> Result<StartupProfile> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Compare two profiles; positive deltas mean the second run was slower.
    pub fn compare(&self, before: &StartupProfile, after: &StartupProfile) -> ProfileComparison {
        let duration_diff_ms = after.total_duration_ms - before.total_duration_ms;
        let duration_diff_percent = if before.total_duration_ms > 0.0 {
            duration_diff_ms / before.total_duration_ms * 100.0
        } else {
            0.0
        };

        let times_before: std::collections::HashMap<&str, f64> = before
            .components
            .iter()
            .map(|c| (c.name.as_str(), c.load_time_ms))
            .collect();
        let times_after: std::collections::HashMap<&str, f64> = after
            .components
            .iter()
            .map(|c| (c.name.as_str(), c.load_time_ms))
            .collect();

        let mut component_deltas: Vec<ComponentDelta> = times_before
            .iter()
            .filter(|(_, time)| **time > 0.0)
            .map(|(name, before_ms)| {
                let after_ms = times_after.get(name).copied().unwrap_or(0.0);
                ComponentDelta {
                    component: name.to_string(),
                    time_diff_ms: after_ms - before_ms,
                    time_diff_percent: (after_ms - before_ms) / before_ms * 100.0,
                }
            })
            .collect();

        component_deltas.sort_by(|a, b| {
            b.time_diff_ms
                .abs()
                .partial_cmp(&a.time_diff_ms.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.component.cmp(&b.component))
        });
        component_deltas.truncate(10);

        ProfileComparison {
            duration_diff_ms,
            duration_diff_percent,
            efficiency_diff: after.parallel_efficiency - before.parallel_efficiency,
            component_deltas,
            improvement: duration_diff_ms < 0.0,
        }
    }

    /// All profiles built in this session, oldest first.
    pub fn profiles(&self) -> Vec<StartupProfile> {
        self.profiles.lock().clone()
    }

    /// The most recently built profile.
    pub fn current(&self) -> Option<StartupProfile> {
        self.profiles.lock().last().cloned()
    }

    /// Human-readable rendering of a profile.
    pub fn format_profile(&self, profile: &StartupProfile) -> String {
        let mut lines = vec![
            "=".repeat(60),
            "Startup performance profile".to_string(),
            "=".repeat(60),
            format!("Timestamp: {}", profile.timestamp.to_rfc3339()),
            format!(
                "Total duration: {:.1}ms ({:.2}s)",
                profile.total_duration_ms,
                profile.total_duration_ms / 1000.0
            ),
            format!(
                "Components: {} ({} successful, {} failed)",
                profile.component_count, profile.successful_count, profile.failed_count
            ),
            format!("Parallel efficiency: {:.2}x", profile.parallel_efficiency),
            String::new(),
            "Component load times:".to_string(),
        ];

        let mut by_time: Vec<&ComponentProfile> = profile.components.iter().collect();
        by_time.sort_by(|a, b| {
            b.load_time_ms
                .partial_cmp(&a.load_time_ms)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for component in by_time.iter().take(20) {
            let deps = if component.dependencies.is_empty() {
                String::new()
            } else {
                format!(", deps: {}", component.dependencies.join(", "))
            };
            lines.push(format!(
                "  {}: {:.1}ms ({}MB{})",
                component.name, component.load_time_ms, component.resource_requirement_mb, deps
            ));
        }

        if !profile.bottlenecks.is_empty() {
            lines.push(String::new());
            lines.push("Bottlenecks:".to_string());
            for name in &profile.bottlenecks {
                lines.push(format!("  ! {name}"));
            }
        }

        if !profile.optimization_suggestions.is_empty() {
            lines.push(String::new());
            lines.push("Optimization suggestions:".to_string());
            for (i, suggestion) in profile.optimization_suggestions.iter().enumerate() {
                lines.push(format!("  {}. {}", i + 1, suggestion));
            }
        }

        lines.push("=".repeat(60));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::ComponentFailure;
    use crate::models::{
        loader_fn, ComponentCategory, ComponentMetadata, SharedInstance,
    };
    use std::any::Any;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct Dummy;
    impl crate::models::ComponentInstance for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn component(name: &str, deps: &[&str], mb: u64) -> ComponentMetadata {
        ComponentMetadata::new(
            name,
            ComponentCategory::Core,
            loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance)),
        )
        .with_dependencies(deps)
        .with_resource_mb(mb)
    }

    fn loaded(registry: &ComponentRegistry, name: &str, load_time_ms: f64) {
        registry.begin_loading(name).unwrap();
        registry.complete_load(name, Arc::new(Dummy));
        registry.set_load_time(name, load_time_ms);
    }

    fn failed(registry: &ComponentRegistry, name: &str, load_time_ms: f64) {
        registry.begin_loading(name).unwrap();
        registry.fail_load(
            name,
            ComponentFailure {
                component: name.to_string(),
                kind: "boom".to_string(),
                message: "boom".to_string(),
                traceback: "boom".to_string(),
                timestamp: Utc::now(),
                retry_count: 0,
                can_retry: true,
            },
        );
        registry.set_load_time(name, load_time_ms);
    }

    fn profiler_with(
        registry: Arc<ComponentRegistry>,
        dir: &TempDir,
    ) -> StartupProfiler {
        let config = LoaderConfig::default().with_profile_dir(dir.path());
        StartupProfiler::new(registry, &config)
    }

    #[test]
    fn test_build_counts_and_efficiency() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &[], 10));
        registry.register(component("b", &["a"], 20));
        registry.register(component("c", &[], 30));
        registry.register(component("untouched", &[], 5));

        loaded(&registry, "a", 400.0);
        loaded(&registry, "b", 300.0);
        failed(&registry, "c", 100.0);

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        let profile = profiler.build(1000.0);

        assert_eq!(profile.component_count, 3);
        assert_eq!(profile.successful_count, 2);
        assert_eq!(profile.failed_count, 1);
        assert!((profile.parallel_efficiency - 0.8).abs() < 1e-9);
        // a (400ms) and b (300ms) exceed 20% of 1000ms; c does not.
        assert!(profile.bottlenecks.contains(&"a".to_string()));
        assert!(profile.bottlenecks.contains(&"b".to_string()));
        assert!(!profile.bottlenecks.contains(&"c".to_string()));
    }

    #[test]
    fn test_components_ordered_by_load_start() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("late", &[], 0));
        registry.register(component("early", &[], 0));

        loaded(&registry, "late", 10.0);
        std::thread::sleep(std::time::Duration::from_millis(5));
        loaded(&registry, "early", 10.0);

        // "late" was registered second but started first.
        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        let profile = profiler.build(100.0);

        assert_eq!(profile.components[0].name, "late");
        assert_eq!(profile.components[1].name, "early");
    }

    #[test]
    fn test_suggestions_rules() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &[], 10));
        registry.register(component("b", &["a"], 200));
        registry.register(component("c", &["b"], 10));
        registry.register(component("d", &["c"], 10));
        registry.register(component("e", &["d"], 10));

        for name in ["a", "b", "c", "d", "e"] {
            loaded(&registry, name, 200.0);
        }

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        // Serialized 1000ms in a 5000ms wall clock: wall/serial = 5.0, no
        // parallelism complaint; duration over the 3000ms target; depth 4.
        let profile = profiler.build(5000.0);

        let text = profile.optimization_suggestions.join("\n");
        assert!(text.contains("Heavy components found: b"));
        assert!(text.contains("Long dependency chains"));
        assert!(text.contains("exceeds target"));
        assert!(!text.contains("Low parallelization"));
    }

    #[test]
    fn test_low_parallelization_suggestion() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &[], 10));
        loaded(&registry, "a", 1000.0);

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        // Wall clock 200ms against 1000ms serialized: inverse ratio 0.2.
        let profile = profiler.build(200.0);

        let text = profile.optimization_suggestions.join("\n");
        assert!(text.contains("Low parallelization"));
    }

    #[test]
    fn test_save_load_round_trip() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &[], 10));
        loaded(&registry, "a", 123.5);

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        let profile = profiler.build(500.0);

        let path = profiler.save(&profile).unwrap();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("startup_profile_"));

        let reloaded = profiler.load(&path).unwrap();
        assert_eq!(profile, reloaded);
    }

    #[test]
    fn test_compare_sorts_by_absolute_change() {
        let registry = Arc::new(ComponentRegistry::new());
        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);

        let base = |components: Vec<ComponentProfile>, total: f64| StartupProfile {
            total_duration_ms: total,
            component_count: components.len(),
            successful_count: components.len(),
            failed_count: 0,
            parallel_efficiency: 1.0,
            bottlenecks: Vec::new(),
            optimization_suggestions: Vec::new(),
            components,
            timestamp: Utc::now(),
        };
        let entry = |name: &str, ms: f64| ComponentProfile {
            name: name.to_string(),
            load_time_ms: ms,
            resource_requirement_mb: 0,
            dependencies: Vec::new(),
            status: ComponentStatus::Loaded,
            load_started_at: None,
            is_blocking: false,
        };

        let before = base(vec![entry("a", 100.0), entry("b", 50.0)], 1000.0);
        let after = base(vec![entry("a", 110.0), entry("b", 200.0)], 800.0);

        let comparison = profiler.compare(&before, &after);
        assert_eq!(comparison.duration_diff_ms, -200.0);
        assert!(comparison.improvement);
        assert_eq!(comparison.component_deltas[0].component, "b");
        assert_eq!(comparison.component_deltas[0].time_diff_ms, 150.0);
        assert_eq!(comparison.component_deltas[1].component, "a");
    }

    #[test]
    fn test_profiles_history_and_current() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &[], 10));
        loaded(&registry, "a", 5.0);

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        assert!(profiler.current().is_none());

        profiler.build(100.0);
        profiler.build(200.0);
        assert_eq!(profiler.profiles().len(), 2);
        assert_eq!(profiler.current().unwrap().total_duration_ms, 200.0);
    }

    #[test]
    fn test_format_profile_renders() {
        let registry = Arc::new(ComponentRegistry::new());
        registry.register(component("a", &["b"], 10));
        registry.register(component("b", &[], 10));
        loaded(&registry, "b", 30.0);
        loaded(&registry, "a", 70.0);

        let dir = TempDir::new().unwrap();
        let profiler = profiler_with(Arc::clone(&registry), &dir);
        let profile = profiler.build(100.0);
        let rendered = profiler.format_profile(&profile);

        assert!(rendered.contains("Startup performance profile"));
        assert!(rendered.contains("a: 70.0ms"));
        assert!(rendered.contains("deps: b"));
    }
}
