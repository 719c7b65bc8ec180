use std::collections::{HashMap, HashSet};

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::isolation::ComponentFailure;
use crate::models::{
    ComponentCategory, ComponentMetadata, ComponentRecord, ComponentState, ComponentStatus,
    SharedInstance,
};
use crate::{Result, StartupError};

struct ComponentEntry {
    metadata: ComponentMetadata,
    state: ComponentState,
}

/// Central registry for all system components
///
/// Single source of truth for what exists, what depends on what, and what
/// state each component is in. All runtime state is mutated exclusively
/// through registry methods; accessors that return collections return copies.
///
/// Critical sections are short read-modify-write operations under one lock;
/// no registry method invokes host code (preconditions, loaders, observers)
/// while the lock is held.
pub struct ComponentRegistry {
    components: RwLock<HashMap<String, ComponentEntry>>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
        }
    }

    /// Register a component. Idempotent by name: re-registering overwrites
    /// the metadata but preserves any existing runtime state.
    pub fn register(&self, metadata: ComponentMetadata) {
        let mut components = self.components.write();
        let name = metadata.name.clone();
        match components.get_mut(&name) {
            Some(entry) => {
                debug!("re-registering component '{}', state preserved", name);
                entry.metadata = metadata;
            }
            None => {
                components.insert(
                    name,
                    ComponentEntry {
                        metadata,
                        state: ComponentState::default(),
                    },
                );
            }
        }
    }

    /// Get a copy of a component's metadata and state.
    pub fn get(&self, name: &str) -> Option<ComponentRecord> {
        let components = self.components.read();
        components.get(name).map(|entry| ComponentRecord {
            metadata: entry.metadata.clone(),
            state: entry.state.clone(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    /// All registered components, in no particular order.
    pub fn all(&self) -> Vec<ComponentRecord> {
        let components = self.components.read();
        components
            .values()
            .map(|entry| ComponentRecord {
                metadata: entry.metadata.clone(),
                state: entry.state.clone(),
            })
            .collect()
    }

    pub fn by_category(&self, category: ComponentCategory) -> Vec<ComponentRecord> {
        let mut records: Vec<ComponentRecord> = self
            .all()
            .into_iter()
            .filter(|r| r.metadata.category == category)
            .collect();
        records.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        records
    }

    /// All components ordered by ascending load priority, then name.
    pub fn by_priority(&self) -> Vec<ComponentRecord> {
        let mut records = self.all();
        records.sort_by(|a, b| {
            (a.metadata.load_priority, &a.metadata.name)
                .cmp(&(b.metadata.load_priority, &b.metadata.name))
        });
        records
    }

    /// All components that must succeed for startup to succeed.
    pub fn required_components(&self) -> Vec<ComponentRecord> {
        self.all()
            .into_iter()
            .filter(|r| !r.metadata.optional)
            .collect()
    }

    pub fn optional_components(&self) -> Vec<ComponentRecord> {
        self.all()
            .into_iter()
            .filter(|r| r.metadata.optional)
            .collect()
    }

    /// Direct dependencies of a component; empty for unknown names.
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        let components = self.components.read();
        components
            .get(name)
            .map(|entry| entry.metadata.dependencies.clone())
            .unwrap_or_default()
    }

    /// Full transitive dependency chain in load order (dependencies before
    /// dependents, the component itself last). Unknown names yield an empty
    /// chain; names missing from the registry are skipped.
    pub fn dependency_chain(&self, name: &str) -> Vec<String> {
        let components = self.components.read();
        let mut visited: HashSet<String> = HashSet::new();
        let mut chain: Vec<String> = Vec::new();
        let mut stack: Vec<(String, bool)> = vec![(name.to_string(), false)];

        while let Some((current, children_done)) = stack.pop() {
            if children_done {
                chain.push(current);
                continue;
            }
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some(entry) = components.get(&current) else {
                visited.remove(&current);
                continue;
            };
            stack.push((current, true));
            for dep in entry.metadata.dependencies.iter().rev() {
                if !visited.contains(dep) {
                    stack.push((dep.clone(), false));
                }
            }
        }

        chain
    }

    /// Length of the longest transitive dependency chain below a component.
    /// A component with no dependencies has depth 0.
    pub fn dependency_depth(&self, name: &str) -> usize {
        let components = self.components.read();

        fn depth_of(
            components: &HashMap<String, ComponentEntry>,
            name: &str,
            visiting: &mut HashSet<String>,
        ) -> usize {
            let Some(entry) = components.get(name) else {
                return 0;
            };
            if !visiting.insert(name.to_string()) {
                // Cycle; stop descending rather than recurse forever.
                return 0;
            }
            let depth = entry
                .metadata
                .dependencies
                .iter()
                .map(|dep| 1 + depth_of(components, dep, visiting))
                .max()
                .unwrap_or(0);
            visiting.remove(name);
            depth
        }

        depth_of(&components, name, &mut HashSet::new())
    }

    /// Atomically transition a component into `Loading`.
    ///
    /// This is the single gate that guarantees at most one in-flight loader
    /// task per component: the transition fails with `AlreadyLoading` if
    /// another task already holds the `Loading` state. Permitted source
    /// states are `NotLoaded`, `Failed` (retry) and `Loaded` (forced reload).
    pub fn begin_loading(&self, name: &str) -> Result<()> {
        let mut components = self.components.write();
        let entry = components
            .get_mut(name)
            .ok_or_else(|| StartupError::NotFound(name.to_string()))?;

        match entry.state.status {
            ComponentStatus::Loading => Err(StartupError::AlreadyLoading(name.to_string())),
            ComponentStatus::Disabled => Err(StartupError::Disabled(name.to_string())),
            _ => {
                entry.state.status = ComponentStatus::Loading;
                entry.state.load_started_at = Some(Utc::now());
                Ok(())
            }
        }
    }

    /// Record a successful load: status `Loaded`, instance stored, previous
    /// error cleared.
    pub fn complete_load(&self, name: &str, instance: SharedInstance) {
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(name) {
            entry.state.status = ComponentStatus::Loaded;
            entry.state.instance = Some(instance);
            entry.state.last_error = None;
        } else {
            warn!("complete_load for unknown component '{}'", name);
        }
    }

    /// Record a failed load: status `Failed`, error stored, instance dropped.
    pub fn fail_load(&self, name: &str, failure: ComponentFailure) {
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(name) {
            entry.state.status = ComponentStatus::Failed;
            entry.state.retry_count = failure.retry_count;
            entry.state.last_error = Some(failure);
            entry.state.instance = None;
        } else {
            warn!("fail_load for unknown component '{}'", name);
        }
    }

    /// Administratively disable a component. Disabled components are never
    /// loaded until reset.
    pub fn mark_disabled(&self, name: &str) {
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(name) {
            entry.state.status = ComponentStatus::Disabled;
            entry.state.instance = None;
        }
    }

    /// Return a component to `NotLoaded`, dropping its instance. Used by
    /// unload and by hosts clearing a `Failed` or `Disabled` state.
    pub fn reset(&self, name: &str) {
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(name) {
            entry.state.status = ComponentStatus::NotLoaded;
            entry.state.instance = None;
        }
    }

    pub fn set_load_time(&self, name: &str, load_time_ms: f64) {
        let mut components = self.components.write();
        if let Some(entry) = components.get_mut(name) {
            entry.state.load_time_ms = load_time_ms;
        }
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        let components = self.components.read();
        components
            .get(name)
            .map(|entry| entry.state.status == ComponentStatus::Loaded)
            .unwrap_or(false)
    }

    /// Whether a component could load right now: all dependencies `Loaded`
    /// and its precondition, if any, satisfied. The precondition runs outside
    /// the registry lock.
    pub fn can_load(&self, name: &str) -> bool {
        let precondition = {
            let components = self.components.read();
            let Some(entry) = components.get(name) else {
                return false;
            };
            for dep in &entry.metadata.dependencies {
                let loaded = components
                    .get(dep)
                    .map(|d| d.state.status == ComponentStatus::Loaded)
                    .unwrap_or(false);
                if !loaded {
                    return false;
                }
            }
            entry.metadata.precondition.clone()
        };

        match precondition {
            Some(check) => check(),
            None => true,
        }
    }

    /// Dependencies of a component that are not currently `Loaded`.
    pub fn missing_dependencies(&self, name: &str) -> Vec<String> {
        let components = self.components.read();
        let Some(entry) = components.get(name) else {
            return Vec::new();
        };
        entry
            .metadata
            .dependencies
            .iter()
            .filter(|dep| {
                !components
                    .get(dep.as_str())
                    .map(|d| d.state.status == ComponentStatus::Loaded)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// All `NotLoaded` components whose dependencies and preconditions are
    /// currently satisfied.
    pub fn loadable(&self) -> Vec<ComponentRecord> {
        let candidates: Vec<String> = {
            let components = self.components.read();
            components
                .iter()
                .filter(|(_, entry)| entry.state.status == ComponentStatus::NotLoaded)
                .map(|(name, _)| name.clone())
                .collect()
        };

        candidates
            .into_iter()
            .filter(|name| self.can_load(name))
            .filter_map(|name| self.get(&name))
            .collect()
    }

    /// Combined memory footprint of the named components. Unknown names
    /// contribute nothing.
    pub fn total_requirement_mb(&self, names: &[String]) -> u64 {
        let components = self.components.read();
        names
            .iter()
            .filter_map(|name| components.get(name))
            .map(|entry| entry.metadata.resource_requirement_mb)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::loader_fn;
    use std::any::Any;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Dummy;
    impl crate::models::ComponentInstance for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn component(name: &str, deps: &[&str]) -> ComponentMetadata {
        ComponentMetadata::new(
            name,
            ComponentCategory::Core,
            loader_fn(|| Ok(Arc::new(Dummy) as SharedInstance)),
        )
        .with_dependencies(deps)
    }

    fn registry_with(components: Vec<ComponentMetadata>) -> ComponentRegistry {
        let registry = ComponentRegistry::new();
        for c in components {
            registry.register(c);
        }
        registry
    }

    #[test]
    fn test_register_preserves_state_on_overwrite() {
        let registry = registry_with(vec![component("config", &[])]);
        registry.begin_loading("config").unwrap();
        registry.complete_load("config", Arc::new(Dummy));

        // Re-register with new metadata; runtime state must survive.
        registry.register(component("config", &[]).with_resource_mb(5));

        let record = registry.get("config").unwrap();
        assert_eq!(record.metadata.resource_requirement_mb, 5);
        assert_eq!(record.state.status, ComponentStatus::Loaded);
        assert!(record.state.instance.is_some());
    }

    #[test]
    fn test_get_unknown_returns_none() {
        let registry = ComponentRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(!registry.is_loaded("nope"));
        assert!(!registry.can_load("nope"));
        assert!(registry.dependency_chain("nope").is_empty());
    }

    #[test]
    fn test_by_priority_orders_by_priority_then_name() {
        let registry = registry_with(vec![
            component("b", &[]).with_priority(2),
            component("a", &[]).with_priority(2),
            component("z", &[]).with_priority(1),
        ]);

        let names: Vec<String> = registry
            .by_priority()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert_eq!(names, vec!["z", "a", "b"]);
    }

    #[test]
    fn test_dependency_chain_is_postorder() {
        let registry = registry_with(vec![
            component("a", &[]),
            component("b", &["a"]),
            component("c", &["a"]),
            component("d", &["b", "c"]),
        ]);

        let chain = registry.dependency_chain("d");
        assert_eq!(chain.last(), Some(&"d".to_string()));
        let pos = |n: &str| chain.iter().position(|c| c == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("a") < pos("c"));
        assert!(pos("b") < pos("d"));
        assert!(pos("c") < pos("d"));
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_dependency_depth() {
        let registry = registry_with(vec![
            component("a", &[]),
            component("b", &["a"]),
            component("c", &["b"]),
            component("d", &["c", "a"]),
        ]);

        assert_eq!(registry.dependency_depth("a"), 0);
        assert_eq!(registry.dependency_depth("b"), 1);
        assert_eq!(registry.dependency_depth("d"), 3);
    }

    #[test]
    fn test_begin_loading_gate() {
        let registry = registry_with(vec![component("db", &[])]);

        registry.begin_loading("db").unwrap();
        // A second loader for the same component must be rejected.
        match registry.begin_loading("db") {
            Err(StartupError::AlreadyLoading(name)) => assert_eq!(name, "db"),
            other => panic!("expected AlreadyLoading, got {other:?}"),
        }

        registry.complete_load("db", Arc::new(Dummy));
        // Reload from Loaded is permitted (forced reload path).
        assert!(registry.begin_loading("db").is_ok());
    }

    #[test]
    fn test_begin_loading_disabled_rejected() {
        let registry = registry_with(vec![component("ui", &[])]);
        registry.mark_disabled("ui");
        assert!(matches!(
            registry.begin_loading("ui"),
            Err(StartupError::Disabled(_))
        ));
        registry.reset("ui");
        assert!(registry.begin_loading("ui").is_ok());
    }

    #[test]
    fn test_can_load_requires_deps_and_precondition() {
        let registry = registry_with(vec![
            component("a", &[]),
            component("b", &["a"]),
            component("gated", &[]).with_precondition(|| false),
        ]);

        assert!(!registry.can_load("b"));
        assert_eq!(registry.missing_dependencies("b"), vec!["a".to_string()]);

        registry.begin_loading("a").unwrap();
        registry.complete_load("a", Arc::new(Dummy));
        assert!(registry.can_load("b"));
        assert!(registry.missing_dependencies("b").is_empty());

        assert!(!registry.can_load("gated"));
    }

    #[test]
    fn test_loadable_excludes_blocked_and_loaded() {
        let registry = registry_with(vec![
            component("a", &[]),
            component("b", &["a"]),
            component("c", &[]),
        ]);

        let loadable: Vec<String> = registry
            .loadable()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert!(loadable.contains(&"a".to_string()));
        assert!(loadable.contains(&"c".to_string()));
        assert!(!loadable.contains(&"b".to_string()));

        registry.begin_loading("a").unwrap();
        registry.complete_load("a", Arc::new(Dummy));

        let loadable: Vec<String> = registry
            .loadable()
            .into_iter()
            .map(|r| r.metadata.name)
            .collect();
        assert!(!loadable.contains(&"a".to_string()));
        assert!(loadable.contains(&"b".to_string()));
    }

    #[test]
    fn test_total_requirement_mb_skips_unknown() {
        let registry = registry_with(vec![
            component("a", &[]).with_resource_mb(10),
            component("b", &[]).with_resource_mb(20),
        ]);

        let names = vec!["a".to_string(), "b".to_string(), "ghost".to_string()];
        assert_eq!(registry.total_requirement_mb(&names), 30);
    }
}
