use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::registry::ComponentRegistry;
use crate::{Result, StartupError};

/// Level-ordered loading plan for a set of components
///
/// Each level is a set of components with no dependency relation among
/// themselves; everything a level's components depend on sits in earlier
/// levels. When the requested set induces a cycle, the residual components
/// are emitted as a final level and `cycle` is non-empty; such a plan must
/// be treated as a fatal planning error, never executed.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub levels: Vec<Vec<String>>,
    /// Residual components that could not be ordered (cycle members and
    /// their dependents). Empty for valid plans.
    pub cycle: Vec<String>,
    /// Advisory estimate of wall-clock loading time in seconds.
    pub estimated_time_s: f64,
    /// Advisory ratio of components to levels; higher means more parallelism.
    pub parallelization_factor: f64,
}

impl LoadPlan {
    pub fn has_cycle(&self) -> bool {
        !self.cycle.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Every component in the plan, in level order.
    pub fn components(&self) -> Vec<String> {
        self.levels.iter().flatten().cloned().collect()
    }

    pub fn component_count(&self) -> usize {
        self.levels.iter().map(|level| level.len()).sum()
    }
}

/// Compute level-ordered loading plans from registry dependencies
///
/// Plans cover the requested components plus their transitive dependencies;
/// a dependency absent from the registry fails the whole plan. Levels are
/// produced with Kahn's algorithm, each level sorted by load priority then
/// name for determinism.
pub struct DependencyResolver {
    registry: Arc<ComponentRegistry>,
}

struct PlanNode {
    dependencies: Vec<String>,
    load_priority: i32,
    resource_requirement_mb: u64,
}

impl DependencyResolver {
    pub fn new(registry: Arc<ComponentRegistry>) -> Self {
        Self { registry }
    }

    pub fn plan(&self, requested: &[String]) -> Result<LoadPlan> {
        if requested.is_empty() {
            return Ok(LoadPlan {
                levels: Vec::new(),
                cycle: Vec::new(),
                estimated_time_s: 0.0,
                parallelization_factor: 1.0,
            });
        }

        let nodes = self.collect_closure(requested)?;
        let node_count = nodes.len();

        // Dependents map and initial in-degrees for Kahn's algorithm. The
        // closure guarantees every dependency is itself a node.
        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, node) in &nodes {
            in_degree.entry(name.as_str()).or_insert(0);
            for dep in &node.dependencies {
                *in_degree.entry(name.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(name.as_str());
            }
        }
        // Self-dependencies were counted above; they are plain cycles.

        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut emitted: HashSet<&str> = HashSet::new();

        while emitted.len() < node_count {
            let mut level: Vec<&str> = in_degree
                .iter()
                .filter(|(name, degree)| **degree == 0 && !emitted.contains(*name))
                .map(|(name, _)| *name)
                .collect();

            if level.is_empty() {
                // No progress possible: the residual is cyclic.
                let mut residual: Vec<&str> = nodes
                    .keys()
                    .map(|n| n.as_str())
                    .filter(|n| !emitted.contains(n))
                    .collect();
                self.sort_level(&mut residual, &nodes);
                let residual: Vec<String> = residual.iter().map(|n| n.to_string()).collect();
                warn!(
                    "dependency cycle detected among components: {:?}",
                    residual
                );
                levels.push(residual.clone());
                let estimated_time_s = self.estimate_time(&levels, &nodes);
                return Ok(LoadPlan {
                    parallelization_factor: node_count as f64 / levels.len() as f64,
                    estimated_time_s,
                    levels,
                    cycle: residual,
                });
            }

            self.sort_level(&mut level, &nodes);

            for name in &level {
                emitted.insert(*name);
                if let Some(nexts) = dependents.get(name) {
                    for next in nexts {
                        if let Some(degree) = in_degree.get_mut(next) {
                            *degree = degree.saturating_sub(1);
                        }
                    }
                }
            }

            levels.push(level.iter().map(|n| n.to_string()).collect());
        }

        let estimated_time_s = self.estimate_time(&levels, &nodes);
        let parallelization_factor = node_count as f64 / levels.len() as f64;
        debug!(
            "planned {} components in {} levels (factor {:.1})",
            node_count,
            levels.len(),
            parallelization_factor
        );

        Ok(LoadPlan {
            levels,
            cycle: Vec::new(),
            estimated_time_s,
            parallelization_factor,
        })
    }

    /// Requested components plus their transitive dependencies. Any name not
    /// in the registry fails the plan.
    fn collect_closure(&self, requested: &[String]) -> Result<HashMap<String, PlanNode>> {
        let mut nodes: HashMap<String, PlanNode> = HashMap::new();
        let mut stack: Vec<String> = requested.to_vec();

        while let Some(name) = stack.pop() {
            if nodes.contains_key(&name) {
                continue;
            }
            let record = self
                .registry
                .get(&name)
                .ok_or_else(|| StartupError::NotFound(name.clone()))?;
            for dep in &record.metadata.dependencies {
                if !nodes.contains_key(dep) {
                    stack.push(dep.clone());
                }
            }
            nodes.insert(
                name,
                PlanNode {
                    dependencies: record.metadata.dependencies,
                    load_priority: record.metadata.load_priority,
                    resource_requirement_mb: record.metadata.resource_requirement_mb,
                },
            );
        }

        Ok(nodes)
    }

    fn sort_level(&self, level: &mut [&str], nodes: &HashMap<String, PlanNode>) {
        level.sort_by(|a, b| {
            let pa = nodes.get(*a).map(|n| n.load_priority).unwrap_or(i32::MAX);
            let pb = nodes.get(*b).map(|n| n.load_priority).unwrap_or(i32::MAX);
            (pa, *a).cmp(&(pb, *b))
        });
    }

    /// Per level, the heaviest component dominates (levels run in parallel);
    /// floor of half a second per level.
    fn estimate_time(&self, levels: &[Vec<String>], nodes: &HashMap<String, PlanNode>) -> f64 {
        levels
            .iter()
            .map(|level| {
                level
                    .iter()
                    .filter_map(|name| nodes.get(name))
                    .map(|node| node.resource_requirement_mb as f64 / 100.0)
                    .fold(0.0f64, f64::max)
                    .max(0.5)
            })
            .sum()
    }

    /// Human-readable rendering of a plan.
    pub fn format_plan(&self, plan: &LoadPlan) -> String {
        let mut lines = vec![
            format!("Load plan for {} components:", plan.component_count()),
            format!("Estimated time: {:.1}s", plan.estimated_time_s),
            format!(
                "Parallelization factor: {:.1}x",
                plan.parallelization_factor
            ),
            String::new(),
            "Loading sequence:".to_string(),
        ];

        for (i, level) in plan.levels.iter().enumerate() {
            lines.push(format!("  Level {} (parallel):", i + 1));
            for name in level {
                match self.registry.get(name) {
                    Some(record) => {
                        let deps = if record.metadata.dependencies.is_empty() {
                            "none".to_string()
                        } else {
                            record.metadata.dependencies.join(", ")
                        };
                        lines.push(format!(
                            "    - {} ({}MB, deps: {})",
                            name, record.metadata.resource_requirement_mb, deps
                        ));
                    }
                    None => lines.push(format!("    - {name}")),
                }
            }
        }

        if plan.has_cycle() {
            lines.push(String::new());
            lines.push(format!("WARNING: cycle among {:?}", plan.cycle));
        }

        lines.join("\n")
    }
}
