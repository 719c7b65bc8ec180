use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::LoaderConfig;
use crate::intent::{IntentDetector, UserIntent};
use crate::isolation::ErrorIsolation;
use crate::loader::ProgressObserver;
use crate::models::LoadProgress;
use crate::monitor::ResourceMonitor;
use crate::parallel::ParallelLoader;
use crate::registry::ComponentRegistry;

/// One phase of the startup sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupPhase {
    pub name: String,
    pub components: Vec<String>,
    pub duration_ms: f64,
    pub success: bool,
}

/// Result of a full startup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupReport {
    pub total_duration_ms: f64,
    pub phases: Vec<StartupPhase>,
    pub successful: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    pub success: bool,
}

/// Drive the full startup sequence
///
/// Phases run in order: start resource monitoring, detect intent, load the
/// essential components, load the intent's recommended components subject to
/// the resource budget, then finalize. Per-component failures are contained
/// and recorded; the sequence always runs to completion unless cancelled
/// between phases.
pub struct StartupOrchestrator {
    config: LoaderConfig,
    registry: Arc<ComponentRegistry>,
    monitor: Arc<ResourceMonitor>,
    intent: Arc<IntentDetector>,
    isolation: Arc<ErrorIsolation>,
    parallel_loader: Arc<ParallelLoader>,
}

impl StartupOrchestrator {
    pub fn new(
        config: LoaderConfig,
        registry: Arc<ComponentRegistry>,
        monitor: Arc<ResourceMonitor>,
        intent: Arc<IntentDetector>,
        isolation: Arc<ErrorIsolation>,
        parallel_loader: Arc<ParallelLoader>,
    ) -> Self {
        Self {
            config,
            registry,
            monitor,
            intent,
            isolation,
            parallel_loader,
        }
    }

    /// Execute the startup sequence and report what happened.
    ///
    /// The progress callback receives phase-level events under the phase
    /// name and per-component events under "phase: component". Cancellation
    /// is honored between phases and between levels within a loading phase;
    /// in-flight loads are drained, never interrupted.
    pub async fn start(
        &self,
        progress: Option<ProgressObserver>,
        cancel: &CancellationToken,
    ) -> StartupReport {
        info!("{}", "=".repeat(60));
        info!("Starting smart component auto-loading");
        info!("{}", "=".repeat(60));

        let started = Instant::now();
        let mut phases: Vec<StartupPhase> = Vec::new();
        let mut successful: BTreeSet<String> = BTreeSet::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        let mut skipped: BTreeSet<String> = BTreeSet::new();

        'sequence: {
            // Phase 1: background resource sampling.
            phases.push(self.phase_start_monitoring(&progress).await);
            if cancel.is_cancelled() {
                break 'sequence;
            }

            // Phase 2: classify the session.
            let (phase, intent) = self.phase_detect_intent(&progress).await;
            phases.push(phase);
            if cancel.is_cancelled() {
                break 'sequence;
            }

            // Phase 3: essentials load unconditionally.
            let essentials = self.intent.essential();
            let phase = self
                .run_load_phase(
                    "Load Essentials",
                    &essentials,
                    cancel,
                    &progress,
                    &mut successful,
                    &mut failed,
                    &mut skipped,
                )
                .await;
            phases.push(phase);
            if cancel.is_cancelled() {
                break 'sequence;
            }

            // Phase 4: recommended components, subject to the memory budget.
            let recommended: Vec<String> = intent
                .required
                .iter()
                .chain(intent.optional.iter())
                .filter(|name| !self.registry.is_loaded(name.as_str()))
                .cloned()
                .collect();

            if !recommended.is_empty() {
                let requirements: HashMap<String, u64> = recommended
                    .iter()
                    .filter_map(|name| self.registry.get(name))
                    .map(|record| {
                        (
                            record.metadata.name.clone(),
                            record.metadata.resource_requirement_mb,
                        )
                    })
                    .collect();

                let monitor = Arc::clone(&self.monitor);
                let candidates = recommended.clone();
                let reqs = requirements.clone();
                let recommendation = tokio::task::spawn_blocking(move || {
                    monitor.recommend(&candidates, &reqs)
                })
                .await
                .unwrap_or_else(|e| {
                    error!("resource recommendation task failed: {}", e);
                    crate::monitor::Recommendation {
                        can_load: true,
                        reason: "resource check unavailable".to_string(),
                        available_mb: 0,
                        required_mb: 0,
                        recommended: recommended.clone(),
                        skip: Vec::new(),
                    }
                });

                if !recommendation.skip.is_empty() {
                    warn!(
                        "skipping {} components due to resource constraints",
                        recommendation.skip.len()
                    );
                    for name in &recommendation.skip {
                        warn!("  - {}", name);
                    }
                    skipped.extend(recommendation.skip.iter().cloned());
                }

                let phase = self
                    .run_load_phase(
                        "Load Recommended",
                        &recommendation.recommended,
                        cancel,
                        &progress,
                        &mut successful,
                        &mut failed,
                        &mut skipped,
                    )
                    .await;
                phases.push(phase);
                if cancel.is_cancelled() {
                    break 'sequence;
                }
            }

            // Phase 5: summary only.
            phases.push(self.phase_finalize(&progress));
        }

        let cancelled = cancel.is_cancelled();
        if cancelled {
            warn!("startup cancelled; remaining phases skipped");
        }

        let success = !cancelled && failed.is_empty();
        let report = StartupReport {
            total_duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            phases,
            successful: successful.into_iter().collect(),
            failed: failed.into_iter().collect(),
            skipped: skipped.into_iter().collect(),
            success,
        };

        self.log_report(&report);
        report
    }

    async fn phase_start_monitoring(&self, progress: &Option<ProgressObserver>) -> StartupPhase {
        let phase_name = "Resource Monitoring";
        info!("Phase 1: {}", phase_name);
        notify(progress, phase_name, LoadProgress::Running(0));

        let started = Instant::now();
        self.monitor
            .start_monitoring(self.config.sampler_interval)
            .await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        notify(progress, phase_name, LoadProgress::Succeeded);
        StartupPhase {
            name: phase_name.to_string(),
            components: Vec::new(),
            duration_ms,
            success: true,
        }
    }

    async fn phase_detect_intent(
        &self,
        progress: &Option<ProgressObserver>,
    ) -> (StartupPhase, UserIntent) {
        let phase_name = "Intent Detection";
        info!("Phase 2: {}", phase_name);
        notify(progress, phase_name, LoadProgress::Running(0));

        let started = Instant::now();
        let detector = Arc::clone(&self.intent);
        let intent = tokio::task::spawn_blocking(move || detector.detect())
            .await
            .unwrap_or_else(|e| {
                error!("intent detection task failed: {}", e);
                IntentDetector::new(".").detect()
            });
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        info!(
            "Detected intent: {:?} (confidence: {:.0}%)",
            intent.kind,
            intent.confidence * 100.0
        );
        info!("Description: {}", intent.description);

        notify(progress, phase_name, LoadProgress::Succeeded);
        (
            StartupPhase {
                name: phase_name.to_string(),
                components: Vec::new(),
                duration_ms,
                success: true,
            },
            intent,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_load_phase(
        &self,
        phase_name: &str,
        components: &[String],
        cancel: &CancellationToken,
        progress: &Option<ProgressObserver>,
        successful: &mut BTreeSet<String>,
        failed: &mut BTreeSet<String>,
        skipped: &mut BTreeSet<String>,
    ) -> StartupPhase {
        info!("Phase: {} ({} components)", phase_name, components.len());
        notify(progress, phase_name, LoadProgress::Running(0));

        let started = Instant::now();

        // Forward component progress under "phase: component".
        let component_progress: Option<ProgressObserver> = progress.as_ref().map(|observer| {
            let observer = Arc::clone(observer);
            let prefix = phase_name.to_string();
            Arc::new(move |name: &str, p: LoadProgress| {
                observer(&format!("{prefix}: {name}"), p);
            }) as ProgressObserver
        });

        let expected: Vec<String> = match self.parallel_loader.plan(components) {
            Ok(plan) => plan.components(),
            Err(_) => components.to_vec(),
        };

        let results = self
            .parallel_loader
            .load_many(components, cancel, component_progress)
            .await;

        for (name, result) in &results {
            match result {
                Ok(_) => {
                    successful.insert(name.clone());
                }
                Err(err) => {
                    failed.insert(name.clone());
                    error!("  {} failed ({}): {}", name, err.kind(), err);
                }
            }
        }

        // Components planned but never attempted were cancelled away.
        let mut abandoned = false;
        for name in &expected {
            if !results.contains_key(name) {
                skipped.insert(name.clone());
                abandoned = true;
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let success = !abandoned && results.values().all(|r| r.is_ok());
        let mut attempted: Vec<String> = results.keys().cloned().collect();
        attempted.sort();

        notify(
            progress,
            phase_name,
            if success {
                LoadProgress::Succeeded
            } else {
                LoadProgress::Failed
            },
        );

        StartupPhase {
            name: phase_name.to_string(),
            components: attempted,
            duration_ms,
            success,
        }
    }

    fn phase_finalize(&self, progress: &Option<ProgressObserver>) -> StartupPhase {
        let phase_name = "Finalize";
        info!("Phase: {}", phase_name);
        notify(progress, phase_name, LoadProgress::Running(0));

        let started = Instant::now();
        let all = self.registry.all();
        let loaded = all
            .iter()
            .filter(|record| record.state.status == crate::models::ComponentStatus::Loaded)
            .count();
        info!("Startup complete: {}/{} components loaded", loaded, all.len());
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        notify(progress, phase_name, LoadProgress::Succeeded);
        StartupPhase {
            name: phase_name.to_string(),
            components: Vec::new(),
            duration_ms,
            success: true,
        }
    }

    fn log_report(&self, report: &StartupReport) {
        info!("{}", "=".repeat(60));
        info!("Startup report");
        info!("{}", "=".repeat(60));
        info!(
            "Total duration: {:.1}ms ({:.2}s)",
            report.total_duration_ms,
            report.total_duration_ms / 1000.0
        );
        info!(
            "Status: {}",
            if report.success {
                "SUCCESS"
            } else {
                "PARTIAL SUCCESS"
            }
        );

        info!("Phases:");
        for (i, phase) in report.phases.iter().enumerate() {
            let status = if phase.success { "ok" } else { "FAILED" };
            info!(
                "  {}. [{}] {}: {:.1}ms",
                i + 1,
                status,
                phase.name,
                phase.duration_ms
            );
            if !phase.components.is_empty() {
                info!("     components: {}", phase.components.len());
            }
        }

        info!("Successful components ({}):", report.successful.len());
        for name in &report.successful {
            info!("  + {}", name);
        }

        if !report.failed.is_empty() {
            info!("Failed components ({}):", report.failed.len());
            for name in &report.failed {
                let message = self
                    .isolation
                    .error(name)
                    .map(|f| f.message)
                    .unwrap_or_else(|| "unknown error".to_string());
                error!("  x {}: {}", name, message);
            }
        }

        if !report.skipped.is_empty() {
            info!("Skipped components ({}):", report.skipped.len());
            for name in &report.skipped {
                info!("  - {}", name);
            }
        }

        info!("{}", "=".repeat(60));
    }
}

fn notify(progress: &Option<ProgressObserver>, phase: &str, event: LoadProgress) {
    if let Some(observer) = progress {
        observer(phase, event);
    }
}
