use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::constants::{CPU_SAMPLE_WINDOW_MS, MAX_SNAPSHOTS};

/// Snapshot of host resources at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub memory_available_mb: u64,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_percent: f32,
}

/// Loading recommendation derived from current resource availability.
///
/// `available_mb` is the loading budget (available memory minus the reserve)
/// and may be negative when the host is already below the reserve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub can_load: bool,
    pub reason: String,
    pub available_mb: i64,
    pub required_mb: u64,
    pub recommended: Vec<String>,
    pub skip: Vec<String>,
}

/// Raw memory reading in megabytes.
#[derive(Debug, Clone, Copy)]
pub struct MemoryReading {
    pub total_mb: u64,
    pub available_mb: u64,
    pub used_mb: u64,
}

/// Source of host resource readings
///
/// The system probe reads the kernel counters; tests and headless
/// environments substitute a fixed probe without touching global state.
pub trait ResourceProbe: Send + Sync {
    fn sample_memory(&self) -> MemoryReading;

    /// Sample CPU usage as a percentage. May block for the sampling window
    /// (~100 ms); callers in async contexts should use `spawn_blocking`.
    fn sample_cpu(&self) -> f32;
}

/// Probe backed by the operating system's own counters.
pub struct SystemProbe;

impl ResourceProbe for SystemProbe {
    fn sample_memory(&self) -> MemoryReading {
        #[cfg(target_os = "linux")]
        {
            if let Some(reading) = read_proc_meminfo() {
                return reading;
            }
        }

        // Fallback for unsupported platforms or unreadable counters.
        MemoryReading {
            total_mb: 8192,
            available_mb: 4096,
            used_mb: 4096,
        }
    }

    fn sample_cpu(&self) -> f32 {
        #[cfg(target_os = "linux")]
        {
            if let Some(usage) = sample_proc_stat(Duration::from_millis(CPU_SAMPLE_WINDOW_MS)) {
                return usage;
            }
        }

        // Fallback for unsupported platforms.
        25.0
    }
}

#[cfg(target_os = "linux")]
fn read_proc_meminfo() -> Option<MemoryReading> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let mut mem_total_kb = 0u64;
    let mut mem_available_kb = 0u64;

    for line in meminfo.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => mem_total_kb = parts.next()?.parse().ok()?,
            Some("MemAvailable:") => mem_available_kb = parts.next()?.parse().ok()?,
            _ => {}
        }
    }

    if mem_total_kb == 0 {
        return None;
    }

    let total_mb = mem_total_kb / 1024;
    let available_mb = mem_available_kb / 1024;
    Some(MemoryReading {
        total_mb,
        available_mb,
        used_mb: total_mb.saturating_sub(available_mb),
    })
}

#[cfg(target_os = "linux")]
fn sample_proc_stat(window: Duration) -> Option<f32> {
    fn parse_cpu_line(stat: &str) -> Option<(u64, u64)> {
        let line = stat.lines().next()?;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 || parts[0] != "cpu" {
            return None;
        }
        let user: u64 = parts[1].parse().ok()?;
        let nice: u64 = parts[2].parse().ok()?;
        let system: u64 = parts[3].parse().ok()?;
        let idle: u64 = parts[4].parse().ok()?;
        let busy = user + nice + system;
        Some((busy, busy + idle))
    }

    let stat1 = std::fs::read_to_string("/proc/stat").ok()?;
    std::thread::sleep(window);
    let stat2 = std::fs::read_to_string("/proc/stat").ok()?;

    let (busy1, total1) = parse_cpu_line(&stat1)?;
    let (busy2, total2) = parse_cpu_line(&stat2)?;

    let busy_delta = busy2.saturating_sub(busy1);
    let total_delta = total2.saturating_sub(total1);
    if total_delta == 0 {
        return None;
    }

    Some((busy_delta as f32 / total_delta as f32) * 100.0)
}

/// Probe returning fixed readings, for tests and constrained environments.
pub struct FixedProbe {
    pub total_mb: u64,
    pub available_mb: u64,
    pub cpu_percent: f32,
}

impl ResourceProbe for FixedProbe {
    fn sample_memory(&self) -> MemoryReading {
        MemoryReading {
            total_mb: self.total_mb,
            available_mb: self.available_mb,
            used_mb: self.total_mb.saturating_sub(self.available_mb),
        }
    }

    fn sample_cpu(&self) -> f32 {
        self.cpu_percent
    }
}

struct SamplerHandle {
    handle: JoinHandle<()>,
    shutdown: mpsc::Sender<()>,
}

/// Memory instantaneously, CPU over the sampling window. Blocks briefly.
fn take_snapshot(probe: &dyn ResourceProbe) -> ResourceSnapshot {
    let memory = probe.sample_memory();
    let cpu_percent = probe.sample_cpu();

    let memory_percent = if memory.total_mb > 0 {
        (memory.used_mb as f32 / memory.total_mb as f32) * 100.0
    } else {
        0.0
    };

    ResourceSnapshot {
        timestamp: Utc::now(),
        cpu_percent,
        memory_available_mb: memory.available_mb,
        memory_used_mb: memory.used_mb,
        memory_total_mb: memory.total_mb,
        memory_percent,
    }
}

/// Monitor host CPU and memory to keep component loading within budget
///
/// Synchronous snapshots answer affordability questions; an optional
/// background sampler feeds a bounded ring buffer and logs warnings when
/// resources run low. Sampling never blocks component loading.
pub struct ResourceMonitor {
    min_reserve_mb: u64,
    max_cpu_percent: f32,
    probe: Arc<dyn ResourceProbe>,
    snapshots: Arc<Mutex<VecDeque<ResourceSnapshot>>>,
    sampler: AsyncMutex<Option<SamplerHandle>>,
}

/// Cloneable view handed to the background sampler task.
#[derive(Clone)]
struct SamplerShared {
    min_reserve_mb: u64,
    max_cpu_percent: f32,
    probe: Arc<dyn ResourceProbe>,
    snapshots: Arc<Mutex<VecDeque<ResourceSnapshot>>>,
}

impl SamplerShared {
    fn record(&self, snapshot: ResourceSnapshot) {
        if snapshot.memory_available_mb < self.min_reserve_mb * 2 {
            warn!(
                "low memory: {}MB available ({:.1}% used)",
                snapshot.memory_available_mb, snapshot.memory_percent
            );
        }
        if snapshot.cpu_percent > self.max_cpu_percent {
            warn!("high CPU usage: {:.1}%", snapshot.cpu_percent);
        }

        let mut snapshots = self.snapshots.lock();
        snapshots.push_back(snapshot);
        while snapshots.len() > MAX_SNAPSHOTS {
            snapshots.pop_front();
        }
    }
}

impl ResourceMonitor {
    pub fn new(min_reserve_mb: u64, max_cpu_percent: f32) -> Self {
        Self::with_probe(Arc::new(SystemProbe), min_reserve_mb, max_cpu_percent)
    }

    pub fn with_probe(
        probe: Arc<dyn ResourceProbe>,
        min_reserve_mb: u64,
        max_cpu_percent: f32,
    ) -> Self {
        Self {
            min_reserve_mb,
            max_cpu_percent,
            probe,
            snapshots: Arc::new(Mutex::new(VecDeque::new())),
            sampler: AsyncMutex::new(None),
        }
    }

    pub fn min_reserve_mb(&self) -> u64 {
        self.min_reserve_mb
    }

    /// Take a snapshot of current resources. Memory is read instantaneously;
    /// CPU usage is sampled over a ~100 ms window, so this call blocks
    /// briefly. Avoid calling it in tight loops.
    pub fn snapshot(&self) -> ResourceSnapshot {
        take_snapshot(self.probe.as_ref())
    }

    /// Available memory in MB, read instantaneously.
    pub fn available_mb(&self) -> u64 {
        self.probe.sample_memory().available_mb
    }

    /// Current CPU usage. Blocks for the sampling window.
    pub fn cpu_percent(&self) -> f32 {
        self.probe.sample_cpu()
    }

    /// Whether the host can afford loading `required_mb` more memory while
    /// keeping the configured reserve free and the CPU under its ceiling.
    pub fn affordable(&self, required_mb: u64) -> bool {
        let available = self.available_mb();
        if available < required_mb + self.min_reserve_mb {
            return false;
        }
        if self.probe.sample_cpu() > self.max_cpu_percent {
            return false;
        }
        true
    }

    /// Recommend which of the given components fit the current budget.
    ///
    /// The budget is available memory minus the reserve. When everything
    /// fits, all components are recommended. Otherwise components are
    /// admitted greedily smallest-first (ties broken by name) to maximize
    /// the number admitted; the rest are skipped.
    pub fn recommend(
        &self,
        components: &[String],
        requirements: &HashMap<String, u64>,
    ) -> Recommendation {
        let memory = self.probe.sample_memory();
        let budget = memory.available_mb as i64 - self.min_reserve_mb as i64;
        let requirement_of = |name: &String| *requirements.get(name).unwrap_or(&0);
        let total_required: u64 = components.iter().map(requirement_of).sum();

        if budget <= 0 {
            return Recommendation {
                can_load: false,
                reason: format!(
                    "available memory ({}MB) is at or below the {}MB reserve",
                    memory.available_mb, self.min_reserve_mb
                ),
                available_mb: budget,
                required_mb: total_required,
                recommended: Vec::new(),
                skip: components.to_vec(),
            };
        }

        if total_required as i64 <= budget {
            return Recommendation {
                can_load: true,
                reason: "sufficient resources available".to_string(),
                available_mb: budget,
                required_mb: total_required,
                recommended: components.to_vec(),
                skip: Vec::new(),
            };
        }

        let mut sorted: Vec<String> = components.to_vec();
        sorted.sort_by(|a, b| (requirement_of(a), a).cmp(&(requirement_of(b), b)));

        let mut recommended = Vec::new();
        let mut skip = Vec::new();
        let mut used: i64 = 0;

        for name in sorted {
            let requirement = requirement_of(&name) as i64;
            if used + requirement <= budget {
                used += requirement;
                recommended.push(name);
            } else {
                skip.push(name);
            }
        }

        Recommendation {
            can_load: !recommended.is_empty(),
            reason: format!(
                "limited resources: {budget}MB available, {total_required}MB required"
            ),
            available_mb: budget,
            required_mb: total_required,
            recommended,
            skip,
        }
    }

    /// Start the background sampler. No-op if already running.
    pub async fn start_monitoring(&self, interval: Duration) {
        let mut sampler = self.sampler.lock().await;
        if sampler.is_some() {
            debug!("resource monitoring already running");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let shared = SamplerShared {
            min_reserve_mb: self.min_reserve_mb,
            max_cpu_percent: self.max_cpu_percent,
            probe: Arc::clone(&self.probe),
            snapshots: Arc::clone(&self.snapshots),
        };

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sampling = shared.clone();
                        match tokio::task::spawn_blocking(move || {
                            take_snapshot(sampling.probe.as_ref())
                        })
                        .await
                        {
                            Ok(snapshot) => shared.record(snapshot),
                            Err(e) => error!("resource sampling task failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("resource monitoring shutting down");
                        break;
                    }
                }
            }
        });

        *sampler = Some(SamplerHandle {
            handle,
            shutdown: shutdown_tx,
        });
        info!(
            "resource monitoring started with {}s interval",
            interval.as_secs_f32()
        );
    }

    /// Stop the background sampler and wait for it to exit.
    pub async fn stop_monitoring(&self) {
        let handle = self.sampler.lock().await.take();
        if let Some(sampler) = handle {
            let _ = sampler.shutdown.send(()).await;
            if let Err(e) = sampler.handle.await {
                warn!("error waiting for resource sampler to stop: {}", e);
            }
            info!("resource monitoring stopped");
        }
    }

    /// Recorded snapshots, most recent last. `last_n` limits the result to
    /// the trailing n entries.
    pub fn snapshots(&self, last_n: Option<usize>) -> Vec<ResourceSnapshot> {
        let snapshots = self.snapshots.lock();
        match last_n {
            Some(n) => snapshots
                .iter()
                .skip(snapshots.len().saturating_sub(n))
                .cloned()
                .collect(),
            None => snapshots.iter().cloned().collect(),
        }
    }

    /// Average (cpu_percent, memory_percent) over the last n snapshots.
    pub fn average_usage(&self, last_n: usize) -> (f32, f32) {
        let snapshots = self.snapshots(Some(last_n));
        if snapshots.is_empty() {
            return (0.0, 0.0);
        }
        let count = snapshots.len() as f32;
        let cpu: f32 = snapshots.iter().map(|s| s.cpu_percent).sum();
        let memory: f32 = snapshots.iter().map(|s| s.memory_percent).sum();
        (cpu / count, memory / count)
    }

    /// Human-readable rendering of a recommendation.
    pub fn format_recommendation(recommendation: &Recommendation) -> String {
        let mut lines = vec![
            format!("Available budget: {}MB", recommendation.available_mb),
            format!("Required: {}MB", recommendation.required_mb),
            String::new(),
            "Recommended components:".to_string(),
        ];

        for name in &recommendation.recommended {
            lines.push(format!("  + {name}"));
        }

        if !recommendation.skip.is_empty() {
            lines.push(String::new());
            lines.push("Skipped (insufficient resources):".to_string());
            for name in &recommendation.skip {
                lines.push(format!("  - {name}"));
            }
        }

        lines.join("\n")
    }
}
