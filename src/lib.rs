//! # Startup Core
//!
//! Startup Core is a smart component auto-loader: it brings a large set of
//! interdependent application subsystems online as fast as possible while
//! respecting host resource limits, user intent, and per-component failures.
//!
//! ## Architecture
//!
//! The engine consists of:
//! - **Component Registry**: catalog plus runtime state for every component
//! - **Resource Monitor**: host CPU/memory sampling and loading budgets
//! - **Intent Detection**: workspace inspection to pick the component set
//! - **Dependency Resolver**: dependency DAG to level-ordered load batches
//! - **Lazy / Parallel Loaders**: cached single loads and bounded-worker
//!   level-parallel loading
//! - **Error Isolation**: per-component fault containment with retry budgets
//! - **Startup Orchestrator**: the phased startup sequence and its report
//! - **Startup Profiler**: post-hoc bottleneck analysis and suggestions
//!
//! ## Usage
//!
//! Hosts build a [`system::StartupSystem`], register components with loader
//! thunks, and call `start`. Individual components can be lazily loaded and
//! unloaded afterwards.

/// Loader engine configuration
pub mod config;
/// System-wide default values
pub mod constants;
/// Error types and handling
pub mod error;
/// Workspace-based intent detection
pub mod intent;
/// Per-component fault containment
pub mod isolation;
/// On-demand single-component loading
pub mod loader;
/// Core data models
pub mod models;
/// Host resource monitoring and budgets
pub mod monitor;
/// Phased startup orchestration
pub mod orchestrator;
/// Dependency-ordered parallel loading
pub mod parallel;
/// Startup performance profiling
pub mod profiler;
/// Component catalog and runtime state
pub mod registry;
/// Dependency graph planning
pub mod resolver;
/// Composition root wiring all subsystems
pub mod system;

#[cfg(test)]
mod tests;

pub use error::{Result, StartupError};
