//! Demonstration of the smart component auto-loader: registers a realistic
//! component catalog with simulated loaders, runs the orchestrated startup,
//! then profiles the run and shows lazy load/unload.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use startup_core::config::LoaderConfig;
use startup_core::models::{
    async_loader_fn, loader_fn, ComponentCategory, ComponentInstance, ComponentMetadata,
    SharedInstance,
};
use startup_core::system::StartupSystem;

/// Stand-in subsystem: holds its name and logs its cleanup.
#[derive(Debug)]
struct Subsystem {
    name: String,
}

impl ComponentInstance for Subsystem {
    fn cleanup(&self) {
        info!("cleaning up subsystem '{}'", self.name);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Simulated loader: initialization time scales with the footprint.
fn simulated(name: &str, mb: u64) -> Arc<dyn startup_core::models::ComponentLoader> {
    let name = name.to_string();
    async_loader_fn(move || {
        let name = name.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10 + mb / 2)).await;
            Ok(Arc::new(Subsystem { name }) as SharedInstance)
        }
    })
}

fn register_catalog(system: &StartupSystem) {
    let registry = &system.registry;

    // Core infrastructure.
    registry.register(
        ComponentMetadata::new("config", ComponentCategory::Core, simulated("config", 1))
            .required()
            .with_resource_mb(1)
            .with_priority(1)
            .with_description("Configuration system"),
    );
    registry.register(
        ComponentMetadata::new("logger", ComponentCategory::Core, simulated("logger", 1))
            .required()
            .with_resource_mb(1)
            .with_priority(1)
            .with_description("Logging system"),
    );
    registry.register(
        ComponentMetadata::new(
            "database",
            ComponentCategory::Storage,
            simulated("database", 10),
        )
        .with_dependencies(&["config", "logger"])
        .required()
        .with_resource_mb(10)
        .with_priority(2)
        .with_description("Database layer"),
    );
    registry.register(
        ComponentMetadata::new(
            "guardian",
            ComponentCategory::Security,
            simulated("guardian", 5),
        )
        .with_dependencies(&["config", "logger"])
        .required()
        .with_resource_mb(5)
        .with_priority(2)
        .with_description("Security and policy enforcement"),
    );

    // Essential UI.
    registry.register(
        ComponentMetadata::new(
            "code_editor",
            ComponentCategory::Ui,
            simulated("code_editor", 20),
        )
        .with_dependencies(&["config"])
        .required()
        .with_resource_mb(20)
        .with_priority(3)
        .with_description("Code editor with syntax highlighting"),
    );
    registry.register(
        ComponentMetadata::new(
            "command_log",
            ComponentCategory::Ui,
            simulated("command_log", 5),
        )
        .with_dependencies(&["logger"])
        .required()
        .with_resource_mb(5)
        .with_priority(3)
        .with_description("Command log panel"),
    );
    registry.register(
        ComponentMetadata::new(
            "agent_control",
            ComponentCategory::Ui,
            simulated("agent_control", 30),
        )
        .with_dependencies(&["config", "database"])
        .required()
        .with_resource_mb(30)
        .with_priority(4)
        .with_description("Agent control panel"),
    );
    registry.register(
        ComponentMetadata::new(
            "agent_monitor",
            ComponentCategory::Ui,
            simulated("agent_monitor", 10),
        )
        .with_dependencies(&["agent_control"])
        .required()
        .with_resource_mb(10)
        .with_priority(4)
        .with_description("Agent monitoring panel"),
    );

    // Optional components, loaded on demand or by intent.
    registry.register(
        ComponentMetadata::new(
            "network",
            ComponentCategory::Network,
            simulated("network", 20),
        )
        .with_dependencies(&["config", "guardian"])
        .with_resource_mb(20)
        .with_priority(5)
        .with_description("Network toolkit"),
    );
    registry.register(
        ComponentMetadata::new(
            "knowledge_graph",
            ComponentCategory::Memory,
            simulated("knowledge_graph", 100),
        )
        .with_dependencies(&["database"])
        .with_resource_mb(100)
        .with_priority(7)
        .with_description("Knowledge graph index"),
    );
    registry.register(
        ComponentMetadata::new(
            "web_search",
            ComponentCategory::Tool,
            simulated("web_search", 10),
        )
        .with_dependencies(&["network"])
        .with_resource_mb(10)
        .with_priority(8)
        .with_description("Web search"),
    );
    registry.register(
        ComponentMetadata::new(
            "sandbox",
            ComponentCategory::Execution,
            simulated("sandbox", 500),
        )
        .with_dependencies(&["guardian"])
        .with_resource_mb(500)
        .with_priority(8)
        .with_description("Sandboxed execution environment"),
    );
    registry.register(
        ComponentMetadata::new(
            "browser",
            ComponentCategory::Tool,
            simulated("browser", 500),
        )
        .with_dependencies(&["network", "guardian"])
        .with_resource_mb(500)
        .with_priority(9)
        .with_precondition(|| false)
        .with_description("Browser automation, only on explicit request"),
    );
    registry.register(
        ComponentMetadata::new(
            "versioning",
            ComponentCategory::Storage,
            simulated("versioning", 20),
        )
        .with_dependencies(&["database"])
        .with_resource_mb(20)
        .with_priority(7)
        .with_description("Version control integration"),
    );
    registry.register(
        ComponentMetadata::new(
            "backup",
            ComponentCategory::Storage,
            simulated("backup", 50),
        )
        .with_dependencies(&["config", "database"])
        .with_resource_mb(50)
        .with_priority(7)
        .with_description("Backup and versioning system"),
    );
    registry.register(
        ComponentMetadata::new(
            "resource_catalog",
            ComponentCategory::Ui,
            simulated("resource_catalog", 10),
        )
        .with_dependencies(&["database"])
        .with_resource_mb(10)
        .with_priority(7)
        .with_description("Resource catalog panel"),
    );
    registry.register(
        ComponentMetadata::new(
            "mcp_bridge",
            ComponentCategory::Integration,
            simulated("mcp_bridge", 30),
        )
        .with_dependencies(&["config", "guardian"])
        .with_resource_mb(30)
        .with_priority(6)
        .with_description("Model Context Protocol bridge"),
    );

    // One deliberately broken component to show fault containment.
    registry.register(
        ComponentMetadata::new(
            "flaky_extension",
            ComponentCategory::Integration,
            loader_fn(|| Err(anyhow::anyhow!("extension manifest is corrupt"))),
        )
        .with_resource_mb(5)
        .with_priority(9)
        .with_description("Third-party extension that refuses to load"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting smart component auto-loader demo");

    let config = LoaderConfig::from_env()?;
    let system = StartupSystem::new(config);
    register_catalog(&system);

    // Show what the resolver would do for the heaviest component.
    let request = vec!["agent_monitor".to_string()];
    println!("{}", system.parallel_loader.format_plan(&request)?);

    // Run the full orchestrated startup.
    let started = std::time::Instant::now();
    let report = system.start(None, &CancellationToken::new()).await;
    let total_ms = started.elapsed().as_secs_f64() * 1000.0;

    // Demonstrate fault containment on the broken component.
    let outcome = system.lazy_loader.load("flaky_extension", false, None).await;
    info!("flaky extension load outcome: {:?}", outcome.err());
    println!("{}", system.isolation.format_error_report());

    // Lazy load something the intent did not pull in, then unload it.
    if !system.registry.is_loaded("web_search") {
        let _ = system.lazy_loader.load("network", false, None).await;
        let _ = system.lazy_loader.load("web_search", false, None).await;
    }
    system.lazy_loader.unload("web_search")?;

    // Profile the run and persist it.
    let profile = system.profiler.build(total_ms);
    println!("{}", system.profiler.format_profile(&profile));
    let path = system.profiler.save(&profile)?;
    info!("profile written to {}", path.display());

    info!(
        "startup {}: {} loaded, {} failed, {} skipped",
        if report.success { "succeeded" } else { "partially succeeded" },
        report.successful.len(),
        report.failed.len(),
        report.skipped.len()
    );

    system.shutdown().await;
    Ok(())
}
