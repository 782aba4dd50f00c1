//! recon - reconnaissance pipeline runner.
//!
//! Usage:
//!   recon run <task> --target-file <ports.json> --results-dir <dir>   Complete a task and its ancestors
//!   recon plan <task> --target-file <ports.json> --results-dir <dir>  Show the chain and what is already complete
//!   recon validate --config <recon.yaml>                               Validate a configuration file

use clap::{Args, Parser, Subcommand};
use recon::{
    EngineBuilder, Event, EventBus, EventHandler, PipelineError, PipelineParams, ReconConfig,
    YamlLoader, recon::resolve_named,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// recon - dependency-chained reconnaissance pipeline
#[derive(Parser)]
#[command(name = "recon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Complete a task, running whatever part of its chain is missing
    Run(PipelineArgs),

    /// Show a task's chain and the completion state of each link
    Plan(PipelineArgs),

    /// Validate a configuration file without running anything
    Validate {
        /// Path to recon.yaml
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct PipelineArgs {
    /// Task to complete: targets, nmap or searchsploit
    #[arg(value_name = "TASK")]
    task: String,

    /// Port mapping produced by port discovery
    #[arg(long, value_name = "FILE")]
    target_file: PathBuf,

    /// Directory the <task>-results folders are created under
    #[arg(long, value_name = "DIR")]
    results_dir: Option<PathBuf>,

    /// Target store location (default: <results-dir>/recon.sqlite)
    #[arg(long, value_name = "FILE")]
    db_location: Option<PathBuf>,

    /// Concurrent tool invocations
    #[arg(long)]
    threads: Option<String>,

    /// Path to recon.yaml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl PipelineArgs {
    /// Merge flags over the configuration file.
    fn resolve(&self) -> Result<(ReconConfig, PipelineParams), Box<dyn std::error::Error>> {
        let config = match &self.config {
            Some(path) => YamlLoader::load_config(path)?,
            None => ReconConfig::default(),
        };

        let results_dir = self
            .results_dir
            .clone()
            .or_else(|| config.results_dir.clone())
            .ok_or("--results-dir is required (or set results_dir in the config file)")?;
        let db_location = self
            .db_location
            .clone()
            .or_else(|| config.db_location.clone())
            .unwrap_or_else(|| results_dir.join("recon.sqlite"));

        let mut params = PipelineParams::new(&self.target_file, results_dir, db_location);
        if let Some(threads) = self.threads.clone() {
            params = params.with_threads(threads);
        } else if let Some(threads) = config.threads {
            params = params.with_threads(threads.to_string());
        }
        Ok((config, params))
    }
}

/// Logs lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::InstanceStarted { kind, instance, .. } => {
                info!("Task '{}' started ({})", kind, instance);
            }
            Event::InstanceSkipped { kind, .. } => {
                info!("Task '{}' already complete", kind);
            }
            Event::InstanceCompleted { kind, duration, .. } => {
                info!("Task '{}' completed in {:?}", kind, duration);
            }
            Event::InstanceFailed { kind, error, .. } => {
                error!("Task '{}' failed: {}", kind, error);
            }
            Event::InvocationFinished {
                label,
                exit_code,
                success,
                ..
            } => {
                if *success {
                    info!("  Invocation '{}' finished", label);
                } else {
                    let exit_info = exit_code
                        .map(|c| format!("exit {}", c))
                        .unwrap_or_else(|| "did not exit".to_string());
                    warn!("  Invocation '{}' failed ({})", label, exit_info);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match cli.command {
        Commands::Run(args) => run_task(args).await?,
        Commands::Plan(args) => plan_task(args).await?,
        Commands::Validate { config } => validate_config(config)?,
    }

    Ok(())
}

/// Complete the requested task.
async fn run_task(args: PipelineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config, params) = args.resolve()?;
    let leaf = resolve_named(&args.task, &params)?;

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let engine = EngineBuilder::new(config)
        .db_location(&params.db_location)
        .events(event_bus)
        .build()?;

    info!(
        "Running '{}' with results in {}",
        leaf.kind(),
        params.results_dir.display()
    );
    match engine.ensure_complete(leaf).await {
        Ok(report) => {
            info!(
                "Done: {} task(s) ran, {} already complete (run: {})",
                report.executed(),
                report.instances.len() - report.executed(),
                report.run_id
            );
            if let Some(output) = report.output() {
                info!("Output: {:?}", output.artifact);
            }
            Ok(())
        }
        Err(e) => {
            if let PipelineError::InstanceFailed { skipped, .. } = &e {
                for instance in skipped {
                    warn!("  Not attempted: {}", instance);
                }
            }
            error!("Pipeline failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the chain and its completion state.
async fn plan_task(args: PipelineArgs) -> Result<(), Box<dyn std::error::Error>> {
    let (config, params) = args.resolve()?;
    let leaf = resolve_named(&args.task, &params)?;

    let engine = EngineBuilder::new(config)
        .db_location(&params.db_location)
        .build()?;

    for (step, entry) in engine.plan(leaf).await?.iter().enumerate() {
        let state = if entry.complete { "complete" } else { "pending" };
        println!(
            "{}. {:<13} {:<9} [{}] {}",
            step + 1,
            entry.kind.as_str(),
            state,
            entry.completion,
            entry.instance
        );
    }
    Ok(())
}

/// Validate a configuration file.
fn validate_config(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", path.display());

    match YamlLoader::load_config(&path) {
        Ok(config) => {
            info!("Configuration is valid:");
            info!("  storage: {:?}", config.storage);
            info!("  malformed lines: {:?}", config.malformed_lines);
            info!("  tools: nmap={}, searchsploit={}", config.tools.nmap, config.tools.searchsploit);
            for (kind, strategy) in &config.completion {
                info!("  completion override: {} -> {}", kind, strategy);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}
