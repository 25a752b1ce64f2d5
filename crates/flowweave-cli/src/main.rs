mod config;
mod interactive;

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use flowweave_core::{Diagram, FallbackPolicy};
use flowweave_llm::LlmClient;
use flowweave_llm::pipeline::FlowPipeline;

use config::{CliOverrides, DEFAULT_CONFIG_FILE, FlowweaveConfig, load_config};
use interactive::Console;

#[derive(Parser)]
#[command(name = "flowweave", about = "Turn process descriptions into flowcharts")]
struct Cli {
    /// Path to config file (default: ./flowweave.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model name (overrides FLOWWEAVE_MODEL and the config file)
    #[arg(long, global = true)]
    model: Option<String>,

    /// API base URL (overrides FLOWWEAVE_BASE_URL and the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Describe a process, answer clarifying questions, get a flowchart
    Generate {
        /// Process description (omit to enter descriptions interactively)
        description: Option<String>,
    },
    /// Ask a question about an existing flowchart
    Ask {
        /// File containing the flowchart text
        #[arg(long)]
        diagram: PathBuf,
        /// The question
        question: String,
    },
    /// Clean up flowchart text without calling the model
    Sanitize {
        /// Input file (default: stdin)
        file: Option<PathBuf>,
        /// Accept a diagram without edges if it declares a direction and nodes
        #[arg(long)]
        lenient: bool,
    },
}

fn log_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Library/Logs/Flowweave")
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("logs")
    }
}

/// Console layer on stderr (`RUST_LOG`, default `info`) plus a JSON file
/// layer at `trace`. Keep the guard alive for the life of the process.
fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = log_dir();
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
        .rotation(tracing_appender::rolling::Rotation::DAILY)
        .filename_prefix("flowweave")
        .filename_suffix("txt")
        .build(&log_dir)
        .context("failed to create log file appender")?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_filter = EnvFilter::new("trace");

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(
            fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_filter(file_filter),
        )
        .init();

    Ok(guard)
}

fn resolve_config(cli: &Cli) -> Result<FlowweaveConfig> {
    let (path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let file = load_config(&path, required)?;
    let overrides = CliOverrides {
        model: cli.model.clone(),
        base_url: cli.base_url.clone(),
    };
    Ok(FlowweaveConfig::resolve(&overrides, file, |key| {
        std::env::var(key).ok()
    }))
}

fn read_input(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging()?;

    match &cli.command {
        Commands::Sanitize { file, lenient } => {
            let raw = read_input(file.as_ref())?;
            let policy = if *lenient {
                FallbackPolicy::Lenient
            } else {
                FallbackPolicy::Strict
            };
            let diagram = Diagram::from_model_text(raw, policy)?;
            println!("{}", diagram);
        }
        Commands::Ask { diagram, question } => {
            let config = resolve_config(&cli)?;
            let raw = read_input(Some(diagram))?;
            let diagram = Diagram::from_model_text(raw, config.pipeline.generate.fallback)?;
            let pipeline = FlowPipeline::new(LlmClient::new(config.llm)?, config.pipeline);
            let answer = pipeline.ask(&diagram, question).await?;
            println!("{}", answer);
        }
        Commands::Generate { description } => {
            let config = resolve_config(&cli)?;
            info!(model = %config.llm.model, "Starting flowweave");
            let pipeline = Arc::new(FlowPipeline::new(
                LlmClient::new(config.llm)?,
                config.pipeline,
            ));
            let mut console = Console::new(tokio::io::BufReader::new(tokio::io::stdin()));
            interactive::run(&mut console, pipeline, description.clone()).await?;
        }
    }

    Ok(())
}
