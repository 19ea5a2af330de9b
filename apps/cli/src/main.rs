//! Kiln CLI - Command-line interface for the Kiln fine-tuning pipeline
//!
//! This CLI provides a `kiln` command that trains, merges, converts and
//! quantizes a model inside an already-running execution environment.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{DatasetCommand, EnvironmentArgs, RunArgs, check, dataset, run};

/// Kiln CLI - LoRA fine-tuning to a quantized, servable model
#[derive(Parser, Debug)]
#[command(
    name = "kiln",
    author,
    version,
    about = "Kiln - fine-tune, merge, convert and quantize in one pipeline",
    long_about = "Kiln drives an external training toolchain inside a running container.\nEach stage runs once, in order, and the first failure stops the pipeline."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline
    ///
    /// Trains a LoRA adapter, merges it into the base model, converts the
    /// merged model, optionally quantizes it and writes the model descriptor
    /// files.
    Run(RunArgs),

    /// Check that the execution environment is running
    Check(EnvironmentArgs),

    /// Dataset preparation
    #[command(subcommand)]
    Dataset(DatasetCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout is reserved for command output.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Run(run_args) => run::execute(run_args).await?,
        Command::Check(env_args) => check::execute(env_args).await?,
        Command::Dataset(cmd) => dataset::execute(cmd).await?,
    }

    Ok(())
}
