//! Check command implementation.
//!
//! Verifies the execution environment is up before a run.

use crate::commands::types::EnvironmentArgs;
use crate::config;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use kiln_exec::EnvironmentFactory;
use kiln_pipeline::PipelineOverrides;

pub async fn execute(args: EnvironmentArgs) -> Result<()> {
    let resolved = config::resolve(&args, &PipelineOverrides::default())?;
    let env = EnvironmentFactory::create(&resolved.environment);

    let running = env
        .is_running()
        .await
        .with_context(|| format!("Failed to query environment {}", env.name()))?;
    if !running {
        bail!("Environment {} is not running", env.name());
    }

    println!("{} Environment {} is running", "✓".green(), env.name().cyan());
    Ok(())
}
