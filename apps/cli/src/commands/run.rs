//! Run command implementation.

use crate::commands::types::RunArgs;
use crate::config::{self, ResolvedConfig};
use anyhow::{Context, Result};
use colored::Colorize;
use kiln_exec::EnvironmentFactory;
use kiln_pipeline::{
    CheckpointRef, CommandBuilder, NullProgressSink, PLACEHOLDER_CHECKPOINT, Pipeline, PipelineReport,
    ProgressSink, StdoutProgressSink,
};
use serde_json::json;

pub async fn execute(args: RunArgs) -> Result<()> {
    let RunArgs { environment, overrides, dry_run, json: json_output } = args;
    let resolved = config::resolve(&environment, &overrides.into_overrides())?;

    if dry_run {
        return print_plan(resolved, json_output);
    }

    let env = EnvironmentFactory::create(&resolved.environment);
    let progress: Box<dyn ProgressSink> =
        if json_output { Box::new(NullProgressSink) } else { Box::new(StdoutProgressSink) };

    let mut pipeline = Pipeline::new(env.as_ref(), resolved.pipeline, resolved.toolchain, progress.as_ref());
    let run_id = pipeline.run_id().clone();
    let report = pipeline.run().await.with_context(|| format!("Pipeline run {run_id} failed"))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_plan(resolved: ResolvedConfig, json_output: bool) -> Result<()> {
    let environment = resolved.environment.display_name();
    let builder = CommandBuilder::new(resolved.pipeline, resolved.toolchain);
    let plan = builder.plan(&CheckpointRef::new(PLACEHOLDER_CHECKPOINT));

    if json_output {
        let out = json!({
            "environment": environment,
            "output_dir": builder.layout().root(),
            "invocations": plan,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Kiln Pipeline Plan (dry run)".bold().cyan());
    println!();
    println!("  Environment: {}", environment.green());
    println!("  Output:      {}", builder.layout().root().dimmed());
    if !builder.config().quantization.is_enabled() {
        println!("  Quantization: {}", "disabled".yellow());
    }
    println!();
    for (idx, invocation) in plan.iter().enumerate() {
        println!("  {}. {}", idx + 1, invocation.stage.to_string().bold());
        println!("     {}", invocation.command.to_shell_string().dimmed());
    }
    println!();
    Ok(())
}

fn print_report(report: &PipelineReport) {
    let elapsed = report.finished_at - report.started_at;

    println!();
    println!("{} Pipeline {} finished in {}s", "✓".green(), report.run_id.to_string().cyan(), elapsed.num_seconds());
    println!();
    println!("  Checkpoint:   {}", report.checkpoint.as_str().dimmed());
    println!("  Merged model: {}", report.merged_model.dimmed());
    println!("  Converted:    {}", report.converted_file.dimmed());
    match report.quantized_file {
        Some(ref file) => println!("  Quantized:    {}", file.dimmed()),
        None => println!("  Quantized:    {}", "skipped".yellow()),
    }
    for descriptor in &report.descriptors {
        println!("  Descriptor:   {} ({})", descriptor.path.dimmed(), descriptor.line);
    }
    println!();
}
