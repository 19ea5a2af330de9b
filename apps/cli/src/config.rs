//! CLI configuration loading and merging.

use crate::commands::types::EnvironmentArgs;
use anyhow::{Context, Result, bail};
use kiln_exec::{EnvironmentConfig, EnvironmentKind};
use kiln_pipeline::{ConfigFile, PipelineConfig, PipelineOverrides, Toolchain};

/// Everything one invocation of the CLI needs.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub pipeline: PipelineConfig,
    pub environment: EnvironmentConfig,
    pub toolchain: Toolchain,
}

/// Load and merge configuration.
///
/// Configuration precedence:
/// 1. CLI arguments
/// 2. Explicit `--config` file
/// 3. Local config file (./kiln.toml)
/// 4. Global config file (~/.kiln/config.toml)
/// 5. Defaults
pub fn resolve(args: &EnvironmentArgs, overrides: &PipelineOverrides) -> Result<ResolvedConfig> {
    let file = ConfigFile::discover_and_load(args.config.as_deref()).context("Failed to load configuration")?;
    resolve_with(file, args, overrides)
}

fn resolve_with(file: ConfigFile, args: &EnvironmentArgs, overrides: &PipelineOverrides) -> Result<ResolvedConfig> {
    let mut merged = file.pipeline;
    merged.merge(overrides);

    let mut environment = file.environment.unwrap_or_default();
    if let Some(kind) = args.runtime {
        environment.kind = kind;
    }
    if let Some(ref container) = args.container {
        environment.container.clone_from(container);
    }
    if environment.kind != EnvironmentKind::Local && environment.container.trim().is_empty() {
        bail!("Container name must not be empty for the {} runtime", environment.kind);
    }

    let pipeline = PipelineConfig::from_overrides(merged);
    pipeline.validate().context("Invalid pipeline configuration")?;

    Ok(ResolvedConfig {
        pipeline,
        environment,
        toolchain: file.toolchain.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_win_over_file() {
        let file = ConfigFile {
            pipeline: PipelineOverrides { epochs: Some(4), seed: Some(9), ..Default::default() },
            ..Default::default()
        };
        let overrides = PipelineOverrides { epochs: Some(7), ..Default::default() };

        let resolved = resolve_with(file, &EnvironmentArgs::default(), &overrides).unwrap();
        assert_eq!(resolved.pipeline.epochs, 7);
        assert_eq!(resolved.pipeline.seed, Some(9));
        assert_eq!(resolved.environment.kind, EnvironmentKind::Docker);
        assert_eq!(resolved.toolchain, Toolchain::default());
    }

    #[test]
    fn test_runtime_and_container_flags() {
        let file = ConfigFile {
            environment: Some(EnvironmentConfig::docker("from-file")),
            ..Default::default()
        };
        let args = EnvironmentArgs {
            runtime: Some(EnvironmentKind::Podman),
            container: Some("trainer".to_string()),
            ..Default::default()
        };

        let resolved = resolve_with(file, &args, &PipelineOverrides::default()).unwrap();
        assert_eq!(resolved.environment.kind, EnvironmentKind::Podman);
        assert_eq!(resolved.environment.container, "trainer");
    }

    #[test]
    fn test_traversing_scheme_rejected() {
        let overrides = PipelineOverrides { quantization: Some("../../etc/Q4".to_string()), ..Default::default() };
        let err = resolve_with(ConfigFile::default(), &EnvironmentArgs::default(), &overrides).unwrap_err();
        assert!(format!("{err:#}").contains("path separators"));
    }

    #[test]
    fn test_empty_container_rejected() {
        let args = EnvironmentArgs { container: Some(" ".to_string()), ..Default::default() };
        assert!(resolve_with(ConfigFile::default(), &args, &PipelineOverrides::default()).is_err());

        let local = EnvironmentArgs {
            container: Some(String::new()),
            runtime: Some(EnvironmentKind::Local),
            ..Default::default()
        };
        assert!(resolve_with(ConfigFile::default(), &local, &PipelineOverrides::default()).is_ok());
    }
}
