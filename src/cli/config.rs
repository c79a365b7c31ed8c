//! Conversion from command-line arguments to pipeline configuration

use crate::cli::main_impl::{Cli, CliOperation};
use crate::{
    config::{PipelineConfig, PipelineConfigBuilder},
    job::OperationKind,
    types::Rgb,
};
use anyhow::{Context, Result};

/// Merges CLI flags over the optional JSON configuration file
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the pipeline configuration; flags win over the file
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let base = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        let mut builder = PipelineConfigBuilder::from_config(base);
        if let Some(model) = &cli.model {
            builder = builder.model_path(model);
        }
        if let Some(backend) = cli.backend {
            builder = builder.backend(backend.into());
        }
        if let Some(provider) = cli.provider {
            builder = builder.execution_provider(provider.into());
        }
        if let Some(threads) = cli.threads {
            builder = builder.num_threads(threads);
        }
        if let Some(upscaler) = &cli.upscaler {
            builder = builder.upscaler_path(upscaler);
        }
        if let Some(name) = &cli.upscale_model {
            // an explicit model applies to both single and batch runs
            builder = builder
                .interactive_model(Some(name.clone()))
                .batch_model(Some(name.clone()));
        }

        builder.build().context("Invalid configuration")
    }

    /// Map the subcommand and `--color` to an operation
    pub(crate) fn operation(cli: &Cli) -> Result<OperationKind> {
        Ok(match cli.operation {
            CliOperation::Remove => OperationKind::RemoveBackground,
            CliOperation::Enhance => OperationKind::EnhanceImage,
            CliOperation::Recolor => {
                let color = match &cli.color {
                    Some(text) => text.parse::<Rgb>().context("Invalid --color")?,
                    None => Rgb::default(),
                };
                OperationKind::ChangeBackgroundColor(color)
            },
        })
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if cli.color.is_some() && cli.operation != CliOperation::Recolor {
            log::warn!("--color only applies to recolor and is ignored");
        }
        if let Some(pattern) = &cli.pattern {
            glob::Pattern::new(pattern)
                .with_context(|| format!("Invalid --pattern '{pattern}'"))?;
        }
        if let Some(output) = &cli.output {
            if output.is_file() {
                anyhow::bail!(
                    "Output path exists and is a file, not a directory: {}",
                    output.display()
                );
            }
        }
        Self::operation(cli)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::main_impl::{CliBackend, CliProvider};
    use crate::config::{BackendType, ExecutionProvider};
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("photo-cutout").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_without_flags() {
        let cli = parse(&["remove", "a.png"]);
        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(
            CliConfigBuilder::operation(&cli).unwrap(),
            OperationKind::RemoveBackground
        );
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("cutout.json");
        std::fs::write(
            &file,
            r#"{ "model": { "path": "/models/from-file.onnx", "backend": "tract" },
                 "enhance": { "termination_grace_ms": 1500 } }"#,
        )
        .unwrap();

        let file_arg = file.to_string_lossy().into_owned();
        let cli = parse(&[
            "enhance",
            "a.png",
            "--config",
            &file_arg,
            "--backend",
            "onnx",
            "--provider",
            "cpu",
            "--threads",
            "4",
            "--upscale-model",
            "realesrgan-x4plus",
        ]);
        assert_eq!(cli.backend, Some(CliBackend::Onnx));
        assert_eq!(cli.provider, Some(CliProvider::Cpu));

        let config = CliConfigBuilder::from_cli(&cli).unwrap();
        assert_eq!(config.model.path, std::path::PathBuf::from("/models/from-file.onnx"));
        assert_eq!(config.model.backend, BackendType::Onnx);
        assert_eq!(config.model.execution_provider, ExecutionProvider::Cpu);
        assert_eq!(config.model.intra_threads, 4);
        assert_eq!(config.enhance.termination_grace_ms, 1500);
        assert_eq!(config.enhance.model_for(true), Some("realesrgan-x4plus"));
        assert_eq!(config.enhance.model_for(false), Some("realesrgan-x4plus"));
    }

    #[test]
    fn test_recolor_color_parsing() {
        let cli = parse(&["recolor", "a.png", "--color", "#102030"]);
        assert_eq!(
            CliConfigBuilder::operation(&cli).unwrap(),
            OperationKind::ChangeBackgroundColor(Rgb::new(0x10, 0x20, 0x30))
        );

        let cli = parse(&["recolor", "a.png"]);
        assert_eq!(
            CliConfigBuilder::operation(&cli).unwrap(),
            OperationKind::ChangeBackgroundColor(Rgb::WHITE)
        );

        let cli = parse(&["recolor", "a.png", "--color", "chartreuse"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let cli = parse(&["remove", "dir", "-o", "out", "--pattern", "[unclosed"]);
        assert!(CliConfigBuilder::validate_cli(&cli).is_err());
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let cli = parse(&["remove", "a.png", "--config", "/nonexistent/cutout.json"]);
        assert!(CliConfigBuilder::from_cli(&cli).is_err());
    }
}
