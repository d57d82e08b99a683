use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use hdrl_core::config::CollapseConfig;
use serde::{Deserialize, Serialize};

/// Settings file accepted by `hdrl collapse --config`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub collapse: CollapseConfig,
    /// Worker threads for the reduction (default: all cores).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    /// Constant 1-sigma error assigned to every input pixel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
    /// Detector gain in e-/ADU; enables shot-noise errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain: Option<f64>,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
    }
}

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save the default configuration as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let config = CliConfig {
        error: Some(0.0),
        ..Default::default()
    };
    let toml_str = toml::to_string_pretty(&config)?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
