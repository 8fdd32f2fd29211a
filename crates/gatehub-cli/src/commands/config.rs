//! `gatehub config` - resolve and print one unit's effective configuration.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use gatehub_core::config::{
    resolve, ConfigError, FsLayerSource, HubManifest, LayerSource,
};

use super::exit_codes;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Unit to resolve
    pub unit: String,

    /// Emit JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

pub fn run(manifest_path: &Path, args: &ConfigArgs) -> Result<u8> {
    let manifest = match HubManifest::from_file(manifest_path) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        },
    };
    let root = manifest_path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let source = FsLayerSource::new(root, manifest);

    let layers = match source.layers_for(&args.unit) {
        Ok(layers) => layers,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        },
    };

    match resolve(&layers) {
        Ok(config) => {
            let rendered = if args.json {
                serde_json::to_string_pretty(&config).context("serializing configuration")?
            } else {
                toml::to_string_pretty(&config).context("serializing configuration")?
            };
            println!("{rendered}");
            Ok(exit_codes::SUCCESS)
        },
        Err(ConfigError::Invalid { problems }) => {
            eprintln!(
                "configuration for '{}' is invalid ({} problem(s)):",
                args.unit,
                problems.len()
            );
            for problem in problems {
                eprintln!("  - {problem}");
            }
            Ok(exit_codes::CONFIG_ERROR)
        },
        Err(e) => {
            eprintln!("error: {e}");
            Ok(exit_codes::CONFIG_ERROR)
        },
    }
}
