use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Args;
use rowmesh_core::RowmeshConfig;

use crate::config::RowmeshConfigLoader;

#[derive(Debug, Args)]
pub struct ConfigArgs {
    /// Output path for generated config.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Show current effective config.
    #[arg(long)]
    pub show: bool,

    /// Validate configuration file.
    #[arg(long)]
    pub validate: bool,
}

pub fn run_config(args: &ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    if args.validate {
        match RowmeshConfig::load(config_path) {
            Ok(_) => {
                let path_desc = config_path.map_or_else(
                    || "default locations".to_string(),
                    |p| p.display().to_string(),
                );
                println!("Configuration is valid (loaded from {path_desc})");
                Ok(())
            }
            Err(e) => {
                anyhow::bail!("Configuration validation failed: {e}");
            }
        }
    } else if args.show {
        let config = RowmeshConfig::load(config_path)?;
        println!("{}", config.to_toml()?);
        Ok(())
    } else {
        let config_str = RowmeshConfig::generate_default_config();

        if let Some(output_path) = &args.output {
            std::fs::write(output_path, &config_str)?;
            println!("Configuration written to {}", output_path.display());
        } else {
            println!("{config_str}");
        }

        Ok(())
    }
}
