use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::Path;

use caption_gen::config::Config;

use crate::cli::common::{config_target, load_config};

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Show,

    /// Print one value (e.g. ollama.model)
    Get { key: String },

    /// Change one value and save
    Set { key: String, value: String },

    /// Print the config file location
    Path,
}

pub async fn run(args: ConfigArgs, config_path: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Init { force } => {
            let path = config_target(config_path)?;
            init(&path, force)?;
        }
        ConfigCommands::Show => {
            let config = load_config(config_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigCommands::Get { key } => {
            let config = load_config(config_path)?;
            println!("{}", config.get_value(&key)?);
        }
        ConfigCommands::Set { key, value } => {
            let path = config_target(config_path)?;
            let mut config = if path.exists() {
                Config::load_from(&path)?
            } else {
                Config::default()
            };
            config.set_value(&key, &value)?;
            config.validate()?;
            config.save_to(&path)?;
            println!("{} = {}", key, config.get_value(&key)?);
        }
        ConfigCommands::Path => {
            println!("{}", config_target(config_path)?.display());
        }
    }

    Ok(())
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save_to(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
