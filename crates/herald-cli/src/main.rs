mod scenarios;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use herald_runner::{init_logging, ConfigLoadError, HeraldConfig};
use tracing::{info, warn};

use scenarios::{Scenario, SCENARIO_LIMIT};

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enables debug mode
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    /// Config file to use instead of the default location
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one of the built-in message scenarios
    Scenario {
        #[arg(value_enum)]
        name: Scenario,
    },
    /// Write an example config file
    WriteConfig {
        /// Where to write it; defaults to the config location
        path: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<HeraldConfig> {
    let loaded = match path {
        Some(path) => HeraldConfig::load_from(path),
        None => HeraldConfig::load(),
    };

    match loaded {
        Ok(config) => Ok(config),
        // An explicit path must exist; the default location is optional
        Err(ConfigLoadError::NotFound(_)) | Err(ConfigLoadError::NoConfigDir)
            if path.is_none() =>
        {
            Ok(HeraldConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    match cli.debug {
        0 => {}
        1 => config.logging.filter = "debug".to_string(),
        _ => config.logging.filter = "trace".to_string(),
    }

    let _guard = init_logging("herald", &config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::WriteConfig { path } => {
            let path = path
                .or_else(HeraldConfig::config_path)
                .context("Could not determine the config directory")?;
            HeraldConfig::write_example(&path)?;
            info!(target: "herald", "Created example config at {}", path.display());
            eprintln!("Config file created at: {}", path.display());
        }
        Command::Scenario { name } => {
            let run = scenarios::run(name, &config.bus);
            let lines = match tokio::time::timeout(SCENARIO_LIMIT, run).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        target: "herald",
                        "Scenario {:?} did not finish within {:?}",
                        name,
                        SCENARIO_LIMIT
                    );
                    anyhow::bail!("scenario {:?} timed out", name);
                }
            };
            for line in lines {
                println!("{}", line);
            }
        }
    }

    Ok(())
}
