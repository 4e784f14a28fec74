//! # pointage
//!
//! Terminal client for clocking a bus and its driver.
//!
//! The operator logs in once, picks a pointage type, then runs `pointage scan`
//! and scans the bus QR code followed by the driver QR code with a USB scanner
//! in keyboard mode.
//!
//! ## Running
//!
//! ```bash
//! pointage login operator@example.com
//! pointage select-type exit
//! pointage scan
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use pointage_core::{default_config_path, ClientConfig, StateStore};
use tracing::info;

mod app;
mod cli;
mod logging;
mod wedge;

use cli::{Cli, Command, ConfigAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    let explicit = cli.config.is_some();
    let config = load_config(&config_path, explicit)?;
    let data_dir = config.data_dir()?;
    logging::init(Some(&data_dir), cli.verbose)?;

    info!(version = env!("CARGO_PKG_VERSION"), data_dir = %data_dir.display(), "starting pointage");

    let mut store = StateStore::in_dir(&data_dir)
        .with_context(|| format!("failed to open state in {}", data_dir.display()))?;

    match cli.command {
        Command::Login { email, password } => {
            app::login(&config, &mut store, &email, password).await?;
        }
        Command::Logout => app::logout(&mut store),
        Command::Status => app::status(&config, &mut store),
        Command::SelectType { pointage_type } => app::select_type(&mut store, pointage_type)?,
        Command::History => app::history(&config, &store),
        Command::Scan { auto_submit } => app::scan(&config, &mut store, auto_submit).await?,
        Command::Config { action } => run_config(&action, &config_path, explicit)?,
    }

    Ok(())
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(path: &Path, explicit: bool) -> anyhow::Result<ClientConfig> {
    let config = if explicit {
        ClientConfig::load_from(path)?
    } else {
        ClientConfig::load()?
    };
    Ok(config)
}

fn run_config(action: &ConfigAction, path: &Path, explicit: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Path => println!("{}", path.display()),
        ConfigAction::Show => {
            let config = load_config(path, explicit)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            ClientConfig::default().save(path)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
