//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pointage_core::PointageType;

/// Clock a bus and its driver by scanning their QR codes.
#[derive(Debug, Parser)]
#[command(name = "pointage", version, about)]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory).
    #[arg(short, long, global = true, env = "POINTAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the session.
    Login {
        /// Operator email.
        email: String,

        /// Password; read from the terminal when omitted.
        #[arg(long, env = "POINTAGE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the session and all local state.
    Logout,

    /// Show the dashboard: session, pending banner, recent clockings.
    #[command(visible_alias = "dashboard")]
    Status,

    /// Choose the pointage type used for the next clockings.
    SelectType {
        /// entry, exit, or a numeric category.
        #[arg(value_name = "TYPE")]
        pointage_type: PointageType,
    },

    /// List the most recent clockings.
    History,

    /// Open the interactive scan screen.
    Scan {
        /// Send as soon as the driver code is scanned.
        #[arg(long)]
        auto_submit: bool,
    },

    /// Inspect or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Print the configuration file path.
    Path,
    /// Write the default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_select_type() {
        let cli = Cli::parse_from(["pointage", "select-type", "sortie"]);
        assert!(matches!(
            cli.command,
            Command::SelectType {
                pointage_type: PointageType::Exit
            }
        ));

        let cli = Cli::parse_from(["pointage", "select-type", "3"]);
        assert!(matches!(
            cli.command,
            Command::SelectType {
                pointage_type: PointageType::Category(3)
            }
        ));

        assert!(Cli::try_parse_from(["pointage", "select-type", "lunch"]).is_err());
    }

    #[test]
    fn test_dashboard_alias_and_global_flags() {
        let cli = Cli::parse_from(["pointage", "dashboard", "-v"]);
        assert!(matches!(cli.command, Command::Status));
        assert!(cli.verbose);
    }
}
