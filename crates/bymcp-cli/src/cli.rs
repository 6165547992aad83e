//! CLI argument definitions for bymcp.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// bymcp -- MCP server for payroll, receipt and invoice workflows.
#[derive(Parser)]
#[command(
    name = "bymcp",
    version,
    about = "bymcp -- MCP server for payroll, receipt and invoice workflows",
    long_about = "An MCP server that pays salaries through Qonto, matches bank transactions \
                  with receipts from Office 365 mail, and imports invoice PDFs into \
                  SharePoint lists."
)]
pub struct Cli {
    /// Load environment variables from this file before anything else.
    #[arg(long, global = true, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the MCP server on stdin/stdout.
    Serve,

    /// Show configuration, adapter health and token state.
    Status,

    /// List the registered tools.
    Tools,

    /// Show the transfer ledger.
    Transfers {
        /// Only show this pay period (YYYY-MM).
        #[arg(long, short)]
        period: Option<String>,
    },

    /// Sign in to a provider and cache its tokens.
    Authorize {
        #[arg(value_enum)]
        provider: Provider,
    },

    /// Delete the cached tokens of a provider.
    Logout {
        #[arg(value_enum)]
        provider: Provider,
    },
}

/// An OAuth provider bymcp signs in to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Qonto (browser login, needed for transfers and receipt upload).
    Qonto,
    /// Microsoft Office 365 (device code, needed for mail and SharePoint).
    Microsoft,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn env_file_is_global() {
        let cli = Cli::try_parse_from(["bymcp", "status", "--env-file", "/etc/bymcp.env"]).unwrap();
        assert_eq!(cli.env_file, Some(PathBuf::from("/etc/bymcp.env")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn transfers_with_period() {
        let cli = Cli::try_parse_from(["bymcp", "transfers", "--period", "2026-02"]).unwrap();
        match cli.command {
            Commands::Transfers { period } => assert_eq!(period.as_deref(), Some("2026-02")),
            _ => panic!("expected transfers"),
        }
    }

    #[test]
    fn authorize_takes_a_known_provider() {
        let cli = Cli::try_parse_from(["bymcp", "authorize", "microsoft"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Authorize {
                provider: Provider::Microsoft
            }
        ));
        assert!(Cli::try_parse_from(["bymcp", "logout", "google"]).is_err());
    }
}
