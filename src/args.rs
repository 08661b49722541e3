//! This module defines the command line arguments the service accepts.

use std::{io::IsTerminal, path::PathBuf};
use termcolor::ColorChoice;

use crate::{cmd, ledger::cmd::DbCommand};


#[derive(Debug, clap::Parser)]
#[clap(about = "GraphQL API for an append-only ledger of bank transactions.")]
pub(crate) struct Args {
    /// Whether to use colors in the output: "auto", "always" or "never".
    #[clap(long, global = true, default_value = "auto", value_parser = parse_color_choice)]
    pub(crate) color: ColorChoice,

    #[clap(subcommand)]
    pub(crate) cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
pub(crate) enum Command {
    /// Starts the HTTP server serving the GraphQL API.
    Serve {
        #[clap(flatten)]
        shared: Shared,
    },

    /// Ledger database operations.
    Db {
        #[clap(subcommand)]
        cmd: DbCommand,

        #[clap(flatten)]
        shared: Shared,
    },

    /// Checks the config, the ledger connection and the ledger schema.
    ///
    /// Useful before starting or updating the service, as most problems are
    /// caught without needing to restart the running process. Exits with 0 if
    /// everything is Ok, and with 1 otherwise.
    Check {
        #[clap(flatten)]
        shared: Shared,
    },

    /// Outputs a template for the configuration file (which includes
    /// descriptions of all options).
    WriteConfig {
        /// Target file. If not specified, the template is written to stdout.
        target: Option<PathBuf>,
    },

    /// Exports the API as GraphQL schema.
    ExportApiSchema {
        #[clap(flatten)]
        args: cmd::export_api_schema::Args,
    },
}

#[derive(Debug, clap::Args)]
pub(crate) struct Shared {
    /// Path to the configuration file. If this is not specified, the
    /// environment variable `BANK_LEDGER_CONFIG_PATH` is checked, then
    /// `config.toml` and `/etc/bank-ledger/config.toml` are tried. If none
    /// exists, only environment variables and defaults are used.
    #[clap(short, long)]
    pub(crate) config: Option<PathBuf>,
}

impl Args {
    pub(crate) fn stdout_color(&self) -> ColorChoice {
        self.auto_color(std::io::stdout().is_terminal())
    }

    pub(crate) fn stderr_color(&self) -> ColorChoice {
        self.auto_color(std::io::stderr().is_terminal())
    }

    /// Resolves "auto" to "never" if the stream is not a terminal.
    fn auto_color(&self, is_terminal: bool) -> ColorChoice {
        match self.color {
            ColorChoice::Auto if !is_terminal => ColorChoice::Never,
            other => other,
        }
    }
}

fn parse_color_choice(s: &str) -> Result<ColorChoice, String> {
    match s {
        "auto" => Ok(ColorChoice::Auto),
        "always" => Ok(ColorChoice::Always),
        "never" => Ok(ColorChoice::Never),
        other => Err(format!("invalid color choice '{other}' (expected 'auto', 'always' or 'never')")),
    }
}
