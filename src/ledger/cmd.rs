use std::{io, os::unix::process::CommandExt, process::Command};
use secrecy::ExposeSecret;

use crate::{prelude::*, config::Config};
use super::{LedgerConfig, PgLedger};


#[derive(Debug, clap::Subcommand)]
pub(crate) enum DbCommand {
    /// Runs the database migrations that also automatically run when starting
    /// the server.
    Migrate,

    /// Connects to the ledger database and gives you an SQL prompt.
    /// This just starts the `psql` client, so make sure that is installed
    /// and accessible in your `PATH`.
    Console,
}

/// Entry point for `db` commands.
pub(crate) async fn run(cmd: &DbCommand, config: &Config) -> Result<()> {
    let ledger = PgLedger::new(&config.ledger)?;

    match cmd {
        DbCommand::Migrate => super::migrate(&ledger).await?,
        DbCommand::Console => {
            console(&config.ledger, ledger.name())?;
        }
    }

    Ok(())
}

/// Replaces the current process with `psql` connected to the ledger. Only
/// returns if that fails.
fn console(config: &LedgerConfig, ledger_name: &str) -> Result<()> {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    fn encode(s: &str) -> String {
        utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
    }

    let credentials = match &config.password {
        Some(password) => format!("{}:{}", encode(&config.user), encode(password.expose_secret())),
        None => encode(&config.user),
    };
    let connection_uri = format!(
        "postgresql://{}@{}:{}/{}",
        credentials,
        config.host,
        config.port,
        encode(ledger_name),
    );

    let error = Command::new("psql").arg(connection_uri).exec();
    let message = match error.kind() {
        io::ErrorKind::NotFound => "`psql` was not found in your `PATH`",
        io::ErrorKind::PermissionDenied => "you don't have sufficient permissions to execute `psql`",
        _ => "an error occured while trying to execute `psql`",
    };
    Err(error).context(message)
}
