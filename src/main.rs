//! The bank ledger GraphQL server.

use clap::{FromArgMatches, CommandFactory};
use std::{env, sync::Arc};

use crate::{
    args::{Args, Command},
    config::Config,
    ledger::PgLedger,
    prelude::*,
};

mod api;
mod args;
mod config;
mod cmd;
mod http;
mod ledger;
mod logger;
mod prelude;
mod version;


#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // Also goes to the log file, in case nobody watches stderr.
        error!("{:?}", e);
        print_error(&e);
        std::process::exit(1);
    }
}

/// Prints the error and all its causes to stderr, indented by depth.
fn print_error(e: &anyhow::Error) {
    eprintln!();
    bunt::eprintln!("{$red}▶▶▶ {$bold}Error:{/$}{/$} {[yellow+intense]}", e);

    let mut causes = e.chain().skip(1).peekable();
    if causes.peek().is_some() {
        eprintln!();
        bunt::eprintln!("{$red+italic}Caused by:{/$}");
    }
    for (depth, cause) in causes.enumerate() {
        eprintln!(" {:indent$}‣ {cause}", "", indent = depth * 2);
    }
}

/// Main entry point.
async fn run() -> Result<()> {
    // Backtraces on by default, unless explicitly configured otherwise.
    if env::var("RUST_BACKTRACE") == Err(env::VarError::NotPresent) {
        env::set_var("RUST_BACKTRACE", "1");
    }

    // The version string is only known at runtime, so it is set on the
    // command before parsing.
    let args = Args::from_arg_matches(
        &Args::command()
            .version(version::full())
            .get_matches(),
    )?;

    bunt::set_stdout_color_choice(args.stdout_color());
    bunt::set_stderr_color_choice(args.stderr_color());


    // Dispatch subcommand.
    match &args.cmd {
        Command::Serve { shared } => {
            let config = load_config_and_init_logger(shared, &args, "serve")?;
            start_server(config).await?;
        }
        Command::Db { cmd, shared } => {
            let config = load_config_and_init_logger(shared, &args, "db")?;
            ledger::cmd::run(cmd, &config).await?;
        }
        Command::Check { shared } => cmd::check::run(shared, &args).await?,
        Command::WriteConfig { target } => config::write_template(target.as_ref())?,
        Command::ExportApiSchema { args } => cmd::export_api_schema::run(args)?,
    }

    Ok(())
}

async fn start_server(config: Config) -> Result<()> {
    info!("Starting bank ledger API {} ...", version::identifier());
    trace!("Configuration: {:#?}", config);

    // Fails immediately without a ledger name, before anything is contacted.
    let ledger = PgLedger::new(&config.ledger)
        .context("cannot start server without a usable ledger configuration")?;
    ledger::migrate(&ledger).await
        .context("failed to check/run ledger migrations")?;

    let root_node = api::root_node();
    http::serve(&config.http, config.log.log_http_headers, root_node, Arc::new(ledger)).await
        .context("failed to start HTTP server")?;

    Ok(())
}


/// Loads the configuration and installs the logger. `cmd` is the name of the
/// subcommand, used for the log file path.
fn load_config_and_init_logger(shared: &args::Shared, args: &Args, cmd: &str) -> Result<Config> {
    let (config, path) = match &shared.config {
        Some(path) => {
            let config = Config::load_from(path)
                .context(format!("failed to load config from '{}'", path.display()))?;
            (config, Some(path.clone()))
        }
        None => Config::from_env_or_default_locations()?,
    };

    // The logger is configured by the config file, so anything before this
    // point cannot be logged.
    logger::init(&config.log, args, cmd)?;
    match path {
        Some(path) => info!("Loaded config from '{}'", path.display()),
        None => info!("No config file found: using environment variables and defaults"),
    }

    Ok(config)
}
