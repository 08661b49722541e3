//! `check` subcommand: verifies config, ledger connectivity and schema state
//! without starting the server or changing anything.

use crate::{
    args::{self, Args},
    config::Config,
    ledger::{Ledger, MigrationPlan, PgLedger},
    load_config_and_init_logger,
    prelude::*,
};


pub(crate) async fn run(shared: &args::Shared, args: &Args) -> Result<()> {
    let config = load_config_and_init_logger(shared, args, "check")
        .context("failed to load config: cannot proceed with `check` command")?;


    info!("Running checks");
    let referenced_files = check_referenced_files(&config).await;
    let ledger = PgLedger::new(&config.ledger).map_err(anyhow::Error::from);
    let (connection, migrations) = match &ledger {
        Ok(ledger) => (check_connection(ledger).await, check_migrations(ledger).await),
        Err(_) => {
            const SKIPPED: &str = "skipped, as the ledger is not configured";
            (Err(anyhow!(SKIPPED)), Err(anyhow!(SKIPPED)))
        }
    };
    info!("Checks finished");


    let mut any_errors = false;
    println!();
    bunt::println!("{$bold+blue+intense}Summary{/$}");
    println!();
    print_outcome(&mut any_errors, "Load configuration", &Ok(()));
    print_outcome(&mut any_errors, "Referenced files", &referenced_files);
    print_outcome(&mut any_errors, "Ledger configuration", &ledger);
    print_outcome(&mut any_errors, "Connection to ledger", &connection);
    print_outcome(&mut any_errors, "Ledger schema", &migrations);
    if let Ok(plan) = &migrations {
        match plan {
            MigrationPlan::UpToDate => {}
            MigrationPlan::EmptyDb => bunt::println!(
                "      {$dimmed}(ledger is empty, the schema is created on `serve`){/$}"
            ),
            MigrationPlan::Migrate { new_migrations } => bunt::println!(
                "      {$dimmed}({} migrations will be applied on `serve`){/$}",
                new_migrations,
            ),
        }
    }

    println!();
    if any_errors {
        bunt::println!("{$red+intense}➡  Some checks failed{/$}");
        std::process::exit(1);
    } else {
        bunt::println!("{$green+intense}⮕  All checks passed{/$}");
        Ok(())
    }
}

fn print_outcome<T>(any_errors: &mut bool, label: &str, result: &Result<T>) {
    match result {
        Ok(_) => {
            bunt::println!(" ▸ {[bold+intense]}  {$green+bold}✔ ok{/$}", label);
        }
        Err(e) => {
            *any_errors = true;
            bunt::println!(" ▸ {[bold+intense]}  {$red+bold}✘ error{/$}", label);
            bunt::println!("      {$red}{[yellow+intense]}{/$}", e);
            for (depth, cause) in e.chain().skip(1).enumerate() {
                println!("       {:indent$}‣ {cause}", "", indent = depth * 2);
            }
        }
    }
}

async fn check_referenced_files(config: &Config) -> Result<()> {
    if let Some(path) = &config.ledger.server_cert {
        debug!("Opening '{}'", path.display());
        let _ = tokio::fs::File::open(path)
            .await
            .context(format!("could not open '{}' for reading", path.display()))?;
    }

    Ok(())
}

async fn check_connection(ledger: &PgLedger) -> Result<()> {
    let _session = ledger.connect().await?;
    Ok(())
}

async fn check_migrations(ledger: &PgLedger) -> Result<MigrationPlan> {
    let client = ledger.connect_client().await?;
    MigrationPlan::build(&client).await
}
