use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use std::{collections::BTreeMap, time::Duration, num::NonZeroU64};
use tokio_postgres::{error::SqlState, GenericClient, IsolationLevel, Transaction};

use crate::prelude::*;
use super::PgLedger;


/// What has to happen to bring the ledger schema up to date.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MigrationPlan {
    /// Nothing exists yet: create the meta table, then run every migration.
    EmptyDb,

    /// Every known migration is applied and unchanged.
    UpToDate,

    /// The applied migrations are a prefix of the known ones, the remaining
    /// `new_migrations` still have to run.
    Migrate {
        new_migrations: NonZeroU64,
    },
}

impl MigrationPlan {
    /// Inspects the database (read only) and decides what to do. Fails if the
    /// applied migrations do not match the known ones.
    pub(crate) async fn build(db: &impl GenericClient) -> Result<Self> {
        if !does_table_exist(db, "__db_migrations").await? {
            // Tables without a meta table were not created by us.
            let tables = all_table_names(db).await?;
            if !tables.is_empty() {
                bail!(
                    "database has no '__db_migrations' table but contains other tables ({}). \
                        Refusing to use it as ledger database.",
                    tables.join(", "),
                );
            }

            return Ok(Self::EmptyDb);
        }

        debug!("Checking DB migrations");
        let rows = db.query("select id, name, applied_on, script from __db_migrations", &[])
            .await
            .context("failed to query meta migrations table")?;
        let active_migrations = rows.iter()
            .map(|row| (row.get::<_, i64>("id") as u64, AppliedMigration {
                name: row.get("name"),
                applied_on: row.get("applied_on"),
                script: row.get("script"),
            }))
            .collect::<BTreeMap<_, _>>();

        plan_for(&active_migrations, &MIGRATIONS)
    }

    /// Runs the plan inside `tx`.
    pub(crate) async fn execute(&self, tx: &Transaction<'_>) -> Result<()> {
        let new_migrations = match self {
            Self::UpToDate => {
                info!("Ledger schema is up to date, no migrations to apply");
                return Ok(());
            }
            Self::EmptyDb => {
                info!("Ledger database is empty, creating '__db_migrations' table");
                tx.batch_execute(include_str!("db-migrations.sql"))
                    .await
                    .context("could not create migrations meta table")?;
                MIGRATIONS.len() as u64
            }
            Self::Migrate { new_migrations } => new_migrations.get(),
        };

        info!("Applying {new_migrations} pending ledger migration(s)");
        for (id, migration) in MIGRATIONS.range(MIGRATIONS.len() as u64 - new_migrations + 1..) {
            debug!("Applying migration '{id}-{}'", migration.name);
            trace!("Executing:\n{}", migration.script);

            tx.batch_execute(migration.script)
                .await
                .context(format!("failed to run script for '{}-{}'", id, migration.name))?;

            let query = "insert into __db_migrations (id, name, applied_on, script) \
                values ($1, $2, now() at time zone 'utc', $3)";
            tx.execute(query, &[&(*id as i64), &migration.name, &migration.script])
                .await
                .context("failed to update __db_migrations")?;
        }

        info!("Applied {new_migrations} ledger migration(s)");

        Ok(())
    }
}

/// A migration as recorded in `__db_migrations`.
#[derive(Debug)]
struct AppliedMigration {
    name: String,
    applied_on: NaiveDateTime,
    script: String,
}

/// Compares the applied migrations with the known ones.
fn plan_for(
    active: &BTreeMap<u64, AppliedMigration>,
    known: &BTreeMap<u64, Migration>,
) -> Result<MigrationPlan> {
    if !active.keys().copied().eq(1..active.len() as u64 + 1) {
        bail!("applied migration IDs have gaps: {:?}", active.keys().collect::<Vec<_>>());
    }

    for (id, actual) in active {
        let expected = known.get(id).ok_or_else(|| anyhow!(
            "migration '{}-{}' (applied on {}) is unknown to this version of bank-ledger. \
                Was the database migrated by a newer version?",
            id,
            actual.name,
            actual.applied_on,
        ))?;

        if actual.script != expected.script {
            debug!("Expected script for '{}-{}':\n{}", id, expected.name, expected.script);
            debug!("Actual (in database) script for '{}-{}':\n{}", id, actual.name, actual.script);

            bail!(
                "applied migration '{}-{}' (applied on {}) differs from the script shipped \
                    with this version",
                id,
                actual.name,
                actual.applied_on,
            );
        }
    }

    // Every active migration is known, so `known` is at least as long.
    match NonZeroU64::new(known.len() as u64 - active.len() as u64) {
        None => Ok(MigrationPlan::UpToDate),
        Some(new_migrations) => Ok(MigrationPlan::Migrate { new_migrations }),
    }
}


/// Applies all pending migrations. Errors out on any mismatch between the
/// database and the known migrations, those need manual attention.
pub(crate) async fn migrate(ledger: &PgLedger) -> Result<()> {
    let mut client = ledger.connect_client().await?;

    // Planning and applying happen in one serializable transaction. Of two
    // concurrently starting servers, one fails to commit and then sees the
    // migrations of the other on retry.
    loop {
        let tx = client.build_transaction()
            .isolation_level(IsolationLevel::Serializable)
            .start()
            .await?;

        let plan = MigrationPlan::build(&tx).await?;
        plan.execute(&tx).await?;

        match tx.commit().await {
            Ok(_) => return Ok(()),

            Err(e) if e.code() == Some(&SqlState::T_R_SERIALIZATION_FAILURE) => {
                let backoff = Duration::from_millis(500);
                warn!("Concurrent ledger migration detected, retrying in {backoff:?}");
                tokio::time::sleep(backoff).await;
            }

            Err(e) => Err(e)?,
        }
    }
}

/// Returns the names of all tables in the `public` schema.
async fn all_table_names(db: &impl GenericClient) -> Result<Vec<String>> {
    let rows = db.query(
        "select table_name::text from information_schema.tables \
            where table_schema = 'public' and table_type = 'BASE TABLE'",
        &[],
    ).await?;

    Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
}

/// Whether `public.{table_name}` exists.
async fn does_table_exist(db: &impl GenericClient, table_name: &str) -> Result<bool> {
    let row = db.query_one(
        "select exists(
            select * from information_schema.tables
                where table_schema='public' and table_name=$1
        )",
        &[&table_name],
    ).await?;

    Ok(row.get::<_, bool>(0))
}


// Embeds `migrations/{id}-{name}.sql` files. IDs must be unique and
// consecutive, checked on first access.
macro_rules! include_migrations {
    ( $( $id:literal : $name:literal ,)+ ) => {
        Lazy::new(|| {
            let mut m = BTreeMap::new();
            $(
                let prev = m.insert($id, Migration {
                    name: $name,
                    script: include_str!(
                        concat!("migrations/", stringify!($id), "-", $name, ".sql")
                    ),
                });

                assert!(prev.is_none(), "duplicate key in `include_migrations!`");
            )+

            if !m.keys().copied().eq(1..m.len() as u64 + 1) {
                panic!("migration IDs in `include_migrations!` are not consecutive");
            }

            m
        })
    };
}

#[derive(Debug)]
struct Migration {
    name: &'static str,
    script: &'static str,
}

static MIGRATIONS: Lazy<BTreeMap<u64, Migration>> = include_migrations![
    01: "ledger-types",
    02: "transactions",
];
