//! Migrate command - create or roll back the ledger schema.

use anyhow::Result;

use crate::cli::MigrateArgs;
#[cfg(not(feature = "database"))]
use crate::print_error;
#[cfg(feature = "database")]
use crate::{print_error, print_success};

/// Run the migrate command
#[cfg(feature = "database")]
pub async fn run(args: MigrateArgs, config: &gatesync::Config) -> Result<()> {
    use gatesync::SeaOrmSyncStore;
    use gatesync::storage::migration::{Migrator, rollback_migration, run_migrations};

    let Some(url) = config.database.url.as_deref() else {
        print_error("GATESYNC_DATABASE_URL is not set");
        anyhow::bail!("no database to migrate");
    };

    let store = SeaOrmSyncStore::connect(url).await?;
    match args.rollback {
        Some(steps) => {
            rollback_migration::<Migrator>(store.connection(), Some(steps)).await?;
            print_success(&format!("Rolled back {} migration(s)", steps));
        }
        None => {
            run_migrations::<Migrator>(store.connection()).await?;
            print_success("Database is up to date");
        }
    }
    Ok(())
}

/// Run the migrate command
#[cfg(not(feature = "database"))]
pub async fn run(_args: MigrateArgs, _config: &gatesync::Config) -> Result<()> {
    print_error("This build has no database support; rebuild with `--features database`");
    anyhow::bail!("database feature disabled")
}
