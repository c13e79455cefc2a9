//! Database migration command.
//!
//! Runs the migrations embedded in the `stockbook` crate against the
//! database named by `DATABASE_URL`.

use stockbook::db;

use super::CliError;

/// Run the ledger database migrations.
pub async fn run() -> Result<(), CliError> {
    let url = super::database_url()?;

    tracing::info!("Connecting to ledger database...");
    let pool = db::create_pool(&url).await?;

    tracing::info!("Running ledger migrations...");
    db::MIGRATOR.run(&pool).await?;

    tracing::info!("Ledger migrations complete");
    Ok(())
}
