//! CLI command implementations.

pub mod migrate;
pub mod registers;
pub mod report;

use secrecy::SecretString;

use stockbook::db::{self, PgLedger};

/// Errors surfaced by CLI commands.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Ledger(#[from] stockbook::LedgerError),
}

/// Read `DATABASE_URL` (also from `.env`) without logging its value.
pub fn database_url() -> Result<SecretString, CliError> {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL")
        .map(SecretString::from)
        .map_err(|_| CliError::MissingEnvVar("DATABASE_URL"))
}

/// Connect to the database and wrap the pool in a ledger.
pub async fn connect() -> Result<PgLedger, CliError> {
    let url = database_url()?;
    let pool = db::create_pool(&url).await?;
    Ok(PgLedger::new(pool))
}
