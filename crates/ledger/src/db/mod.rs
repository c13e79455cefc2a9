//! `PostgreSQL` persistence for the ledger.
//!
//! # Tables
//!
//! - `registers` - pending empty registers from the two-step workflow
//! - `stock_items` - central stock register entries
//! - `allocations` - per-department allocation rows (no foreign key to
//!   `stock_items`; the engine checks references defensively)
//!
//! Migrations are embedded from `crates/ledger/migrations/` and run via:
//! ```bash
//! cargo run -p stockbook-cli -- migrate
//! ```

pub mod postgres;

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;

pub use postgres::PgLedger;

/// Embedded database migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
