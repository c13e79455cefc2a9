//! Integration tests for the stockbook ledger.
//!
//! # Running Tests
//!
//! ```bash
//! # Engine and register scenarios (in-memory store, no setup)
//! cargo test -p stockbook-integration-tests
//!
//! # PostgreSQL scenarios additionally need a database:
//! DATABASE_URL=postgres://localhost/stockbook_test \
//!     cargo test -p stockbook-integration-tests
//! ```
//!
//! The `postgres_ledger` tests skip themselves when `DATABASE_URL` is not
//! set, so the default test run needs no infrastructure.

use rust_decimal::Decimal;
use secrecy::SecretString;

use stockbook::db::{self, PgLedger};
use stockbook::models::{CreateStockItemInput, StockItem};
use stockbook::store::MemoryStore;

/// A stock item input with throwaway descriptive fields.
#[must_use]
pub fn stock_item_input(register: &str, total_quantity: i64, unit_cost: i64) -> CreateStockItemInput {
    CreateStockItemInput {
        register: register.to_string(),
        description: "Oscilloscope".to_string(),
        category: "Lab equipment".to_string(),
        item_type: "Electronic".to_string(),
        supplier: "Acme Scientific".to_string(),
        purchase_year: "2025".to_string(),
        purchase_date: None,
        total_quantity,
        unit_cost: Decimal::from(unit_cost),
    }
}

/// Create a stock item in the in-memory store.
///
/// # Panics
///
/// Panics if creation fails; fixtures use valid inputs.
#[must_use]
pub fn seed_item(
    store: &MemoryStore,
    register: &str,
    total_quantity: i64,
    unit_cost: i64,
) -> StockItem {
    store
        .create_stock_item(&stock_item_input(register, total_quantity, unit_cost))
        .expect("seed stock item")
}

/// Connect to the test database and run migrations, or `None` when
/// `DATABASE_URL` is not set.
pub async fn test_ledger() -> Option<PgLedger> {
    dotenvy::dotenv().ok();
    let url = SecretString::from(std::env::var("DATABASE_URL").ok()?);
    let pool = db::create_pool(&url).await.ok()?;
    db::MIGRATOR.run(&pool).await.ok()?;
    Some(PgLedger::new(pool))
}

/// A register name unique to this test process, so parallel runs against
/// a shared database do not collide.
#[must_use]
pub fn unique_register(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());
    format!("{prefix}-{}-{nanos}", std::process::id())
}
