//! `PostgreSQL` ledger backend.
//!
//! [`PgLedger`] runs the same planners as the in-memory engine, but
//! snapshots and applies inside a database transaction. The stock item
//! row is locked with `SELECT ... FOR UPDATE NOWAIT`; a lock conflict
//! (`55P03`) surfaces as [`LedgerError::Busy`] so callers can retry,
//! matching the in-memory lock timeout behavior.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};

use stockbook_core::{AllocationId, StockItemId};

use crate::engine::plan::{self, MutationPlan};
use crate::engine::{
    BulkAllocationItem, BulkAllocationOutcome, BulkDeallocationOutcome, BulkRowFailure,
    DeallocationOutcome, EngineOutcome, RowFailure,
};
use crate::error::LedgerError;
use crate::models::{
    Allocation, AllocationRequest, CreateStockItemInput, RegisterState, RegisterSummary,
    StockItem, UpdateStockItemInput, Withdrawal,
};
use crate::query::DepartmentTotal;

const STOCK_ITEM_COLUMNS: &str = "id, register, description, category, item_type, supplier, \
     purchase_year, purchase_date, total_quantity, unit_cost, total_cost, remaining_quantity, \
     created_at";

const ALLOCATION_COLUMNS: &str = "id, stock_item_id, department, accepted_quantity, unit_cost, \
     total_cost, receipt_no, receipt_page_no, received_at";

#[derive(Debug, sqlx::FromRow)]
struct StockItemRow {
    id: StockItemId,
    register: String,
    description: String,
    category: String,
    item_type: String,
    supplier: String,
    purchase_year: String,
    purchase_date: Option<NaiveDate>,
    total_quantity: i64,
    unit_cost: Decimal,
    total_cost: Decimal,
    remaining_quantity: i64,
    created_at: DateTime<Utc>,
}

impl From<StockItemRow> for StockItem {
    fn from(row: StockItemRow) -> Self {
        Self {
            id: row.id,
            register: row.register,
            description: row.description,
            category: row.category,
            item_type: row.item_type,
            supplier: row.supplier,
            purchase_year: row.purchase_year,
            purchase_date: row.purchase_date,
            total_quantity: row.total_quantity,
            unit_cost: row.unit_cost,
            total_cost: row.total_cost,
            remaining_quantity: row.remaining_quantity,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AllocationRow {
    id: AllocationId,
    stock_item_id: StockItemId,
    department: String,
    accepted_quantity: i64,
    unit_cost: Decimal,
    total_cost: Decimal,
    receipt_no: Option<String>,
    receipt_page_no: Option<String>,
    received_at: DateTime<Utc>,
}

impl From<AllocationRow> for Allocation {
    fn from(row: AllocationRow) -> Self {
        Self {
            id: row.id,
            stock_item_id: row.stock_item_id,
            department: row.department,
            accepted_quantity: row.accepted_quantity,
            unit_cost: row.unit_cost,
            total_cost: row.total_cost,
            receipt_no: row.receipt_no,
            receipt_page_no: row.receipt_page_no,
            received_at: row.received_at,
        }
    }
}

/// Map a row-lock conflict on the stock item to `Busy`; everything else
/// passes through as a database error.
fn map_lock_error(error: sqlx::Error, id: StockItemId) -> LedgerError {
    if let sqlx::Error::Database(db_error) = &error
        && db_error.code().as_deref() == Some("55P03")
    {
        return LedgerError::Busy(id);
    }
    LedgerError::Database(error)
}

/// Ledger persistence and engine operations over `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Create a ledger over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Stock item CRUD
    // ------------------------------------------------------------------

    /// Create a new stock item with `remaining_quantity` equal to the
    /// purchased total. If the register was pending (created empty), it
    /// transitions to populated.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty register name, negative quantity, or
    /// negative cost; `Database` on connection failure.
    pub async fn create_stock_item(
        &self,
        input: &CreateStockItemInput,
    ) -> Result<StockItem, LedgerError> {
        if input.register.trim().is_empty() {
            return Err(LedgerError::Validation(
                "stock item requires a register name".to_string(),
            ));
        }
        if input.total_quantity < 0 {
            return Err(LedgerError::Validation(format!(
                "total quantity {} must not be negative",
                input.total_quantity
            )));
        }
        if input.unit_cost < Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "unit cost {} must not be negative",
                input.unit_cost
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM registers WHERE name = $1")
            .bind(&input.register)
            .execute(&mut *tx)
            .await?;
        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            "INSERT INTO stock_items \
                 (register, description, category, item_type, supplier, purchase_year, \
                  purchase_date, total_quantity, unit_cost, total_cost, remaining_quantity) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $8 * $9, $8) \
             RETURNING {STOCK_ITEM_COLUMNS}"
        ))
        .bind(&input.register)
        .bind(&input.description)
        .bind(&input.category)
        .bind(&input.item_type)
        .bind(&input.supplier)
        .bind(&input.purchase_year)
        .bind(input.purchase_date)
        .bind(input.total_quantity)
        .bind(input.unit_cost)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(stock_item = %row.id, register = %row.register, "created stock item");
        Ok(row.into())
    }

    /// Fetch a stock item by ID.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Database`.
    pub async fn get_stock_item(&self, id: StockItemId) -> Result<StockItem, LedgerError> {
        sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or(LedgerError::StockItemNotFound(id))
    }

    /// List every stock item, ordered by ID.
    ///
    /// # Errors
    ///
    /// `Database`.
    pub async fn list_stock_items(&self) -> Result<Vec<StockItem>, LedgerError> {
        let rows = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Update descriptive fields of a stock item. `None` fields are left
    /// unchanged. Quantity or cost changes recompute `total_cost` and
    /// shift `remaining_quantity` by the quantity delta.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Validation` when the new total undershoots
    /// the allocated quantity, `Busy`, `Database`.
    pub async fn update_stock_item(
        &self,
        id: StockItemId,
        input: &UpdateStockItemInput,
    ) -> Result<StockItem, LedgerError> {
        // Rejected here rather than by the column CHECK constraint, so
        // the caller sees `Validation` from both backends.
        if let Some(cost) = input.unit_cost
            && cost < Decimal::ZERO
        {
            return Err(LedgerError::Validation(format!(
                "unit cost {cost} must not be negative"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let current = Self::lock_stock_item(&mut tx, id).await?;

        if let Some(total_quantity) = input.total_quantity {
            let allocated = Self::allocated_total(&mut tx, id).await?;
            if total_quantity < allocated {
                return Err(LedgerError::Validation(format!(
                    "total quantity {total_quantity} is below the allocated quantity {allocated}"
                )));
            }
        }

        // All right-hand sides of a single UPDATE read the pre-update row,
        // so the remaining-quantity shift can reference the old total.
        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            "UPDATE stock_items SET \
                 description = COALESCE($2, description), \
                 category = COALESCE($3, category), \
                 item_type = COALESCE($4, item_type), \
                 supplier = COALESCE($5, supplier), \
                 purchase_year = COALESCE($6, purchase_year), \
                 purchase_date = COALESCE($7, purchase_date), \
                 total_quantity = COALESCE($8, total_quantity), \
                 unit_cost = COALESCE($9, unit_cost), \
                 total_cost = COALESCE($8, total_quantity) * COALESCE($9, unit_cost), \
                 remaining_quantity = remaining_quantity \
                     + (COALESCE($8, total_quantity) - total_quantity) \
             WHERE id = $1 \
             RETURNING {STOCK_ITEM_COLUMNS}"
        ))
        .bind(id)
        .bind(&input.description)
        .bind(&input.category)
        .bind(&input.item_type)
        .bind(&input.supplier)
        .bind(&input.purchase_year)
        .bind(input.purchase_date)
        .bind(input.total_quantity)
        .bind(input.unit_cost)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(stock_item = %current.id, "updated stock item");
        Ok(row.into())
    }

    // ------------------------------------------------------------------
    // Allocation reads
    // ------------------------------------------------------------------

    /// Fetch an allocation by ID.
    ///
    /// # Errors
    ///
    /// `AllocationNotFound`, `Database`.
    pub async fn get_allocation(&self, id: AllocationId) -> Result<Allocation, LedgerError> {
        sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(Into::into)
        .ok_or(LedgerError::AllocationNotFound(id))
    }

    /// List the active allocations of one stock item, ordered by ID.
    ///
    /// # Errors
    ///
    /// `Database`.
    pub async fn list_allocations_for_item(
        &self,
        id: StockItemId,
    ) -> Result<Vec<Allocation>, LedgerError> {
        let rows = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE stock_item_id = $1 ORDER BY id"
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Per-department allocation totals for one item, summed across
    /// duplicate department rows and sorted by department name.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Database`.
    pub async fn allocation_summary(
        &self,
        id: StockItemId,
    ) -> Result<Vec<DepartmentTotal>, LedgerError> {
        self.get_stock_item(id).await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT department, SUM(accepted_quantity)::bigint \
             FROM allocations WHERE stock_item_id = $1 \
             GROUP BY department ORDER BY department",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(department, quantity)| DepartmentTotal {
                department,
                quantity,
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    /// Create an empty register by name (step one of the two-step
    /// workflow).
    ///
    /// # Errors
    ///
    /// `Conflict` when the name is taken by a pending or populated
    /// register, `Validation` for an empty name, `Database`.
    pub async fn create_register(&self, name: &str) -> Result<(), LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "register name must not be empty".to_string(),
            ));
        }
        let mut tx = self.pool.begin().await?;
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM registers WHERE name = $1) \
                 OR EXISTS (SELECT 1 FROM stock_items WHERE register = $1)",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        if taken {
            return Err(LedgerError::Conflict(format!(
                "register '{name}' already exists"
            )));
        }
        sqlx::query("INSERT INTO registers (name) VALUES ($1)")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(register = name, "created empty register");
        Ok(())
    }

    /// Delete a pending empty register.
    ///
    /// # Errors
    ///
    /// `Conflict` when the register holds items, `RegisterNotFound`,
    /// `Database`.
    pub async fn delete_register(&self, name: &str) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let populated: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM stock_items WHERE register = $1)")
                .bind(name)
                .fetch_one(&mut *tx)
                .await?;
        if populated {
            return Err(LedgerError::Conflict(format!(
                "register '{name}' still holds stock items"
            )));
        }
        let deleted = sqlx::query("DELETE FROM registers WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(LedgerError::RegisterNotFound(name.to_string()));
        }
        tx.commit().await?;
        tracing::debug!(register = name, "deleted empty register");
        Ok(())
    }

    /// Per-register aggregates for populated registers plus pending empty
    /// registers, sorted by register name.
    ///
    /// # Errors
    ///
    /// `Database`.
    pub async fn list_registers(&self) -> Result<Vec<RegisterSummary>, LedgerError> {
        let populated: Vec<(String, i64, Decimal)> = sqlx::query_as(
            "SELECT register, COUNT(*)::bigint, COALESCE(SUM(total_cost), 0) \
             FROM stock_items GROUP BY register",
        )
        .fetch_all(&self.pool)
        .await?;
        let pending: Vec<(String,)> = sqlx::query_as("SELECT name FROM registers")
            .fetch_all(&self.pool)
            .await?;

        let mut summaries: Vec<RegisterSummary> = populated
            .into_iter()
            .map(|(name, item_count, total_value)| RegisterSummary {
                name,
                state: RegisterState::Populated,
                item_count,
                total_value,
            })
            .collect();
        summaries.extend(pending.into_iter().map(|(name,)| RegisterSummary {
            name,
            state: RegisterState::Empty,
            item_count: 0,
            total_value: Decimal::ZERO,
        }));
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    /// The stock items of one register, ordered by ID.
    ///
    /// # Errors
    ///
    /// `RegisterNotFound` for a name with neither items nor a pending
    /// register entry, `Database`.
    pub async fn register_items(&self, name: &str) -> Result<Vec<StockItem>, LedgerError> {
        let rows = sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE register = $1 ORDER BY id"
        ))
        .bind(name)
        .fetch_all(&self.pool)
        .await?;
        if rows.is_empty() {
            let pending: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM registers WHERE name = $1)")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?;
            if !pending {
                return Err(LedgerError::RegisterNotFound(name.to_string()));
            }
        }
        Ok(rows.into_iter().map(Into::into).collect())
    }

    // ------------------------------------------------------------------
    // Engine operations
    // ------------------------------------------------------------------

    /// Allocate quantity from a stock item to one or more departments,
    /// all-or-nothing, inside one transaction.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `InsufficientStock`, `Validation`, `Busy`,
    /// `Database`.
    pub async fn allocate_new(
        &self,
        id: StockItemId,
        requests: &[AllocationRequest],
    ) -> Result<EngineOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        let plan = plan::allocate_new(&item, &allocations, requests, Utc::now())?;
        let outcome = Self::apply_plan(&mut tx, &plan).await?;
        tx.commit().await?;
        tracing::debug!(
            stock_item = %id,
            rows = outcome.affected.len(),
            remaining = outcome.stock_item.remaining_quantity,
            "allocated stock to departments"
        );
        Ok(outcome)
    }

    /// Move previously allocated quantity between departments in one
    /// atomic transaction.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `AllocationNotFound`, `OverWithdrawal`,
    /// `OverDeposit`, `Validation`, `Busy`, `Database`. Any failure rolls
    /// the transaction back.
    pub async fn reallocate(
        &self,
        id: StockItemId,
        withdrawals: &[Withdrawal],
        deposits: &[AllocationRequest],
    ) -> Result<EngineOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        let plan = plan::reallocate(&item, &allocations, withdrawals, deposits, Utc::now())?;
        let outcome = Self::apply_plan(&mut tx, &plan).await?;
        tx.commit().await?;
        tracing::debug!(
            stock_item = %id,
            withdrawals = withdrawals.len(),
            deposits = deposits.len(),
            remaining = outcome.stock_item.remaining_quantity,
            "reallocated stock between departments"
        );
        Ok(outcome)
    }

    /// Return allocated quantity to the unallocated pool, with per-row
    /// partial success.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Validation` when no rows were given, `Busy`,
    /// `Database`; when every row fails, the first row's error.
    pub async fn deallocate(
        &self,
        id: StockItemId,
        returns: &[Withdrawal],
    ) -> Result<DeallocationOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        let planned = plan::deallocate(&item, &allocations, returns)?;
        let outcome = Self::apply_plan(&mut tx, &planned.plan).await?;
        tx.commit().await?;
        tracing::debug!(
            stock_item = %id,
            rows = outcome.affected.len(),
            skipped = planned.failures.len(),
            remaining = outcome.stock_item.remaining_quantity,
            "deallocated stock from departments"
        );
        Ok(DeallocationOutcome {
            stock_item: outcome.stock_item,
            affected: outcome.affected,
            failures: planned.failures,
        })
    }

    /// Return allocated quantity across many stock items in one call,
    /// resolving each row to its owning item and applying each item's
    /// group in its own transaction with per-row partial success.
    ///
    /// # Errors
    ///
    /// `Validation` when no rows were given, `Database`. Per-row
    /// failures are reported in the outcome.
    pub async fn bulk_deallocate(
        &self,
        returns: &[Withdrawal],
    ) -> Result<BulkDeallocationOutcome, LedgerError> {
        if returns.is_empty() {
            return Err(LedgerError::Validation(
                "no allocations selected for deallocation".to_string(),
            ));
        }

        let mut by_item: BTreeMap<StockItemId, Vec<Withdrawal>> = BTreeMap::new();
        let mut failures = Vec::new();
        for row in returns {
            match self.get_allocation(row.allocation_id).await {
                Ok(allocation) => by_item
                    .entry(allocation.stock_item_id)
                    .or_default()
                    .push(*row),
                Err(error) => failures.push(RowFailure {
                    allocation_id: row.allocation_id,
                    error,
                }),
            }
        }

        let mut stock_items = Vec::new();
        let mut affected = Vec::new();
        for (stock_item_id, rows) in by_item {
            match self.deallocate(stock_item_id, &rows).await {
                Ok(outcome) => {
                    stock_items.push(outcome.stock_item);
                    affected.extend(outcome.affected);
                    failures.extend(outcome.failures);
                }
                Err(error) => {
                    if let Some(first) = rows.first() {
                        failures.push(RowFailure {
                            allocation_id: first.allocation_id,
                            error,
                        });
                    }
                }
            }
        }
        tracing::debug!(
            rows = affected.len(),
            skipped = failures.len(),
            "bulk deallocation finished"
        );
        Ok(BulkDeallocationOutcome {
            stock_items,
            affected,
            failures,
        })
    }

    /// Change a stock item's purchased total and optionally its unit
    /// cost, cascading a cost change onto every active allocation.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `BelowAllocated`, `Validation`, `Busy`,
    /// `Database`.
    pub async fn edit_stock_quantity(
        &self,
        id: StockItemId,
        new_total_quantity: i64,
        new_unit_cost: Option<Decimal>,
    ) -> Result<EngineOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        let plan =
            plan::edit_stock_quantity(&item, &allocations, new_total_quantity, new_unit_cost)?;
        let outcome = Self::apply_plan(&mut tx, &plan).await?;
        tx.commit().await?;
        tracing::debug!(
            stock_item = %id,
            total = outcome.stock_item.total_quantity,
            remaining = outcome.stock_item.remaining_quantity,
            cascaded = outcome.affected.len(),
            "edited stock quantity"
        );
        Ok(outcome)
    }

    /// Delete a stock item with no active allocations.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Conflict` while allocations reference the
    /// item, `Busy`, `Database`.
    pub async fn delete_stock_item(&self, id: StockItemId) -> Result<(), LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        plan::ensure_deletable(&item, &allocations)?;
        sqlx::query("DELETE FROM stock_items WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::debug!(stock_item = %id, register = %item.register, "deleted stock item");
        Ok(())
    }

    /// Allocate one department across many stock items, replacing each
    /// item's first existing allocation, with per-item partial success.
    /// Each item commits in its own transaction.
    ///
    /// # Errors
    ///
    /// `Validation` when no items were given or the department name is
    /// empty. Per-item failures are reported in the outcome.
    pub async fn bulk_allocate(
        &self,
        department: &str,
        items: &[BulkAllocationItem],
    ) -> Result<BulkAllocationOutcome, LedgerError> {
        if items.is_empty() {
            return Err(LedgerError::Validation(
                "no items selected for bulk allocation".to_string(),
            ));
        }
        if department.trim().is_empty() {
            return Err(LedgerError::Validation(
                "bulk allocation requires a department".to_string(),
            ));
        }

        let mut allocated = Vec::new();
        let mut failures = Vec::new();
        for item in items {
            let request = AllocationRequest {
                department: department.to_string(),
                quantity: item.quantity,
                receipt_no: item.receipt_no.clone(),
                receipt_page_no: item.receipt_page_no.clone(),
            };
            match self.bulk_allocate_one(item.stock_item_id, &request).await {
                Ok(outcome) => allocated.extend(outcome.affected.last().copied()),
                Err(error) => failures.push(BulkRowFailure {
                    stock_item_id: item.stock_item_id,
                    error,
                }),
            }
        }
        tracing::debug!(
            department,
            allocated = allocated.len(),
            skipped = failures.len(),
            "bulk allocation finished"
        );
        Ok(BulkAllocationOutcome {
            allocated,
            failures,
        })
    }

    async fn bulk_allocate_one(
        &self,
        id: StockItemId,
        request: &AllocationRequest,
    ) -> Result<EngineOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;
        let (item, allocations) = Self::snapshot_for_update(&mut tx, id).await?;
        let plan = plan::bulk_replace_allocate(&item, &allocations, request, Utc::now())?;
        let outcome = Self::apply_plan(&mut tx, &plan).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------

    async fn lock_stock_item(
        tx: &mut Transaction<'_, Postgres>,
        id: StockItemId,
    ) -> Result<StockItem, LedgerError> {
        sqlx::query_as::<_, StockItemRow>(&format!(
            "SELECT {STOCK_ITEM_COLUMNS} FROM stock_items WHERE id = $1 FOR UPDATE NOWAIT"
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_lock_error(e, id))?
        .map(Into::into)
        .ok_or(LedgerError::StockItemNotFound(id))
    }

    /// Lock the stock item row and read it together with its active
    /// allocations. The item lock serializes engine operations per item,
    /// so the allocation rows cannot change under the plan.
    async fn snapshot_for_update(
        tx: &mut Transaction<'_, Postgres>,
        id: StockItemId,
    ) -> Result<(StockItem, Vec<Allocation>), LedgerError> {
        let item = Self::lock_stock_item(tx, id).await?;
        let rows = sqlx::query_as::<_, AllocationRow>(&format!(
            "SELECT {ALLOCATION_COLUMNS} FROM allocations WHERE stock_item_id = $1 ORDER BY id"
        ))
        .bind(id)
        .fetch_all(&mut **tx)
        .await?;
        Ok((item, rows.into_iter().map(Into::into).collect()))
    }

    async fn allocated_total(
        tx: &mut Transaction<'_, Postgres>,
        id: StockItemId,
    ) -> Result<i64, LedgerError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(accepted_quantity), 0)::bigint \
             FROM allocations WHERE stock_item_id = $1",
        )
        .bind(id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(total)
    }

    /// Apply a mutation plan inside the transaction: allocation deletes,
    /// then updates, then inserts, then the stock row overwrite.
    async fn apply_plan(
        tx: &mut Transaction<'_, Postgres>,
        plan: &MutationPlan,
    ) -> Result<EngineOutcome, LedgerError> {
        let mut affected = Vec::new();

        for allocation_id in &plan.deletes {
            let deleted = sqlx::query("DELETE FROM allocations WHERE id = $1")
                .bind(*allocation_id)
                .execute(&mut **tx)
                .await?
                .rows_affected();
            if deleted == 0 {
                return Err(LedgerError::AllocationNotFound(*allocation_id));
            }
            affected.push(*allocation_id);
        }

        for patch in &plan.updates {
            let updated = sqlx::query(
                "UPDATE allocations \
                 SET accepted_quantity = $2, unit_cost = $3, total_cost = $4 \
                 WHERE id = $1",
            )
            .bind(patch.id)
            .bind(patch.accepted_quantity)
            .bind(patch.unit_cost)
            .bind(patch.total_cost)
            .execute(&mut **tx)
            .await?
            .rows_affected();
            if updated == 0 {
                return Err(LedgerError::AllocationNotFound(patch.id));
            }
            affected.push(patch.id);
        }

        for draft in &plan.inserts {
            let (inserted_id,): (AllocationId,) = sqlx::query_as(
                "INSERT INTO allocations \
                     (stock_item_id, department, accepted_quantity, unit_cost, total_cost, \
                      receipt_no, receipt_page_no, received_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 RETURNING id",
            )
            .bind(draft.stock_item_id)
            .bind(&draft.department)
            .bind(draft.accepted_quantity)
            .bind(draft.unit_cost)
            .bind(draft.total_cost)
            .bind(&draft.receipt_no)
            .bind(&draft.receipt_page_no)
            .bind(draft.received_at)
            .fetch_one(&mut **tx)
            .await?;
            affected.push(inserted_id);
        }

        let row = sqlx::query_as::<_, StockItemRow>(&format!(
            "UPDATE stock_items SET \
                 total_quantity = $2, unit_cost = $3, total_cost = $4, remaining_quantity = $5 \
             WHERE id = $1 \
             RETURNING {STOCK_ITEM_COLUMNS}"
        ))
        .bind(plan.stock_item_id)
        .bind(plan.stock.total_quantity)
        .bind(plan.stock.unit_cost)
        .bind(plan.stock.total_cost)
        .bind(plan.stock.remaining_quantity)
        .fetch_one(&mut **tx)
        .await?;

        Ok(EngineOutcome {
            stock_item: row.into(),
            affected,
        })
    }
}
