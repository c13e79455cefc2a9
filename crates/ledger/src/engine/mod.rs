//! The allocation engine - validated, atomic quantity movement between a
//! stock item and its per-department allocations.
//!
//! Each operation is one unit of work against a single stock item: the
//! engine acquires the item's write lock (bounded, surfacing
//! [`LedgerError::Busy`] on timeout), snapshots the item and its active
//! allocations, validates and plans the mutation through
//! [`plan`], and applies the plan in one store critical section. Either
//! every mutation of the operation commits or none does, with the single
//! documented exception of [`AllocationEngine::deallocate`]'s per-row
//! partial success.

pub mod plan;

use std::collections::BTreeMap;

use chrono::Utc;
use rust_decimal::Decimal;

use stockbook_core::{AllocationId, StockItemId};

use crate::error::LedgerError;
use crate::models::{Allocation, AllocationRequest, StockItem, Withdrawal};
use crate::store::MemoryStore;

pub use plan::RowFailure;

/// Result of a successful engine operation: the updated stock item and
/// the allocations created, updated, or deleted by it.
#[derive(Debug)]
pub struct EngineOutcome {
    /// The stock item after the operation.
    pub stock_item: StockItem,
    /// IDs of every allocation row the operation touched.
    pub affected: Vec<AllocationId>,
}

/// Result of a deallocation call: valid rows applied, invalid rows
/// reported individually.
#[derive(Debug)]
pub struct DeallocationOutcome {
    /// The stock item after the valid rows were applied.
    pub stock_item: StockItem,
    /// IDs of every allocation row the operation touched.
    pub affected: Vec<AllocationId>,
    /// Rows skipped by validation, with the reason.
    pub failures: Vec<RowFailure>,
}

/// Result of a bulk deallocation call spanning several stock items.
#[derive(Debug)]
pub struct BulkDeallocationOutcome {
    /// The updated stock items, one per item that had valid rows.
    pub stock_items: Vec<StockItem>,
    /// IDs of every allocation row the operation touched.
    pub affected: Vec<AllocationId>,
    /// Rows skipped by validation, with the reason.
    pub failures: Vec<RowFailure>,
}

/// One item of a bulk allocation request.
#[derive(Debug, Clone)]
pub struct BulkAllocationItem {
    /// Stock item to allocate from.
    pub stock_item_id: StockItemId,
    /// Units to allocate to the bulk call's department.
    pub quantity: i64,
    /// Departmental receipt register number, if recorded.
    pub receipt_no: Option<String>,
    /// Departmental receipt register page number, if recorded.
    pub receipt_page_no: Option<String>,
}

/// An item skipped during bulk allocation, with the reason.
#[derive(Debug)]
pub struct BulkRowFailure {
    /// The stock item whose allocation was skipped.
    pub stock_item_id: StockItemId,
    /// Why the item was skipped.
    pub error: LedgerError,
}

/// Result of a bulk allocation call.
#[derive(Debug)]
pub struct BulkAllocationOutcome {
    /// The allocations created, one per successful item.
    pub allocated: Vec<AllocationId>,
    /// Items skipped by validation, with the reason.
    pub failures: Vec<BulkRowFailure>,
}

/// The allocation engine over the in-memory store.
pub struct AllocationEngine<'a> {
    store: &'a MemoryStore,
}

impl<'a> AllocationEngine<'a> {
    /// Create an engine over a store.
    #[must_use]
    pub const fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    fn locked<T>(
        &self,
        id: StockItemId,
        op: impl FnOnce() -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let cell = self.store.lock_cell(id);
        let _guard = MemoryStore::acquire(&cell, self.store.lock_timeout())
            .ok_or(LedgerError::Busy(id))?;
        op()
    }

    /// Allocate quantity from a stock item to one or more departments,
    /// all-or-nothing. Each request produces an independent allocation
    /// row; pre-existing rows for the same department are never merged.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `InsufficientStock` when the requested total
    /// exceeds the unallocated quantity, `Validation` for malformed
    /// requests, `Busy` when the item lock cannot be acquired in time.
    pub fn allocate_new(
        &self,
        id: StockItemId,
        requests: &[AllocationRequest],
    ) -> Result<EngineOutcome, LedgerError> {
        self.locked(id, || {
            let (item, allocations) = self.store.snapshot(id)?;
            let plan = plan::allocate_new(&item, &allocations, requests, Utc::now())?;
            let (stock_item, affected) = self.store.apply_plan(&plan)?;
            tracing::debug!(
                stock_item = %id,
                rows = affected.len(),
                remaining = stock_item.remaining_quantity,
                "allocated stock to departments"
            );
            Ok(EngineOutcome {
                stock_item,
                affected,
            })
        })
    }

    /// Move previously allocated quantity between departments in one
    /// atomic call: withdraw from existing allocations, deposit onto new
    /// department rows. Deposits may split the withdrawn quantity across
    /// several departments; quantity withdrawn but not redeposited
    /// returns to the unallocated pool.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `AllocationNotFound`, `OverWithdrawal`,
    /// `OverDeposit`, `Validation`, `Busy`. Any failure leaves both
    /// stores untouched.
    pub fn reallocate(
        &self,
        id: StockItemId,
        withdrawals: &[Withdrawal],
        deposits: &[AllocationRequest],
    ) -> Result<EngineOutcome, LedgerError> {
        self.locked(id, || {
            let (item, allocations) = self.store.snapshot(id)?;
            let plan = plan::reallocate(&item, &allocations, withdrawals, deposits, Utc::now())?;
            let (stock_item, affected) = self.store.apply_plan(&plan)?;
            tracing::debug!(
                stock_item = %id,
                withdrawals = withdrawals.len(),
                deposits = deposits.len(),
                remaining = stock_item.remaining_quantity,
                "reallocated stock between departments"
            );
            Ok(EngineOutcome {
                stock_item,
                affected,
            })
        })
    }

    /// Return allocated quantity to the unallocated pool. Per-row partial
    /// success is explicit policy: rows failing validation are skipped
    /// and reported while the remaining rows still apply. A row
    /// deallocated in full is deleted, never kept at zero.
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Validation` when no rows were given, `Busy`;
    /// when every row fails, the first row's error (nothing is mutated).
    pub fn deallocate(
        &self,
        id: StockItemId,
        returns: &[Withdrawal],
    ) -> Result<DeallocationOutcome, LedgerError> {
        self.locked(id, || {
            let (item, allocations) = self.store.snapshot(id)?;
            let planned = plan::deallocate(&item, &allocations, returns)?;
            let (stock_item, affected) = self.store.apply_plan(&planned.plan)?;
            tracing::debug!(
                stock_item = %id,
                rows = affected.len(),
                skipped = planned.failures.len(),
                remaining = stock_item.remaining_quantity,
                "deallocated stock from departments"
            );
            Ok(DeallocationOutcome {
                stock_item,
                affected,
                failures: planned.failures,
            })
        })
    }

    /// Return allocated quantity across many stock items in one call.
    /// Each row is resolved to its owning stock item, rows are grouped
    /// per item, and each group applies under that item's lock with the
    /// same per-row partial success policy as
    /// [`AllocationEngine::deallocate`]. Rows referencing unknown
    /// allocations are reported and skipped.
    ///
    /// # Errors
    ///
    /// `Validation` when no rows were given. Per-row failures
    /// (`AllocationNotFound`, `OverWithdrawal`, `Busy`) are reported in
    /// the outcome.
    pub fn bulk_deallocate(
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
            match self.store.get_allocation(row.allocation_id) {
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
            match self.deallocate(stock_item_id, &rows) {
                Ok(outcome) => {
                    stock_items.push(outcome.stock_item);
                    affected.extend(outcome.affected);
                    failures.extend(outcome.failures);
                }
                // Every row of the group failed (or the item is busy);
                // the surfaced error is the group's first failure.
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
    /// cost. A cost change cascades onto every active allocation,
    /// recomputing each row's total at the new unit cost; deleted
    /// historical allocations are untouched (there is no history).
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `BelowAllocated` when the new total
    /// undershoots the allocated quantity, `Validation`, `Busy`.
    pub fn edit_stock_quantity(
        &self,
        id: StockItemId,
        new_total_quantity: i64,
        new_unit_cost: Option<Decimal>,
    ) -> Result<EngineOutcome, LedgerError> {
        self.locked(id, || {
            let (item, allocations) = self.store.snapshot(id)?;
            let plan =
                plan::edit_stock_quantity(&item, &allocations, new_total_quantity, new_unit_cost)?;
            let (stock_item, affected) = self.store.apply_plan(&plan)?;
            tracing::debug!(
                stock_item = %id,
                total = stock_item.total_quantity,
                remaining = stock_item.remaining_quantity,
                cascaded = affected.len(),
                "edited stock quantity"
            );
            Ok(EngineOutcome {
                stock_item,
                affected,
            })
        })
    }

    /// Delete a stock item with no active allocations. If it was the
    /// last item of its register, the register disappears with it
    /// (register existence is derived from items).
    ///
    /// # Errors
    ///
    /// `StockItemNotFound`, `Conflict` while allocations reference the
    /// item, `Busy`.
    pub fn delete_stock_item(&self, id: StockItemId) -> Result<(), LedgerError> {
        self.locked(id, || {
            let (item, allocations) = self.store.snapshot(id)?;
            plan::ensure_deletable(&item, &allocations)?;
            self.store.delete_stock_item(id)?;
            tracing::debug!(stock_item = %id, register = %item.register, "deleted stock item");
            Ok(())
        })
    }

    /// Allocate one department across many stock items in one call, with
    /// per-item partial success. Each item's first existing allocation
    /// (if any) is returned to stock before the new row is created -
    /// bulk allocation replaces rather than accumulates. Items failing
    /// validation are reported and skipped without mutation.
    ///
    /// # Errors
    ///
    /// `Validation` when no items were given or the department name is
    /// empty. Per-item failures (`StockItemNotFound`,
    /// `InsufficientStock`, `Busy`) are reported in the outcome.
    pub fn bulk_allocate(
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
            let result = self.locked(item.stock_item_id, || {
                let (stock_item, allocations) = self.store.snapshot(item.stock_item_id)?;
                let plan =
                    plan::bulk_replace_allocate(&stock_item, &allocations, &request, Utc::now())?;
                self.store.apply_plan(&plan)
            });
            match result {
                Ok((_, affected)) => {
                    // The insert is the last affected row of the plan.
                    allocated.extend(affected.last().copied());
                }
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
}
