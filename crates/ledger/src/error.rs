//! Unified error handling for the ledger.

use stockbook_core::{AllocationId, StockItemId};
use thiserror::Error;

/// Errors that can occur during store and engine operations.
///
/// Every validation failure names the offending row, department, or
/// quantity delta so a caller can render an actionable message. No
/// precondition failure leaves a partial mutation behind, with the single
/// documented exception of per-row deallocation (see
/// [`crate::engine::AllocationEngine::deallocate`]).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Referenced stock item does not exist.
    #[error("stock item {0} not found")]
    StockItemNotFound(StockItemId),

    /// Referenced allocation does not exist (or belongs to another item).
    #[error("allocation {0} not found")]
    AllocationNotFound(AllocationId),

    /// Referenced register does not exist.
    #[error("register '{0}' not found")]
    RegisterNotFound(String),

    /// An allocation request exceeds the item's unallocated quantity.
    #[error("cannot allocate {requested} units: only {available} remaining")]
    InsufficientStock { requested: i64, available: i64 },

    /// A withdrawal exceeds the quantity held by the named allocation.
    #[error(
        "cannot withdraw {requested} units from allocation {allocation_id} \
         ({department}): only {held} allocated"
    )]
    OverWithdrawal {
        allocation_id: AllocationId,
        department: String,
        requested: i64,
        held: i64,
    },

    /// Reallocation deposits exceed the total withdrawn in the same call.
    #[error("deposits total {deposited} units but only {withdrawn} were withdrawn")]
    OverDeposit { deposited: i64, withdrawn: i64 },

    /// A quantity edit would undershoot the item's active allocations.
    #[error("cannot reduce total quantity to {requested}: {allocated} units are allocated")]
    BelowAllocated { requested: i64, allocated: i64 },

    /// Operation blocked by existing references (e.g., delete with
    /// active allocations, duplicate register name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input: negative or zero quantities, empty names.
    #[error("validation error: {0}")]
    Validation(String),

    /// The stock item is locked by a concurrent operation and the lock
    /// could not be acquired in time. Retryable.
    #[error("stock item {0} is busy, try again")]
    Busy(StockItemId),

    /// Database error from sqlx.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
