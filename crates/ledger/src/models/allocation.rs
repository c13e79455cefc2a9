//! Allocation (departmental stock register entry) domain models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::{AllocationId, StockItemId};

/// A record of quantity committed to one department from one stock item.
///
/// `accepted_quantity` is strictly positive for as long as the record
/// exists; a record whose quantity reaches zero is deleted, never stored.
/// Several allocations for the same (item, department) pair may coexist;
/// queries aggregate across them by summing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    /// Unique allocation ID.
    pub id: AllocationId,
    /// Owning stock item. Not an enforced foreign key; the engine checks
    /// it defensively on every operation.
    pub stock_item_id: StockItemId,
    /// Receiving department.
    pub department: String,
    /// Units committed to the department. Always positive.
    pub accepted_quantity: i64,
    /// Snapshot of the stock item's unit cost at allocation time. Tracks
    /// later cost edits only through the engine's explicit cascade.
    pub unit_cost: Decimal,
    /// `accepted_quantity * unit_cost`, recomputed on every quantity change.
    pub total_cost: Decimal,
    /// Departmental receipt register number, if recorded.
    pub receipt_no: Option<String>,
    /// Departmental receipt register page number, if recorded.
    pub receipt_page_no: Option<String>,
    /// When the department received the allocation. Not mutated on update.
    pub received_at: DateTime<Utc>,
}

/// One requested (department, quantity) pair for allocation or
/// reallocation deposits.
#[derive(Debug, Clone, Deserialize)]
pub struct AllocationRequest {
    /// Receiving department.
    pub department: String,
    /// Units to allocate. Must be positive.
    pub quantity: i64,
    /// Departmental receipt register number, if recorded.
    pub receipt_no: Option<String>,
    /// Departmental receipt register page number, if recorded.
    pub receipt_page_no: Option<String>,
}

impl AllocationRequest {
    /// Convenience constructor for a plain department/quantity pair.
    #[must_use]
    pub fn new(department: impl Into<String>, quantity: i64) -> Self {
        Self {
            department: department.into(),
            quantity,
            receipt_no: None,
            receipt_page_no: None,
        }
    }
}

/// One (allocation, quantity) pair to withdraw for reallocation or
/// deallocation.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Withdrawal {
    /// Allocation to withdraw from.
    pub allocation_id: AllocationId,
    /// Units to withdraw. Must be positive and at most the allocation's
    /// `accepted_quantity`.
    pub quantity: i64,
}

impl Withdrawal {
    /// Create a withdrawal request.
    #[must_use]
    pub const fn new(allocation_id: AllocationId, quantity: i64) -> Self {
        Self {
            allocation_id,
            quantity,
        }
    }
}

/// Input for a direct allocation record edit. `None` fields are left
/// unchanged; a quantity change recomputes `total_cost`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAllocationInput {
    /// Receiving department.
    pub department: Option<String>,
    /// Units committed. Must be positive.
    pub accepted_quantity: Option<i64>,
    /// Departmental receipt register number.
    pub receipt_no: Option<String>,
    /// Departmental receipt register page number.
    pub receipt_page_no: Option<String>,
}
