//! Read-only reporting over the two record stores.
//!
//! Nothing here mutates state; summaries are derived fresh from the
//! stores on every call. Department summaries are sorted by department
//! name so output is deterministic across calls.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::StockItemId;

use crate::error::LedgerError;
use crate::models::{RegisterState, RegisterSummary, StockItem};
use crate::store::MemoryStore;

/// Summed allocation per department for one stock item. Duplicate rows
/// for a department are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartmentTotal {
    /// Receiving department.
    pub department: String,
    /// Total units currently allocated to the department.
    pub quantity: i64,
}

/// One row of the allocation status report.
#[derive(Debug, Clone, Serialize)]
pub struct StockAllocationStatus {
    /// The stock item.
    pub item: StockItem,
    /// Whether the item's unallocated quantity is zero.
    pub is_fully_allocated: bool,
    /// Whether any allocation references the item.
    pub has_allocations: bool,
    /// Per-department totals, sorted by department name.
    pub departments: Vec<DepartmentTotal>,
}

/// Allocation status filter for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationStatusFilter {
    /// All items.
    #[default]
    All,
    /// Items with zero remaining quantity.
    FullyAllocated,
    /// Items with remaining quantity.
    NotFullyAllocated,
}

/// Read-only queries over a store.
pub struct Reporting<'a> {
    store: &'a MemoryStore,
}

impl<'a> Reporting<'a> {
    /// Create a reporting view over a store.
    #[must_use]
    pub const fn new(store: &'a MemoryStore) -> Self {
        Self { store }
    }

    /// Whether the item's unallocated quantity is zero.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist.
    pub fn is_fully_allocated(&self, id: StockItemId) -> Result<bool, LedgerError> {
        Ok(self.store.get_stock_item(id)?.remaining_quantity == 0)
    }

    /// Per-department allocation totals for one item, summed across
    /// duplicate department rows and sorted by department name.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist.
    pub fn allocation_summary(
        &self,
        id: StockItemId,
    ) -> Result<Vec<DepartmentTotal>, LedgerError> {
        // Existence check first so an unknown ID is not an empty summary.
        self.store.get_stock_item(id)?;
        let mut totals: BTreeMap<String, i64> = BTreeMap::new();
        for allocation in self.store.list_allocations_for_item(id) {
            *totals.entry(allocation.department).or_insert(0) += allocation.accepted_quantity;
        }
        Ok(totals
            .into_iter()
            .map(|(department, quantity)| DepartmentTotal {
                department,
                quantity,
            })
            .collect())
    }

    /// The allocation status report: every item with its allocation
    /// state and per-department totals, optionally filtered by
    /// fully/not-fully allocated.
    #[must_use]
    pub fn allocation_report(&self, filter: AllocationStatusFilter) -> Vec<StockAllocationStatus> {
        self.store
            .list_stock_items()
            .into_iter()
            .filter(|item| match filter {
                AllocationStatusFilter::All => true,
                AllocationStatusFilter::FullyAllocated => item.remaining_quantity == 0,
                AllocationStatusFilter::NotFullyAllocated => item.remaining_quantity != 0,
            })
            .map(|item| {
                let departments = self.allocation_summary(item.id).unwrap_or_default();
                StockAllocationStatus {
                    is_fully_allocated: item.remaining_quantity == 0,
                    has_allocations: !departments.is_empty(),
                    departments,
                    item,
                }
            })
            .collect()
    }

    /// Per-register aggregates: item count and total value for populated
    /// registers, plus pending empty registers from the two-step
    /// creation workflow. Sorted by register name.
    #[must_use]
    pub fn list_registers(&self) -> Vec<RegisterSummary> {
        let mut by_name: BTreeMap<String, (i64, Decimal)> = BTreeMap::new();
        for item in self.store.list_stock_items() {
            let entry = by_name.entry(item.register).or_insert((0, Decimal::ZERO));
            entry.0 += 1;
            entry.1 += item.total_cost;
        }
        let mut summaries: Vec<RegisterSummary> = by_name
            .into_iter()
            .map(|(name, (item_count, total_value))| RegisterSummary {
                name,
                state: RegisterState::Populated,
                item_count,
                total_value,
            })
            .collect();
        for name in self.store.pending_registers() {
            summaries.push(RegisterSummary {
                name,
                state: RegisterState::Empty,
                item_count: 0,
                total_value: Decimal::ZERO,
            });
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// The stock items of one register, ordered by ID.
    ///
    /// # Errors
    ///
    /// Returns `RegisterNotFound` for a name with neither items nor a
    /// pending register entry.
    pub fn register_items(&self, name: &str) -> Result<Vec<StockItem>, LedgerError> {
        let items = self.store.list_register_items(name);
        if items.is_empty() && !self.store.pending_registers().iter().any(|r| r == name) {
            return Err(LedgerError::RegisterNotFound(name.to_string()));
        }
        Ok(items)
    }
}

/// Format a department summary for display: `"Physics (30), Chemistry (20)"`.
#[must_use]
pub fn summary_line(summary: &[DepartmentTotal]) -> String {
    summary
        .iter()
        .map(|t| format!("{} ({})", t.department, t.quantity))
        .collect::<Vec<_>>()
        .join(", ")
}
