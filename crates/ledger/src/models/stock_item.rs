//! Stock item (central stock register entry) domain models.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockbook_core::StockItemId;

/// A stock item - a purchased-goods ledger entry in a named register.
///
/// `remaining_quantity` is maintained incrementally by the allocation
/// engine; after every successful engine operation it equals
/// `total_quantity` minus the summed `accepted_quantity` of the active
/// allocations referencing this item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockItem {
    /// Unique stock item ID.
    pub id: StockItemId,
    /// Register (named grouping) this item belongs to. Non-unique.
    pub register: String,
    /// Free-form item description.
    pub description: String,
    /// Product category.
    pub category: String,
    /// Product type.
    pub item_type: String,
    /// Supplier name.
    pub supplier: String,
    /// Year of purchase, as recorded on the invoice.
    pub purchase_year: String,
    /// Date of purchase, if known.
    pub purchase_date: Option<NaiveDate>,
    /// Total units ever purchased for this record.
    pub total_quantity: i64,
    /// Cost of a single unit.
    pub unit_cost: Decimal,
    /// `total_quantity * unit_cost`, recomputed whenever either changes.
    pub total_cost: Decimal,
    /// Units not currently allocated to any department.
    pub remaining_quantity: i64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new stock item.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStockItemInput {
    /// Register this item belongs to.
    pub register: String,
    /// Free-form item description.
    pub description: String,
    /// Product category.
    pub category: String,
    /// Product type.
    pub item_type: String,
    /// Supplier name.
    pub supplier: String,
    /// Year of purchase.
    pub purchase_year: String,
    /// Date of purchase, if known.
    pub purchase_date: Option<NaiveDate>,
    /// Total units purchased.
    pub total_quantity: i64,
    /// Cost of a single unit.
    pub unit_cost: Decimal,
}

/// Input for updating a stock item. `None` fields are left unchanged.
///
/// Setting `total_quantity` below the item's currently allocated total
/// fails with a validation error; quantity or cost changes recompute
/// `total_cost` and adjust `remaining_quantity` by the quantity delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStockItemInput {
    /// Free-form item description.
    pub description: Option<String>,
    /// Product category.
    pub category: Option<String>,
    /// Product type.
    pub item_type: Option<String>,
    /// Supplier name.
    pub supplier: Option<String>,
    /// Year of purchase.
    pub purchase_year: Option<String>,
    /// Date of purchase.
    pub purchase_date: Option<NaiveDate>,
    /// Total units purchased.
    pub total_quantity: Option<i64>,
    /// Cost of a single unit.
    pub unit_cost: Option<Decimal>,
}

/// Lifecycle state of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterState {
    /// Created but holding no stock items yet.
    Empty,
    /// Holds at least one stock item.
    Populated,
}

/// A register handle from the explicit two-step creation workflow:
/// `create_register` yields an `Empty` register, creating its first stock
/// item transitions it to `Populated`. A populated register's existence
/// is derived from its items; deleting the last item makes it disappear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    /// Register name.
    pub name: String,
    /// Lifecycle state.
    pub state: RegisterState,
}

/// Per-register aggregate for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterSummary {
    /// Register name.
    pub name: String,
    /// Lifecycle state.
    pub state: RegisterState,
    /// Number of stock items in the register.
    pub item_count: i64,
    /// Sum of `total_cost` over the register's items.
    pub total_value: Decimal,
}
