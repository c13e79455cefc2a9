//! Domain models for the stock and allocation ledger.

pub mod allocation;
pub mod stock_item;

pub use allocation::{Allocation, AllocationRequest, UpdateAllocationInput, Withdrawal};
pub use stock_item::{
    CreateStockItemInput, Register, RegisterState, RegisterSummary, StockItem,
    UpdateStockItemInput,
};
