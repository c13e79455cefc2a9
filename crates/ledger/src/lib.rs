//! Stockbook - durable-goods stock and allocation ledger.
//!
//! Tracks central stock records ("registers" of purchased items with a total
//! and remaining quantity) and the allocation of portions of that stock to
//! departments, with partial allocation, reallocation between departments,
//! and deallocation back to available stock.
//!
//! The central correctness property: after every successful engine
//! operation, a stock item's `remaining_quantity` equals its
//! `total_quantity` minus the sum of `accepted_quantity` over the active
//! allocations that reference it. The invariant is maintained
//! incrementally, never recomputed on read, so every mutation path goes
//! through the [`engine`].
//!
//! # Modules
//!
//! - [`models`] - Domain types: [`models::StockItem`], [`models::Allocation`],
//!   operation inputs and register summaries
//! - [`store`] - Stock Record Store and Allocation Record Store, with the
//!   in-memory [`store::MemoryStore`] implementation
//! - [`engine`] - The allocation engine: validated, atomic quantity movement
//! - [`query`] - Read-only reporting over the stores
//! - [`db`] - `PostgreSQL` persistence (feature `postgres`, enabled by default)

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod engine;
pub mod error;
pub mod models;
pub mod query;
pub mod store;

#[cfg(feature = "postgres")]
pub mod db;

pub use engine::AllocationEngine;
pub use error::LedgerError;
pub use store::MemoryStore;
