//! Stock Record Store and Allocation Record Store.
//!
//! The stock store holds the central register entries; the allocation
//! store holds the per-department allocation rows. Field-level invariants
//! (`accepted_quantity > 0`, non-negative quantities and costs) are
//! enforced here; cross-record validation lives in the
//! [`engine`](crate::engine), except where the store contract itself
//! demands it (a direct stock update may not undershoot the allocated
//! total, a delete is refused while allocations reference the item).

pub mod memory;

pub use memory::MemoryStore;
