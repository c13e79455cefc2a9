//! In-memory implementation of the two record stores.
//!
//! Both stores live behind one `RwLock`, so a single engine plan is
//! applied in one write critical section and readers always observe a
//! consistent pair of stores. Engine operations additionally serialize
//! per stock item through [`MemoryStore::lock_cell`]; acquisition is
//! bounded by [`MemoryStore::lock_timeout`] and surfaces as
//! [`LedgerError::Busy`] instead of blocking indefinitely.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError};
use std::time::{Duration, Instant};

use chrono::Utc;
use rust_decimal::Decimal;

use stockbook_core::{AllocationId, StockItemId};

use crate::engine::plan::MutationPlan;
use crate::error::LedgerError;
use crate::models::{
    Allocation, CreateStockItemInput, Register, RegisterState, StockItem, UpdateAllocationInput,
    UpdateStockItemInput,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_micros(500);

#[derive(Default)]
struct State {
    items: BTreeMap<StockItemId, StockItem>,
    allocations: BTreeMap<AllocationId, Allocation>,
    /// Registers created through the two-step workflow that hold no
    /// items yet. A populated register exists only through its items.
    pending_registers: BTreeSet<String>,
    next_item_id: i32,
    next_allocation_id: i32,
}

/// In-memory stock + allocation record store.
pub struct MemoryStore {
    inner: RwLock<State>,
    locks: Mutex<HashMap<StockItemId, Arc<Mutex<()>>>>,
    lock_timeout: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create an empty store with the default lock timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store with a custom per-item lock timeout.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(State::default()),
            locks: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    /// The deadline applied when acquiring a per-item lock.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// The lock cell serializing engine operations on one stock item.
    #[must_use]
    pub fn lock_cell(&self, id: StockItemId) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id).or_default())
    }

    /// Try to acquire `cell` within `timeout`. Returns `None` on timeout.
    #[must_use]
    pub fn acquire(cell: &Mutex<()>, timeout: Duration) -> Option<MutexGuard<'_, ()>> {
        let deadline = Instant::now() + timeout;
        loop {
            match cell.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
            }
        }
    }

    // =========================================================================
    // Stock Record Store
    // =========================================================================

    /// Create a new stock item. A freshly created item has nothing
    /// allocated, so `remaining_quantity` starts at `total_quantity`.
    /// Creating the first item of a pending register transitions that
    /// register to populated.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty register name, negative
    /// quantity, or negative unit cost.
    pub fn create_stock_item(
        &self,
        input: &CreateStockItemInput,
    ) -> Result<StockItem, LedgerError> {
        if input.register.trim().is_empty() {
            return Err(LedgerError::Validation(
                "register name must not be empty".to_string(),
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

        let mut state = write_lock(&self.inner);
        state.next_item_id += 1;
        let item = StockItem {
            id: StockItemId::new(state.next_item_id),
            register: input.register.clone(),
            description: input.description.clone(),
            category: input.category.clone(),
            item_type: input.item_type.clone(),
            supplier: input.supplier.clone(),
            purchase_year: input.purchase_year.clone(),
            purchase_date: input.purchase_date,
            total_quantity: input.total_quantity,
            unit_cost: input.unit_cost,
            total_cost: Decimal::from(input.total_quantity) * input.unit_cost,
            remaining_quantity: input.total_quantity,
            created_at: Utc::now(),
        };
        state.pending_registers.remove(&item.register);
        state.items.insert(item.id, item.clone());
        Ok(item)
    }

    /// Get a stock item by ID.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist.
    pub fn get_stock_item(&self, id: StockItemId) -> Result<StockItem, LedgerError> {
        read_lock(&self.inner)
            .items
            .get(&id)
            .cloned()
            .ok_or(LedgerError::StockItemNotFound(id))
    }

    /// List all stock items, ordered by ID.
    #[must_use]
    pub fn list_stock_items(&self) -> Vec<StockItem> {
        read_lock(&self.inner).items.values().cloned().collect()
    }

    /// List the stock items of one register, ordered by ID.
    #[must_use]
    pub fn list_register_items(&self, register: &str) -> Vec<StockItem> {
        read_lock(&self.inner)
            .items
            .values()
            .filter(|item| item.register == register)
            .cloned()
            .collect()
    }

    /// Update a stock item's fields directly. Quantity or cost changes
    /// recompute `total_cost`; a quantity change shifts
    /// `remaining_quantity` by the same delta.
    ///
    /// This is the low-level edit path and performs no cost cascade onto
    /// allocations; use the engine's `edit_stock_quantity` for the full
    /// edit semantics.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist and
    /// `Validation` when `total_quantity` would undershoot the item's
    /// currently allocated total or an input is negative.
    pub fn update_stock_item(
        &self,
        id: StockItemId,
        input: &UpdateStockItemInput,
    ) -> Result<StockItem, LedgerError> {
        let mut state = write_lock(&self.inner);
        let allocated: i64 = state
            .allocations
            .values()
            .filter(|a| a.stock_item_id == id)
            .map(|a| a.accepted_quantity)
            .sum();
        let item = state
            .items
            .get_mut(&id)
            .ok_or(LedgerError::StockItemNotFound(id))?;

        // Validate every input before the first mutation, so a failed
        // call never leaves a partial change behind.
        if let Some(new_total) = input.total_quantity
            && new_total < allocated
        {
            return Err(LedgerError::Validation(format!(
                "total quantity {new_total} is below the allocated total {allocated}"
            )));
        }
        if let Some(cost) = input.unit_cost
            && cost < Decimal::ZERO
        {
            return Err(LedgerError::Validation(format!(
                "unit cost {cost} must not be negative"
            )));
        }

        if let Some(new_total) = input.total_quantity {
            item.remaining_quantity += new_total - item.total_quantity;
            item.total_quantity = new_total;
        }
        if let Some(cost) = input.unit_cost {
            item.unit_cost = cost;
        }
        if input.total_quantity.is_some() || input.unit_cost.is_some() {
            item.total_cost = Decimal::from(item.total_quantity) * item.unit_cost;
        }
        if let Some(description) = &input.description {
            item.description = description.clone();
        }
        if let Some(category) = &input.category {
            item.category = category.clone();
        }
        if let Some(item_type) = &input.item_type {
            item.item_type = item_type.clone();
        }
        if let Some(supplier) = &input.supplier {
            item.supplier = supplier.clone();
        }
        if let Some(year) = &input.purchase_year {
            item.purchase_year = year.clone();
        }
        if let Some(date) = input.purchase_date {
            item.purchase_date = Some(date);
        }
        Ok(item.clone())
    }

    /// Delete a stock item.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist and
    /// `Conflict` while any allocation references it.
    pub fn delete_stock_item(&self, id: StockItemId) -> Result<(), LedgerError> {
        let mut state = write_lock(&self.inner);
        let item = state
            .items
            .get(&id)
            .ok_or(LedgerError::StockItemNotFound(id))?;
        let referencing = state
            .allocations
            .values()
            .filter(|a| a.stock_item_id == id)
            .count();
        if referencing > 0 {
            return Err(LedgerError::Conflict(format!(
                "stock item {} still has {} active allocation(s); deallocate first",
                item.id, referencing
            )));
        }
        state.items.remove(&id);
        drop(state);
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        Ok(())
    }

    // =========================================================================
    // Allocation Record Store
    // =========================================================================

    /// Get an allocation by ID.
    ///
    /// # Errors
    ///
    /// Returns `AllocationNotFound` if the allocation doesn't exist.
    pub fn get_allocation(&self, id: AllocationId) -> Result<Allocation, LedgerError> {
        read_lock(&self.inner)
            .allocations
            .get(&id)
            .cloned()
            .ok_or(LedgerError::AllocationNotFound(id))
    }

    /// List the active allocations referencing one stock item, ordered
    /// by allocation ID (creation order).
    #[must_use]
    pub fn list_allocations_for_item(&self, stock_item_id: StockItemId) -> Vec<Allocation> {
        read_lock(&self.inner)
            .allocations
            .values()
            .filter(|a| a.stock_item_id == stock_item_id)
            .cloned()
            .collect()
    }

    /// Update an allocation's fields directly. A quantity change
    /// recomputes `total_cost` at the row's snapshotted unit cost. No
    /// cross-record validation happens here; this is the manual edit
    /// path, the engine owns quantity conservation.
    ///
    /// # Errors
    ///
    /// Returns `AllocationNotFound` if the allocation doesn't exist and
    /// `Validation` for a non-positive quantity.
    pub fn update_allocation(
        &self,
        id: AllocationId,
        input: &UpdateAllocationInput,
    ) -> Result<Allocation, LedgerError> {
        let mut state = write_lock(&self.inner);
        let allocation = state
            .allocations
            .get_mut(&id)
            .ok_or(LedgerError::AllocationNotFound(id))?;

        if let Some(quantity) = input.accepted_quantity {
            if quantity <= 0 {
                return Err(LedgerError::Validation(format!(
                    "accepted quantity {quantity} must be positive"
                )));
            }
            allocation.accepted_quantity = quantity;
            allocation.total_cost = Decimal::from(quantity) * allocation.unit_cost;
        }
        if let Some(department) = &input.department {
            allocation.department = department.clone();
        }
        if let Some(receipt_no) = &input.receipt_no {
            allocation.receipt_no = Some(receipt_no.clone());
        }
        if let Some(receipt_page_no) = &input.receipt_page_no {
            allocation.receipt_page_no = Some(receipt_page_no.clone());
        }
        Ok(allocation.clone())
    }

    /// Delete an allocation.
    ///
    /// # Errors
    ///
    /// Returns `AllocationNotFound` if the allocation doesn't exist.
    pub fn delete_allocation(&self, id: AllocationId) -> Result<(), LedgerError> {
        let mut state = write_lock(&self.inner);
        state
            .allocations
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::AllocationNotFound(id))
    }

    // =========================================================================
    // Registers
    // =========================================================================

    /// Create a register in the explicit two-step workflow. The new
    /// register is empty until its first stock item is created.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an empty name and `Conflict` when the
    /// name is already used by stock items or a pending register.
    pub fn create_register(&self, name: &str) -> Result<Register, LedgerError> {
        if name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "register name must not be empty".to_string(),
            ));
        }
        let mut state = write_lock(&self.inner);
        let exists = state.pending_registers.contains(name)
            || state.items.values().any(|item| item.register == name);
        if exists {
            return Err(LedgerError::Conflict(format!(
                "register '{name}' already exists"
            )));
        }
        state.pending_registers.insert(name.to_string());
        Ok(Register {
            name: name.to_string(),
            state: RegisterState::Empty,
        })
    }

    /// Delete an empty register.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` while the register contains stock items and
    /// `RegisterNotFound` for an unknown name.
    pub fn delete_register(&self, name: &str) -> Result<(), LedgerError> {
        let mut state = write_lock(&self.inner);
        if state.items.values().any(|item| item.register == name) {
            return Err(LedgerError::Conflict(format!(
                "register '{name}' contains stock items"
            )));
        }
        if state.pending_registers.remove(name) {
            Ok(())
        } else {
            Err(LedgerError::RegisterNotFound(name.to_string()))
        }
    }

    /// Names of registers created but not yet populated.
    #[must_use]
    pub fn pending_registers(&self) -> Vec<String> {
        read_lock(&self.inner)
            .pending_registers
            .iter()
            .cloned()
            .collect()
    }

    // =========================================================================
    // Engine support
    // =========================================================================

    /// Consistent snapshot of a stock item and its active allocations.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the item doesn't exist.
    pub fn snapshot(
        &self,
        id: StockItemId,
    ) -> Result<(StockItem, Vec<Allocation>), LedgerError> {
        let state = read_lock(&self.inner);
        let item = state
            .items
            .get(&id)
            .cloned()
            .ok_or(LedgerError::StockItemNotFound(id))?;
        let allocations = state
            .allocations
            .values()
            .filter(|a| a.stock_item_id == id)
            .cloned()
            .collect();
        Ok((item, allocations))
    }

    /// Apply a mutation plan in one write critical section: allocation
    /// deletes, updates, inserts, then the stock row overwrite. Returns
    /// the updated stock item and the IDs of every allocation touched.
    ///
    /// # Errors
    ///
    /// Returns `StockItemNotFound` if the stock item vanished and
    /// `AllocationNotFound` if a planned update or delete no longer
    /// matches a row; the engine's per-item lock prevents both.
    pub fn apply_plan(
        &self,
        plan: &MutationPlan,
    ) -> Result<(StockItem, Vec<AllocationId>), LedgerError> {
        let mut state = write_lock(&self.inner);
        if !state.items.contains_key(&plan.stock_item_id) {
            return Err(LedgerError::StockItemNotFound(plan.stock_item_id));
        }

        let mut affected = Vec::new();
        for id in &plan.deletes {
            state
                .allocations
                .remove(id)
                .ok_or(LedgerError::AllocationNotFound(*id))?;
            affected.push(*id);
        }
        for patch in &plan.updates {
            let allocation = state
                .allocations
                .get_mut(&patch.id)
                .ok_or(LedgerError::AllocationNotFound(patch.id))?;
            allocation.accepted_quantity = patch.accepted_quantity;
            allocation.unit_cost = patch.unit_cost;
            allocation.total_cost = patch.total_cost;
            affected.push(patch.id);
        }
        for draft in &plan.inserts {
            state.next_allocation_id += 1;
            let allocation = Allocation {
                id: AllocationId::new(state.next_allocation_id),
                stock_item_id: draft.stock_item_id,
                department: draft.department.clone(),
                accepted_quantity: draft.accepted_quantity,
                unit_cost: draft.unit_cost,
                total_cost: draft.total_cost,
                receipt_no: draft.receipt_no.clone(),
                receipt_page_no: draft.receipt_page_no.clone(),
                received_at: draft.received_at,
            };
            affected.push(allocation.id);
            state.allocations.insert(allocation.id, allocation);
        }

        let item = state
            .items
            .get_mut(&plan.stock_item_id)
            .ok_or(LedgerError::StockItemNotFound(plan.stock_item_id))?;
        item.total_quantity = plan.stock.total_quantity;
        item.unit_cost = plan.stock.unit_cost;
        item.total_cost = plan.stock.total_cost;
        item.remaining_quantity = plan.stock.remaining_quantity;
        Ok((item.clone(), affected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(register: &str, quantity: i64, unit_cost: i64) -> CreateStockItemInput {
        CreateStockItemInput {
            register: register.to_string(),
            description: "Oscilloscope".to_string(),
            category: "Lab equipment".to_string(),
            item_type: "Electronic".to_string(),
            supplier: "Acme Scientific".to_string(),
            purchase_year: "2025".to_string(),
            purchase_date: None,
            total_quantity: quantity,
            unit_cost: Decimal::from(unit_cost),
        }
    }

    #[test]
    fn create_computes_total_cost_and_remaining() {
        let store = MemoryStore::new();
        let item = store.create_stock_item(&input("A", 10, 250)).expect("create");
        assert_eq!(item.total_cost, Decimal::from(2500));
        assert_eq!(item.remaining_quantity, 10);
        assert_eq!(store.get_stock_item(item.id).expect("get").id, item.id);
    }

    #[test]
    fn create_rejects_negative_quantity() {
        let store = MemoryStore::new();
        let err = store.create_stock_item(&input("A", -1, 5)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn update_recomputes_cost_and_shifts_remaining() {
        let store = MemoryStore::new();
        let item = store.create_stock_item(&input("A", 10, 250)).expect("create");

        let updated = store
            .update_stock_item(
                item.id,
                &UpdateStockItemInput {
                    total_quantity: Some(14),
                    ..UpdateStockItemInput::default()
                },
            )
            .expect("update");
        assert_eq!(updated.total_quantity, 14);
        assert_eq!(updated.remaining_quantity, 14);
        assert_eq!(updated.total_cost, Decimal::from(3500));
    }

    #[test]
    fn rejected_update_leaves_item_untouched() {
        let store = MemoryStore::new();
        let item = store.create_stock_item(&input("A", 10, 250)).expect("create");

        // Valid quantity paired with an invalid cost: the whole call must
        // fail without committing the quantity change.
        let err = store
            .update_stock_item(
                item.id,
                &UpdateStockItemInput {
                    total_quantity: Some(20),
                    unit_cost: Some(Decimal::from(-1)),
                    ..UpdateStockItemInput::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let fetched = store.get_stock_item(item.id).expect("get");
        assert_eq!(fetched.total_quantity, 10);
        assert_eq!(fetched.remaining_quantity, 10);
        assert_eq!(fetched.unit_cost, Decimal::from(250));
        assert_eq!(fetched.total_cost, Decimal::from(2500));
    }

    #[test]
    fn delete_missing_item_is_not_found() {
        let store = MemoryStore::new();
        let err = store.delete_stock_item(StockItemId::new(99)).unwrap_err();
        assert!(matches!(err, LedgerError::StockItemNotFound(_)));
    }

    #[test]
    fn first_item_populates_pending_register() {
        let store = MemoryStore::new();
        store.create_register("Durables 2025").expect("create register");
        assert_eq!(store.pending_registers(), vec!["Durables 2025".to_string()]);

        store
            .create_stock_item(&input("Durables 2025", 5, 10))
            .expect("create item");
        assert!(store.pending_registers().is_empty());
        assert_eq!(store.list_register_items("Durables 2025").len(), 1);
    }

    #[test]
    fn duplicate_register_name_conflicts() {
        let store = MemoryStore::new();
        store.create_register("A").expect("create");
        assert!(matches!(
            store.create_register("A"),
            Err(LedgerError::Conflict(_))
        ));

        store.create_stock_item(&input("B", 1, 1)).expect("create item");
        assert!(matches!(
            store.create_register("B"),
            Err(LedgerError::Conflict(_))
        ));
    }

    #[test]
    fn delete_register_refuses_populated() {
        let store = MemoryStore::new();
        store.create_stock_item(&input("B", 1, 1)).expect("create item");
        assert!(matches!(
            store.delete_register("B"),
            Err(LedgerError::Conflict(_))
        ));
        assert!(matches!(
            store.delete_register("missing"),
            Err(LedgerError::RegisterNotFound(_))
        ));
    }

    #[test]
    fn lock_acquisition_times_out_as_busy_signal() {
        let store = MemoryStore::with_lock_timeout(Duration::from_millis(5));
        let item = store.create_stock_item(&input("A", 1, 1)).expect("create");

        let cell = store.lock_cell(item.id);
        let _held = cell.try_lock().expect("first lock");

        let other = store.lock_cell(item.id);
        assert!(MemoryStore::acquire(&other, store.lock_timeout()).is_none());
    }
}
