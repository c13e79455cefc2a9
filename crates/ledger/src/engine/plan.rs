//! Pure planning core for engine operations.
//!
//! Every engine operation is split into two phases: a pure planner in this
//! module that validates a snapshot (stock item + its active allocations)
//! and produces a [`MutationPlan`], and a backend that applies the plan
//! atomically. All precondition failures are raised here, before any
//! mutation, so an error can never leave a partial effect behind. The one
//! deliberate exception is deallocation, where invalid rows are reported
//! individually while valid rows still apply.
//!
//! The authoritative check value is always `true_remaining`, computed
//! fresh from the allocation snapshot, never the cached
//! `remaining_quantity` field. Planned values are derived from it, so an
//! inconsistent cache is repaired by the next successful operation rather
//! than propagated.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use stockbook_core::{AllocationId, StockItemId};

use crate::error::LedgerError;
use crate::models::{Allocation, AllocationRequest, StockItem, Withdrawal};

/// A new allocation row to insert. The ID is assigned by the store.
#[derive(Debug, Clone)]
pub struct AllocationDraft {
    pub stock_item_id: StockItemId,
    pub department: String,
    pub accepted_quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub receipt_no: Option<String>,
    pub receipt_page_no: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// New scalar state for an existing allocation row.
#[derive(Debug, Clone)]
pub struct AllocationPatch {
    pub id: AllocationId,
    pub accepted_quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
}

/// New scalar state for the stock item row.
#[derive(Debug, Clone)]
pub struct StockPatch {
    pub total_quantity: i64,
    pub unit_cost: Decimal,
    pub total_cost: Decimal,
    pub remaining_quantity: i64,
}

/// The full set of mutations one engine operation commits, applied
/// atomically by a backend: allocation deletes, then updates, then
/// inserts, then the stock row overwrite.
#[derive(Debug, Clone)]
pub struct MutationPlan {
    pub stock_item_id: StockItemId,
    pub stock: StockPatch,
    pub inserts: Vec<AllocationDraft>,
    pub updates: Vec<AllocationPatch>,
    pub deletes: Vec<AllocationId>,
}

/// A deallocation row that was skipped, with the reason.
#[derive(Debug)]
pub struct RowFailure {
    pub allocation_id: AllocationId,
    pub error: LedgerError,
}

/// A deallocation plan: the mutations for the valid rows plus the
/// failures reported for skipped rows.
#[derive(Debug)]
pub struct DeallocationPlan {
    pub plan: MutationPlan,
    pub failures: Vec<RowFailure>,
}

/// Sum of `accepted_quantity` over the item's active allocations.
#[must_use]
pub fn allocated_total(allocations: &[Allocation]) -> i64 {
    allocations.iter().map(|a| a.accepted_quantity).sum()
}

/// The authoritative unallocated quantity, computed fresh from the
/// snapshot rather than read from the cached field.
#[must_use]
pub fn true_remaining(item: &StockItem, allocations: &[Allocation]) -> i64 {
    item.total_quantity - allocated_total(allocations)
}

fn unchanged_stock(item: &StockItem, remaining_quantity: i64) -> StockPatch {
    StockPatch {
        total_quantity: item.total_quantity,
        unit_cost: item.unit_cost,
        total_cost: item.total_cost,
        remaining_quantity,
    }
}

fn validate_request(request: &AllocationRequest) -> Result<(), LedgerError> {
    if request.department.trim().is_empty() {
        return Err(LedgerError::Validation(
            "allocation request has an empty department name".to_string(),
        ));
    }
    if request.quantity <= 0 {
        return Err(LedgerError::Validation(format!(
            "requested quantity {} for department '{}' must be positive",
            request.quantity, request.department
        )));
    }
    Ok(())
}

fn draft_for(item: &StockItem, request: &AllocationRequest, now: DateTime<Utc>) -> AllocationDraft {
    AllocationDraft {
        stock_item_id: item.id,
        department: request.department.clone(),
        accepted_quantity: request.quantity,
        unit_cost: item.unit_cost,
        total_cost: Decimal::from(request.quantity) * item.unit_cost,
        receipt_no: request.receipt_no.clone(),
        receipt_page_no: request.receipt_page_no.clone(),
        received_at: now,
    }
}

/// Plan `AllocateNew`: one new allocation row per request, unit cost
/// snapshotted from the stock item, all-or-nothing against
/// `true_remaining`.
///
/// # Errors
///
/// `Validation` for empty or malformed requests, `InsufficientStock` when
/// the requested total exceeds the unallocated quantity.
pub fn allocate_new(
    item: &StockItem,
    allocations: &[Allocation],
    requests: &[AllocationRequest],
    now: DateTime<Utc>,
) -> Result<MutationPlan, LedgerError> {
    if requests.is_empty() {
        return Err(LedgerError::Validation(
            "no allocation requests given".to_string(),
        ));
    }
    for request in requests {
        validate_request(request)?;
    }

    let available = true_remaining(item, allocations);
    let requested: i64 = requests.iter().map(|r| r.quantity).sum();
    if requested > available {
        return Err(LedgerError::InsufficientStock {
            requested,
            available,
        });
    }

    Ok(MutationPlan {
        stock_item_id: item.id,
        stock: unchanged_stock(item, available - requested),
        inserts: requests.iter().map(|r| draft_for(item, r, now)).collect(),
        updates: Vec::new(),
        deletes: Vec::new(),
    })
}

/// Validate withdrawals against the snapshot, tracking cumulative
/// withdrawal per row so repeated references to one allocation cannot
/// overdraw it. Returns the per-row quantity remaining after the
/// withdrawals and the total withdrawn.
fn plan_withdrawals(
    item: &StockItem,
    allocations: &[Allocation],
    withdrawals: &[Withdrawal],
) -> Result<(HashMap<AllocationId, i64>, i64), LedgerError> {
    let by_id: HashMap<AllocationId, &Allocation> =
        allocations.iter().map(|a| (a.id, a)).collect();

    let mut left_after: HashMap<AllocationId, i64> = HashMap::new();
    let mut total_withdrawn = 0_i64;

    for withdrawal in withdrawals {
        let Some(allocation) = by_id.get(&withdrawal.allocation_id) else {
            return Err(LedgerError::AllocationNotFound(withdrawal.allocation_id));
        };
        debug_assert_eq!(allocation.stock_item_id, item.id);
        if withdrawal.quantity <= 0 {
            return Err(LedgerError::Validation(format!(
                "withdrawal quantity {} from allocation {} must be positive",
                withdrawal.quantity, withdrawal.allocation_id
            )));
        }
        let held = *left_after
            .get(&allocation.id)
            .unwrap_or(&allocation.accepted_quantity);
        if withdrawal.quantity > held {
            return Err(LedgerError::OverWithdrawal {
                allocation_id: allocation.id,
                department: allocation.department.clone(),
                requested: withdrawal.quantity,
                held,
            });
        }
        left_after.insert(allocation.id, held - withdrawal.quantity);
        total_withdrawn += withdrawal.quantity;
    }

    Ok((left_after, total_withdrawn))
}

/// Plan `Reallocate`: withdraw from existing allocations and deposit the
/// withdrawn quantity onto new department rows, atomically.
///
/// Unlike the deallocation path, reallocation is all-or-nothing: every
/// withdrawal and every deposit is validated here before anything is
/// applied, so an `OverDeposit` leaves the withdrawals unapplied.
///
/// # Errors
///
/// `AllocationNotFound` for an unknown withdrawal row, `OverWithdrawal`
/// when a row is overdrawn, `OverDeposit` when deposits exceed the
/// withdrawn total, `Validation` for malformed rows.
pub fn reallocate(
    item: &StockItem,
    allocations: &[Allocation],
    withdrawals: &[Withdrawal],
    deposits: &[AllocationRequest],
    now: DateTime<Utc>,
) -> Result<MutationPlan, LedgerError> {
    if withdrawals.is_empty() {
        return Err(LedgerError::Validation(
            "reallocation requires at least one withdrawal".to_string(),
        ));
    }
    for deposit in deposits {
        validate_request(deposit)?;
    }

    let (left_after, total_withdrawn) = plan_withdrawals(item, allocations, withdrawals)?;

    let deposited: i64 = deposits.iter().map(|d| d.quantity).sum();
    if deposited > total_withdrawn {
        return Err(LedgerError::OverDeposit {
            deposited,
            withdrawn: total_withdrawn,
        });
    }

    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for allocation in allocations {
        match left_after.get(&allocation.id) {
            Some(0) => deletes.push(allocation.id),
            Some(&left) => updates.push(AllocationPatch {
                id: allocation.id,
                accepted_quantity: left,
                unit_cost: allocation.unit_cost,
                total_cost: Decimal::from(left) * allocation.unit_cost,
            }),
            None => {}
        }
    }

    let remaining = true_remaining(item, allocations) + total_withdrawn - deposited;
    Ok(MutationPlan {
        stock_item_id: item.id,
        stock: unchanged_stock(item, remaining),
        inserts: deposits.iter().map(|d| draft_for(item, d, now)).collect(),
        updates,
        deletes,
    })
}

/// Plan `Deallocate`: return withdrawn quantity to the unallocated pool.
///
/// Partial success is explicit policy: rows that fail validation are
/// skipped and reported in [`DeallocationPlan::failures`] while the valid
/// rows still apply. A row that reaches zero is deleted, never kept.
///
/// # Errors
///
/// `Validation` when no rows were given; the first row's error when every
/// row fails (nothing would be mutated).
pub fn deallocate(
    item: &StockItem,
    allocations: &[Allocation],
    returns: &[Withdrawal],
) -> Result<DeallocationPlan, LedgerError> {
    if returns.is_empty() {
        return Err(LedgerError::Validation(
            "no allocations selected for deallocation".to_string(),
        ));
    }

    let by_id: HashMap<AllocationId, &Allocation> =
        allocations.iter().map(|a| (a.id, a)).collect();

    let mut left_after: HashMap<AllocationId, i64> = HashMap::new();
    let mut failures = Vec::new();
    let mut returned = 0_i64;

    for row in returns {
        let Some(allocation) = by_id.get(&row.allocation_id) else {
            failures.push(RowFailure {
                allocation_id: row.allocation_id,
                error: LedgerError::AllocationNotFound(row.allocation_id),
            });
            continue;
        };
        if row.quantity <= 0 {
            failures.push(RowFailure {
                allocation_id: row.allocation_id,
                error: LedgerError::Validation(format!(
                    "deallocation quantity {} must be positive",
                    row.quantity
                )),
            });
            continue;
        }
        let held = *left_after
            .get(&allocation.id)
            .unwrap_or(&allocation.accepted_quantity);
        if row.quantity > held {
            failures.push(RowFailure {
                allocation_id: allocation.id,
                error: LedgerError::OverWithdrawal {
                    allocation_id: allocation.id,
                    department: allocation.department.clone(),
                    requested: row.quantity,
                    held,
                },
            });
            continue;
        }
        left_after.insert(allocation.id, held - row.quantity);
        returned += row.quantity;
    }

    if returned == 0 {
        // Every row failed; surface the first failure as the call error.
        let mut failures = failures;
        return Err(failures.remove(0).error);
    }

    let mut updates = Vec::new();
    let mut deletes = Vec::new();
    for allocation in allocations {
        match left_after.get(&allocation.id) {
            Some(0) => deletes.push(allocation.id),
            Some(&left) => updates.push(AllocationPatch {
                id: allocation.id,
                accepted_quantity: left,
                unit_cost: allocation.unit_cost,
                total_cost: Decimal::from(left) * allocation.unit_cost,
            }),
            None => {}
        }
    }

    let remaining = true_remaining(item, allocations) + returned;
    Ok(DeallocationPlan {
        plan: MutationPlan {
            stock_item_id: item.id,
            stock: unchanged_stock(item, remaining),
            inserts: Vec::new(),
            updates,
            deletes,
        },
        failures,
    })
}

/// Plan `EditStockQuantity`: change the purchased total and optionally
/// the unit cost. A cost change cascades onto every active allocation,
/// recomputing each row's total at the new unit cost.
///
/// # Errors
///
/// `Validation` for negative inputs, `BelowAllocated` when the new total
/// undershoots the currently allocated quantity.
pub fn edit_stock_quantity(
    item: &StockItem,
    allocations: &[Allocation],
    new_total_quantity: i64,
    new_unit_cost: Option<Decimal>,
) -> Result<MutationPlan, LedgerError> {
    if new_total_quantity < 0 {
        return Err(LedgerError::Validation(format!(
            "total quantity {new_total_quantity} must not be negative"
        )));
    }
    if let Some(cost) = new_unit_cost
        && cost < Decimal::ZERO
    {
        return Err(LedgerError::Validation(format!(
            "unit cost {cost} must not be negative"
        )));
    }

    let allocated = allocated_total(allocations);
    if new_total_quantity < allocated {
        return Err(LedgerError::BelowAllocated {
            requested: new_total_quantity,
            allocated,
        });
    }

    let unit_cost = new_unit_cost.unwrap_or(item.unit_cost);
    let cost_changed = unit_cost != item.unit_cost;

    let updates = if cost_changed {
        allocations
            .iter()
            .map(|a| AllocationPatch {
                id: a.id,
                accepted_quantity: a.accepted_quantity,
                unit_cost,
                total_cost: Decimal::from(a.accepted_quantity) * unit_cost,
            })
            .collect()
    } else {
        Vec::new()
    };

    Ok(MutationPlan {
        stock_item_id: item.id,
        stock: StockPatch {
            total_quantity: new_total_quantity,
            unit_cost,
            total_cost: Decimal::from(new_total_quantity) * unit_cost,
            remaining_quantity: new_total_quantity - allocated,
        },
        inserts: Vec::new(),
        updates,
        deletes: Vec::new(),
    })
}

/// Plan one item of a bulk allocation: the item's first existing
/// allocation (if any) is returned to stock and replaced by a single new
/// row for the given department.
///
/// # Errors
///
/// `Validation` for a non-positive quantity, `InsufficientStock` when the
/// quantity exceeds what remains after the replaced row is returned.
pub fn bulk_replace_allocate(
    item: &StockItem,
    allocations: &[Allocation],
    request: &AllocationRequest,
    now: DateTime<Utc>,
) -> Result<MutationPlan, LedgerError> {
    validate_request(request)?;

    let replaced = allocations.first();
    let available =
        true_remaining(item, allocations) + replaced.map_or(0, |a| a.accepted_quantity);
    if request.quantity > available {
        return Err(LedgerError::InsufficientStock {
            requested: request.quantity,
            available,
        });
    }

    Ok(MutationPlan {
        stock_item_id: item.id,
        stock: unchanged_stock(item, available - request.quantity),
        inserts: vec![draft_for(item, request, now)],
        updates: Vec::new(),
        deletes: replaced.map(|a| a.id).into_iter().collect(),
    })
}

/// Check that a stock item may be deleted: no active allocation may
/// reference it.
///
/// # Errors
///
/// `Conflict` naming the active allocation count.
pub fn ensure_deletable(item: &StockItem, allocations: &[Allocation]) -> Result<(), LedgerError> {
    if allocations.is_empty() {
        Ok(())
    } else {
        Err(LedgerError::Conflict(format!(
            "stock item {} still has {} active allocation(s); deallocate first",
            item.id,
            allocations.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(total: i64, remaining: i64, unit_cost: i64) -> StockItem {
        StockItem {
            id: StockItemId::new(1),
            register: "Durable Goods A".to_string(),
            description: "Compound microscope".to_string(),
            category: "Lab equipment".to_string(),
            item_type: "Optical".to_string(),
            supplier: "Acme Scientific".to_string(),
            purchase_year: "2024".to_string(),
            purchase_date: None,
            total_quantity: total,
            unit_cost: Decimal::from(unit_cost),
            total_cost: Decimal::from(total * unit_cost),
            remaining_quantity: remaining,
            created_at: Utc::now(),
        }
    }

    fn alloc(id: i32, department: &str, quantity: i64, unit_cost: i64) -> Allocation {
        Allocation {
            id: AllocationId::new(id),
            stock_item_id: StockItemId::new(1),
            department: department.to_string(),
            accepted_quantity: quantity,
            unit_cost: Decimal::from(unit_cost),
            total_cost: Decimal::from(quantity * unit_cost),
            receipt_no: None,
            receipt_page_no: None,
            received_at: Utc::now(),
        }
    }

    #[test]
    fn allocate_new_within_remaining() {
        let item = item(100, 20, 50);
        let existing = vec![alloc(1, "Physics", 80, 50)];
        let requests = vec![
            AllocationRequest::new("Chemistry", 15),
            AllocationRequest::new("Biology", 5),
        ];

        let plan = allocate_new(&item, &existing, &requests, Utc::now()).expect("plan");
        assert_eq!(plan.inserts.len(), 2);
        assert_eq!(plan.stock.remaining_quantity, 0);
        assert_eq!(plan.inserts[0].total_cost, Decimal::from(15 * 50));
        assert!(plan.updates.is_empty());
        assert!(plan.deletes.is_empty());
    }

    #[test]
    fn allocate_new_rejects_over_remaining() {
        let item = item(100, 20, 50);
        let existing = vec![alloc(1, "Physics", 80, 50)];
        let requests = vec![
            AllocationRequest::new("Chemistry", 15),
            AllocationRequest::new("Biology", 10),
        ];

        let err = allocate_new(&item, &existing, &requests, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 25,
                available: 20
            }
        ));
    }

    #[test]
    fn allocate_new_validates_against_true_remaining_not_cache() {
        // Cached remaining claims 90 but 80 units are actually allocated.
        let item = item(100, 90, 50);
        let existing = vec![alloc(1, "Physics", 80, 50)];
        let requests = vec![AllocationRequest::new("Chemistry", 25)];

        let err = allocate_new(&item, &existing, &requests, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock { available: 20, .. }
        ));
    }

    #[test]
    fn allocate_new_rejects_zero_quantity() {
        let item = item(10, 10, 5);
        let requests = vec![AllocationRequest::new("Physics", 0)];
        let err = allocate_new(&item, &[], &requests, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn reallocate_full_withdrawal_splits_to_two_departments() {
        let item = item(50, 0, 10);
        let existing = vec![alloc(7, "Physics", 50, 10)];
        let withdrawals = vec![Withdrawal::new(AllocationId::new(7), 50)];
        let deposits = vec![
            AllocationRequest::new("Chemistry", 30),
            AllocationRequest::new("Biology", 20),
        ];

        let plan = reallocate(&item, &existing, &withdrawals, &deposits, Utc::now())
            .expect("plan");
        assert_eq!(plan.deletes, vec![AllocationId::new(7)]);
        assert_eq!(plan.inserts.len(), 2);
        assert!(plan.updates.is_empty());
        assert_eq!(plan.stock.remaining_quantity, 0);
    }

    #[test]
    fn reallocate_partial_withdrawal_patches_row() {
        let item = item(50, 0, 10);
        let existing = vec![alloc(7, "Physics", 50, 10)];
        let withdrawals = vec![Withdrawal::new(AllocationId::new(7), 20)];
        let deposits = vec![AllocationRequest::new("Chemistry", 20)];

        let plan = reallocate(&item, &existing, &withdrawals, &deposits, Utc::now())
            .expect("plan");
        assert!(plan.deletes.is_empty());
        assert_eq!(plan.updates.len(), 1);
        assert_eq!(plan.updates[0].accepted_quantity, 30);
        assert_eq!(plan.updates[0].total_cost, Decimal::from(300));
        assert_eq!(plan.stock.remaining_quantity, 0);
    }

    #[test]
    fn reallocate_rejects_over_withdrawal_naming_department() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let withdrawals = vec![Withdrawal::new(AllocationId::new(7), 45)];

        let err = reallocate(&item, &existing, &withdrawals, &[], Utc::now()).unwrap_err();
        match err {
            LedgerError::OverWithdrawal {
                department,
                requested,
                held,
                ..
            } => {
                assert_eq!(department, "Physics");
                assert_eq!(requested, 45);
                assert_eq!(held, 40);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reallocate_tracks_cumulative_withdrawals_per_row() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let withdrawals = vec![
            Withdrawal::new(AllocationId::new(7), 30),
            Withdrawal::new(AllocationId::new(7), 15),
        ];

        let err = reallocate(&item, &existing, &withdrawals, &[], Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::OverWithdrawal {
                requested: 15,
                held: 10,
                ..
            }
        ));
    }

    #[test]
    fn reallocate_rejects_over_deposit_without_planning_withdrawals() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let withdrawals = vec![Withdrawal::new(AllocationId::new(7), 20)];
        let deposits = vec![AllocationRequest::new("Chemistry", 25)];

        let err = reallocate(&item, &existing, &withdrawals, &deposits, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::OverDeposit {
                deposited: 25,
                withdrawn: 20
            }
        ));
    }

    #[test]
    fn reallocate_without_deposits_returns_quantity_to_stock() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let withdrawals = vec![Withdrawal::new(AllocationId::new(7), 40)];

        let plan = reallocate(&item, &existing, &withdrawals, &[], Utc::now()).expect("plan");
        assert_eq!(plan.deletes, vec![AllocationId::new(7)]);
        assert_eq!(plan.stock.remaining_quantity, 50);
    }

    #[test]
    fn deallocate_partial_row() {
        let item = item(100, 60, 8);
        let existing = vec![alloc(3, "Physics", 40, 8)];
        let returns = vec![Withdrawal::new(AllocationId::new(3), 15)];

        let result = deallocate(&item, &existing, &returns).expect("plan");
        assert!(result.failures.is_empty());
        assert_eq!(result.plan.updates.len(), 1);
        assert_eq!(result.plan.updates[0].accepted_quantity, 25);
        assert_eq!(result.plan.updates[0].total_cost, Decimal::from(25 * 8));
        assert_eq!(result.plan.stock.remaining_quantity, 75);
    }

    #[test]
    fn deallocate_reports_invalid_rows_but_applies_valid_ones() {
        let item = item(100, 30, 8);
        let existing = vec![alloc(3, "Physics", 40, 8), alloc(4, "Chemistry", 30, 8)];
        let returns = vec![
            Withdrawal::new(AllocationId::new(3), 50), // over-withdrawal, skipped
            Withdrawal::new(AllocationId::new(4), 30), // full, row deleted
            Withdrawal::new(AllocationId::new(9), 5),  // unknown, skipped
        ];

        let result = deallocate(&item, &existing, &returns).expect("plan");
        assert_eq!(result.failures.len(), 2);
        assert_eq!(result.plan.deletes, vec![AllocationId::new(4)]);
        assert!(result.plan.updates.is_empty());
        assert_eq!(result.plan.stock.remaining_quantity, 60);
    }

    #[test]
    fn deallocate_all_rows_failing_is_an_error() {
        let item = item(100, 60, 8);
        let existing = vec![alloc(3, "Physics", 40, 8)];
        let returns = vec![Withdrawal::new(AllocationId::new(9), 5)];

        let err = deallocate(&item, &existing, &returns).unwrap_err();
        assert!(matches!(err, LedgerError::AllocationNotFound(id) if id.as_i32() == 9));
    }

    #[test]
    fn edit_quantity_below_allocated_fails_naming_total() {
        let item = item(100, 20, 5);
        let existing = vec![alloc(1, "Physics", 50, 5), alloc(2, "Chemistry", 30, 5)];

        let err = edit_stock_quantity(&item, &existing, 70, None).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::BelowAllocated {
                requested: 70,
                allocated: 80
            }
        ));
    }

    #[test]
    fn edit_quantity_adjusts_remaining_and_total_cost() {
        let item = item(100, 20, 5);
        let existing = vec![alloc(1, "Physics", 80, 5)];

        let plan = edit_stock_quantity(&item, &existing, 120, None).expect("plan");
        assert_eq!(plan.stock.total_quantity, 120);
        assert_eq!(plan.stock.remaining_quantity, 40);
        assert_eq!(plan.stock.total_cost, Decimal::from(600));
        assert!(plan.updates.is_empty());
    }

    #[test]
    fn edit_unit_cost_cascades_to_all_allocations() {
        let item = item(100, 20, 5);
        let existing = vec![alloc(1, "Physics", 50, 5), alloc(2, "Chemistry", 30, 5)];

        let plan =
            edit_stock_quantity(&item, &existing, 100, Some(Decimal::from(7))).expect("plan");
        assert_eq!(plan.stock.total_cost, Decimal::from(700));
        assert_eq!(plan.updates.len(), 2);
        for patch in &plan.updates {
            assert_eq!(patch.unit_cost, Decimal::from(7));
        }
        assert_eq!(plan.updates[0].total_cost, Decimal::from(350));
        assert_eq!(plan.updates[1].total_cost, Decimal::from(210));
    }

    #[test]
    fn bulk_replace_returns_existing_row_before_allocating() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let request = AllocationRequest::new("Chemistry", 45);

        let plan = bulk_replace_allocate(&item, &existing, &request, Utc::now()).expect("plan");
        assert_eq!(plan.deletes, vec![AllocationId::new(7)]);
        assert_eq!(plan.inserts.len(), 1);
        assert_eq!(plan.stock.remaining_quantity, 5);
    }

    #[test]
    fn bulk_replace_rejects_over_available() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        let request = AllocationRequest::new("Chemistry", 55);

        let err = bulk_replace_allocate(&item, &existing, &request, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                requested: 55,
                available: 50
            }
        ));
    }

    #[test]
    fn ensure_deletable_blocks_on_active_allocations() {
        let item = item(50, 10, 10);
        let existing = vec![alloc(7, "Physics", 40, 10)];
        assert!(matches!(
            ensure_deletable(&item, &existing),
            Err(LedgerError::Conflict(_))
        ));
        assert!(ensure_deletable(&item, &[]).is_ok());
    }
}
