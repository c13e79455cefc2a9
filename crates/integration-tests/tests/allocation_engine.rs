//! End-to-end allocation engine scenarios against the in-memory store.

use rust_decimal::Decimal;

use stockbook::engine::{AllocationEngine, BulkAllocationItem, plan};
use stockbook::error::LedgerError;
use stockbook::models::{AllocationRequest, Withdrawal};
use stockbook::query::{AllocationStatusFilter, Reporting};
use stockbook::store::MemoryStore;
use stockbook_integration_tests::seed_item;

use stockbook_core::StockItemId;

fn conservation_holds(store: &MemoryStore, id: StockItemId) -> bool {
    let (item, allocations) = store.snapshot(id).expect("snapshot");
    item.remaining_quantity == plan::true_remaining(&item, &allocations)
}

#[test]
fn partial_allocation_lifecycle() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 100, 250);

    // Partial allocation leaves the rest available.
    let outcome = engine
        .allocate_new(
            item.id,
            &[
                AllocationRequest::new("Physics", 30),
                AllocationRequest::new("Chemistry", 20),
            ],
        )
        .expect("allocate");
    assert_eq!(outcome.stock_item.remaining_quantity, 50);

    // Unit cost is snapshotted onto each allocation row.
    for allocation in store.list_allocations_for_item(item.id) {
        assert_eq!(allocation.unit_cost, Decimal::from(250));
        assert_eq!(
            allocation.total_cost,
            Decimal::from(allocation.accepted_quantity) * Decimal::from(250)
        );
    }

    // Allocating exactly what remains fully allocates the item.
    engine
        .allocate_new(item.id, &[AllocationRequest::new("Biology", 50)])
        .expect("allocate rest");
    let reporting = Reporting::new(&store);
    assert!(reporting.is_fully_allocated(item.id).expect("query"));
    assert!(conservation_holds(&store, item.id));

    // One more unit is refused.
    let err = engine
        .allocate_new(item.id, &[AllocationRequest::new("Geology", 1)])
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientStock {
            requested: 1,
            available: 0
        }
    ));
}

#[test]
fn reallocate_splits_and_returns_surplus_to_pool() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 80, 10);
    let outcome = engine
        .allocate_new(item.id, &[AllocationRequest::new("Physics", 60)])
        .expect("allocate");
    let physics = outcome.affected[0];

    // Withdraw 50: deposit 20 + 20, the undeposited 10 returns to stock.
    let outcome = engine
        .reallocate(
            item.id,
            &[Withdrawal::new(physics, 50)],
            &[
                AllocationRequest::new("Chemistry", 20),
                AllocationRequest::new("Biology", 20),
            ],
        )
        .expect("reallocate");
    assert_eq!(outcome.stock_item.remaining_quantity, 30);

    let reporting = Reporting::new(&store);
    let summary = reporting.allocation_summary(item.id).expect("summary");
    let totals: Vec<(&str, i64)> = summary
        .iter()
        .map(|t| (t.department.as_str(), t.quantity))
        .collect();
    assert_eq!(totals, vec![("Biology", 20), ("Chemistry", 20), ("Physics", 10)]);
    assert!(conservation_holds(&store, item.id));
}

#[test]
fn reallocate_withdrawing_everything_deletes_the_row() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 40, 10);
    let outcome = engine
        .allocate_new(item.id, &[AllocationRequest::new("Physics", 40)])
        .expect("allocate");
    let physics = outcome.affected[0];

    engine
        .reallocate(
            item.id,
            &[Withdrawal::new(physics, 40)],
            &[AllocationRequest::new("Chemistry", 40)],
        )
        .expect("reallocate");

    assert!(matches!(
        store.get_allocation(physics),
        Err(LedgerError::AllocationNotFound(_))
    ));
    let rows = store.list_allocations_for_item(item.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].department, "Chemistry");
}

#[test]
fn deallocate_applies_valid_rows_and_reports_invalid_ones() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 100, 10);
    let outcome = engine
        .allocate_new(
            item.id,
            &[
                AllocationRequest::new("Physics", 40),
                AllocationRequest::new("Chemistry", 30),
            ],
        )
        .expect("allocate");
    let (physics, chemistry) = (outcome.affected[0], outcome.affected[1]);

    // Physics returns 15 units; the Chemistry row is overdrawn and skipped.
    let outcome = engine
        .deallocate(
            item.id,
            &[Withdrawal::new(physics, 15), Withdrawal::new(chemistry, 31)],
        )
        .expect("deallocate");
    assert_eq!(outcome.stock_item.remaining_quantity, 45);
    assert_eq!(outcome.failures.len(), 1);
    assert!(matches!(
        outcome.failures[0].error,
        LedgerError::OverWithdrawal { held: 30, .. }
    ));

    // The skipped row is untouched.
    assert_eq!(
        store
            .get_allocation(chemistry)
            .expect("get")
            .accepted_quantity,
        30
    );
    assert!(conservation_holds(&store, item.id));
}

#[test]
fn full_deallocation_deletes_rows_and_restores_stock() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 50, 10);
    let outcome = engine
        .allocate_new(item.id, &[AllocationRequest::new("Physics", 50)])
        .expect("allocate");
    let physics = outcome.affected[0];

    let outcome = engine
        .deallocate(item.id, &[Withdrawal::new(physics, 50)])
        .expect("deallocate");
    assert_eq!(outcome.stock_item.remaining_quantity, 50);
    assert!(store.list_allocations_for_item(item.id).is_empty());

    // Deallocating the same row again fails; nothing is held any more.
    let err = engine
        .deallocate(item.id, &[Withdrawal::new(physics, 1)])
        .unwrap_err();
    assert!(matches!(err, LedgerError::AllocationNotFound(_)));
}

#[test]
fn edit_quantity_floors_at_allocated_and_cascades_cost() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 100, 10);
    engine
        .allocate_new(
            item.id,
            &[
                AllocationRequest::new("Physics", 40),
                AllocationRequest::new("Chemistry", 20),
            ],
        )
        .expect("allocate");

    // The purchased total cannot undershoot what departments hold.
    let err = engine.edit_stock_quantity(item.id, 59, None).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::BelowAllocated {
            requested: 59,
            allocated: 60
        }
    ));

    // Shrinking to the floor leaves nothing unallocated; a cost change
    // reprices every active row.
    let outcome = engine
        .edit_stock_quantity(item.id, 60, Some(Decimal::from(12)))
        .expect("edit");
    assert_eq!(outcome.stock_item.remaining_quantity, 0);
    assert_eq!(outcome.stock_item.total_cost, Decimal::from(720));
    for allocation in store.list_allocations_for_item(item.id) {
        assert_eq!(allocation.unit_cost, Decimal::from(12));
        assert_eq!(
            allocation.total_cost,
            Decimal::from(allocation.accepted_quantity) * Decimal::from(12)
        );
    }
    assert!(conservation_holds(&store, item.id));
}

#[test]
fn delete_is_refused_until_allocations_are_returned() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let item = seed_item(&store, "Durables 2025", 30, 10);
    let outcome = engine
        .allocate_new(item.id, &[AllocationRequest::new("Physics", 30)])
        .expect("allocate");

    let err = engine.delete_stock_item(item.id).unwrap_err();
    assert!(matches!(err, LedgerError::Conflict(_)));

    engine
        .deallocate(item.id, &[Withdrawal::new(outcome.affected[0], 30)])
        .expect("deallocate");
    engine.delete_stock_item(item.id).expect("delete");
    assert!(matches!(
        store.get_stock_item(item.id),
        Err(LedgerError::StockItemNotFound(_))
    ));
}

#[test]
fn bulk_allocation_replaces_existing_rows_per_item() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let first = seed_item(&store, "Durables 2025", 20, 10);
    let second = seed_item(&store, "Durables 2025", 20, 10);
    engine
        .allocate_new(first.id, &[AllocationRequest::new("Physics", 15)])
        .expect("allocate");

    // The first item's Physics row is returned before the new allocation
    // is checked, so 20 units fit even though only 5 remained.
    let outcome = engine
        .bulk_allocate(
            "Chemistry",
            &[
                BulkAllocationItem {
                    stock_item_id: first.id,
                    quantity: 20,
                    receipt_no: Some("R-17".to_string()),
                    receipt_page_no: None,
                },
                BulkAllocationItem {
                    stock_item_id: second.id,
                    quantity: 8,
                    receipt_no: None,
                    receipt_page_no: None,
                },
            ],
        )
        .expect("bulk allocate");
    assert_eq!(outcome.allocated.len(), 2);
    assert!(outcome.failures.is_empty());

    let rows = store.list_allocations_for_item(first.id);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].department, "Chemistry");
    assert_eq!(rows[0].accepted_quantity, 20);
    assert_eq!(rows[0].receipt_no.as_deref(), Some("R-17"));
    assert!(conservation_holds(&store, first.id));
    assert!(conservation_holds(&store, second.id));
}

#[test]
fn allocation_report_reflects_engine_state() {
    let store = MemoryStore::new();
    let engine = AllocationEngine::new(&store);
    let full = seed_item(&store, "Durables 2025", 10, 10);
    let untouched = seed_item(&store, "Durables 2025", 10, 10);
    engine
        .allocate_new(full.id, &[AllocationRequest::new("Physics", 10)])
        .expect("allocate");

    let reporting = Reporting::new(&store);
    let report = reporting.allocation_report(AllocationStatusFilter::All);
    assert_eq!(report.len(), 2);

    let full_row = report
        .iter()
        .find(|r| r.item.id == full.id)
        .expect("full item row");
    assert!(full_row.is_fully_allocated);
    assert!(full_row.has_allocations);

    let untouched_row = report
        .iter()
        .find(|r| r.item.id == untouched.id)
        .expect("untouched item row");
    assert!(!untouched_row.is_fully_allocated);
    assert!(!untouched_row.has_allocations);
    assert!(untouched_row.departments.is_empty());
}
