//! Allocation status report command.

use stockbook::query::summary_line;

use super::CliError;

/// Print each stock item with its allocation state and per-department
/// totals, optionally filtered to fully or not-fully allocated items.
pub async fn run(fully_allocated: bool, not_fully_allocated: bool) -> Result<(), CliError> {
    let ledger = super::connect().await?;
    let items = ledger.list_stock_items().await?;

    #[allow(clippy::print_stdout)]
    for item in items {
        let full = item.remaining_quantity == 0;
        if (fully_allocated && !full) || (not_fully_allocated && full) {
            continue;
        }
        let summary = ledger.allocation_summary(item.id).await?;
        let state = if full { "fully allocated" } else { "available" };
        if summary.is_empty() {
            println!(
                "#{} {} [{}] {}/{} remaining ({state})",
                item.id,
                item.description,
                item.register,
                item.remaining_quantity,
                item.total_quantity,
            );
        } else {
            println!(
                "#{} {} [{}] {}/{} remaining ({state}): {}",
                item.id,
                item.description,
                item.register,
                item.remaining_quantity,
                item.total_quantity,
                summary_line(&summary),
            );
        }
    }
    Ok(())
}
