//! Register workflow commands: create, delete, list.

use stockbook::models::RegisterState;

use super::CliError;

/// Create an empty register (step one of the two-step workflow).
pub async fn create(name: &str) -> Result<(), CliError> {
    let ledger = super::connect().await?;
    ledger.create_register(name).await?;
    #[allow(clippy::print_stdout)]
    {
        println!("Created empty register '{name}'");
    }
    Ok(())
}

/// Delete a pending empty register.
pub async fn delete(name: &str) -> Result<(), CliError> {
    let ledger = super::connect().await?;
    ledger.delete_register(name).await?;
    #[allow(clippy::print_stdout)]
    {
        println!("Deleted register '{name}'");
    }
    Ok(())
}

/// List registers with item counts and total value.
pub async fn list() -> Result<(), CliError> {
    let ledger = super::connect().await?;
    let registers = ledger.list_registers().await?;
    #[allow(clippy::print_stdout)]
    {
        if registers.is_empty() {
            println!("No registers");
            return Ok(());
        }
        for register in registers {
            match register.state {
                RegisterState::Empty => println!("{} (empty)", register.name),
                RegisterState::Populated => println!(
                    "{}: {} items, total value {}",
                    register.name, register.item_count, register.total_value
                ),
            }
        }
    }
    Ok(())
}
