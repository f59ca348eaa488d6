//! Accounts command implementation

use anyhow::{Context, Result};

use ai_binary_trader::broker::{Broker, PaperBroker};
use ai_binary_trader::Config;

pub fn run(config_path: String) -> Result<()> {
    let _config = Config::from_file(&config_path).context("Failed to load configuration")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let broker = PaperBroker::new();
        let accounts = broker.list_accounts().await?;

        println!("{:<12} {:<16} {:<6} {:<5} {:>12}", "ID", "NAME", "TYPE", "CCY", "BALANCE");
        for account in accounts {
            println!(
                "{:<12} {:<16} {:<6?} {:<5} {:>12}",
                account.id, account.name, account.kind, account.currency, account.balance
            );
        }
        Ok(())
    })
}
