//! Account command - accounts whose fields rules can match on

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use super::{get_context, get_logger, log_event};
use crate::output;
use tidyline_core::services::logging::events;
use tidyline_core::{LogEvent, NewAccount};

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Add an account
    Add {
        /// Account name
        name: String,
        /// Account type (checking, savings, credit, ...)
        #[arg(long = "type")]
        account_type: Option<String>,
        /// Bank or institution name
        #[arg(long)]
        bank: Option<String>,
        /// Currency code (default USD)
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List accounts
    List {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: AccountCommands) -> Result<()> {
    let logger = get_logger();
    let ctx = get_context(&logger)?;

    match command {
        AccountCommands::Add {
            name,
            account_type,
            bank,
            currency,
            json,
        } => {
            log_event(&logger, LogEvent::new(events::COMMAND_EXECUTED).with_command("account add"));
            let account = ctx.ledger_service.add_account(
                ctx.user_id(),
                NewAccount {
                    name,
                    account_type,
                    bank,
                    currency,
                },
            )?;

            if json {
                println!("{}", serde_json::to_string_pretty(&account)?);
            } else {
                println!("{} Account created", "✓".green());
                println!("  Account ID: {}", account.id);
                println!("  Name: {}", account.name);
            }
        }
        AccountCommands::List { json } => {
            let accounts = ctx.ledger_service.list_accounts(ctx.user_id())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
                return Ok(());
            }
            if accounts.is_empty() {
                println!("No accounts yet. Create one with 'tidy account add'.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["ID", "Name", "Type", "Bank", "Currency"]);
            for account in accounts {
                table.add_row(vec![
                    account.id.to_string(),
                    account.name,
                    account.account_type.unwrap_or_default(),
                    account.bank.unwrap_or_default(),
                    account.currency,
                ]);
            }
            println!("{}", table);
        }
    }

    Ok(())
}
