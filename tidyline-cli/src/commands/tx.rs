//! Tx command - record and edit transactions
//!
//! New and edited transactions run through the active rules. A category or
//! merchant given here counts as set by hand and is left alone by rules.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::Subcommand;
use colored::Colorize;
use rust_decimal::Decimal;

use super::{get_context, get_logger, log_event, parse_id};
use crate::output;
use tidyline_core::services::logging::events;
use tidyline_core::{LogEvent, NewTransaction, Transaction, TransactionUpdate};

#[derive(Subcommand)]
pub enum TxCommands {
    /// Record a transaction
    Add {
        /// Account ID
        #[arg(long)]
        account: String,
        /// Signed amount (negative for money out)
        #[arg(long, allow_hyphen_values = true)]
        amount: String,
        #[arg(long)]
        description: Option<String>,
        /// Merchant as reported by the bank
        #[arg(long)]
        merchant: Option<String>,
        /// Category picked by hand
        #[arg(long)]
        category: Option<i64>,
        /// 0 = debit, 1 = credit, 2 = transfer (default from the amount's sign)
        #[arg(long)]
        direction: Option<i32>,
        /// Date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// List transactions, newest first
    List {
        /// Only this account
        #[arg(long)]
        account: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Edit a transaction
    Set {
        /// Transaction ID
        id: String,
        /// Category picked by hand
        #[arg(long, conflicts_with = "release_category")]
        category: Option<i64>,
        /// Merchant picked by hand
        #[arg(long, conflicts_with = "release_merchant")]
        merchant: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        amount: Option<String>,
        #[arg(long)]
        date: Option<String>,
        /// Let rules set the category again
        #[arg(long)]
        release_category: bool,
        /// Let rules set the merchant again
        #[arg(long)]
        release_merchant: bool,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: TxCommands) -> Result<()> {
    let logger = get_logger();
    let ctx = get_context(&logger)?;

    match command {
        TxCommands::Add {
            account,
            amount,
            description,
            merchant,
            category,
            direction,
            date,
            currency,
            json,
        } => {
            log_event(&logger, LogEvent::new(events::COMMAND_EXECUTED).with_command("tx add"));
            let new = NewTransaction {
                account_id: parse_id(&account)?,
                amount: parse_amount(&amount)?,
                direction,
                description,
                merchant,
                currency,
                category_id: category,
                merchant_manually_set: false,
                transaction_date: date.as_deref().map(parse_date).transpose()?,
            };
            let tx = ctx.ledger_service.add_transaction(ctx.user_id(), new)?;
            print_tx("Transaction recorded", &tx, json)
        }
        TxCommands::List { account, limit, json } => {
            let account_id = account.as_deref().map(parse_id).transpose()?;
            let transactions =
                ctx.ledger_service
                    .list_transactions(ctx.user_id(), account_id, Some(limit))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&transactions)?);
                return Ok(());
            }
            if transactions.is_empty() {
                println!("No transactions found.");
                return Ok(());
            }

            let mut table = output::create_table();
            table.set_header(vec!["Date", "ID", "Amount", "Description", "Merchant", "Category"]);
            for tx in &transactions {
                table.add_row(vec![
                    tx.transaction_date.to_string(),
                    tx.id.to_string(),
                    tx.amount.to_string(),
                    tx.description.clone().unwrap_or_default(),
                    marked(tx.merchant.clone().unwrap_or_default(), tx.merchant_manually_set),
                    marked(
                        tx.category_id.map(|c| c.to_string()).unwrap_or_default(),
                        tx.category_manually_set,
                    ),
                ]);
            }
            println!("{}", table);
            println!("{}", "* set by hand".dimmed());
            Ok(())
        }
        TxCommands::Set {
            id,
            category,
            merchant,
            description,
            amount,
            date,
            release_category,
            release_merchant,
            json,
        } => {
            log_event(&logger, LogEvent::new(events::COMMAND_EXECUTED).with_command("tx set"));
            let update = TransactionUpdate {
                amount: amount.as_deref().map(parse_amount).transpose()?,
                description,
                merchant,
                category_id: category,
                transaction_date: date.as_deref().map(parse_date).transpose()?,
                release_category,
                release_merchant,
            };
            let tx = ctx
                .ledger_service
                .update_transaction(ctx.user_id(), parse_id(&id)?, update)?;
            print_tx("Transaction updated", &tx, json)
        }
    }
}

fn parse_amount(s: &str) -> Result<Decimal> {
    s.trim()
        .parse()
        .map_err(|_| anyhow!("Invalid amount: {}", s))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| anyhow!("Invalid date format. Use YYYY-MM-DD"))
}

fn marked(value: String, manual: bool) -> String {
    if manual && !value.is_empty() {
        format!("{} *", value)
    } else {
        value
    }
}

fn print_tx(title: &str, tx: &Transaction, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(tx)?);
        return Ok(());
    }

    println!("{} {}", "✓".green(), title);
    println!("  Transaction ID: {}", tx.id);
    println!("  Amount: {}", tx.amount);
    println!(
        "  Merchant: {}",
        marked(tx.merchant.clone().unwrap_or_else(|| "-".into()), tx.merchant_manually_set)
    );
    println!(
        "  Category: {}",
        marked(
            tx.category_id.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            tx.category_manually_set
        )
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("-4.50").unwrap(), Decimal::new(-450, 2));
        assert!(parse_amount("four").is_err());
    }

    #[test]
    fn test_marked() {
        assert_eq!(marked("12".into(), true), "12 *");
        assert_eq!(marked("12".into(), false), "12");
        assert_eq!(marked(String::new(), true), "");
    }
}
