//! Tidyline CLI - rule-based transaction classification in your terminal

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;

use commands::{account, logs, rule, tx};

/// Tidyline - classify transactions with rules
#[derive(Parser)]
#[command(name = "tidy", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage and apply classification rules
    Rule {
        #[command(subcommand)]
        command: rule::RuleCommands,
    },

    /// Manage accounts
    Account {
        #[command(subcommand)]
        command: account::AccountCommands,
    },

    /// Record, list and edit transactions
    Tx {
        #[command(subcommand)]
        command: tx::TxCommands,
    },

    /// Inspect what the rule engine recorded
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Rule { command } => rule::run(command),
        Commands::Account { command } => account::run(command),
        Commands::Tx { command } => tx::run(command),
        Commands::Logs { command } => logs::run(command),
    }
}
