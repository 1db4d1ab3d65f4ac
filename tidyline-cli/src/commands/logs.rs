//! Logs command - what the rule engine recorded
//!
//! Entries hold ids and counts only, so `--rule` is the way to trace one
//! rule's history and `--event rule_group_update_failed` shows the bulk
//! writes that were skipped.

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;

use super::{get_tidyline_dir, parse_id};
use crate::output;
use tidyline_core::services::logging::events;
use tidyline_core::{EntryPoint, LogEntry, LogFilter, LogStats, LoggingService};

#[derive(Subcommand)]
pub enum LogsCommands {
    /// Show recent entries, newest first
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        /// Only entries that carry an error
        #[arg(long)]
        errors: bool,
        /// Only this event (e.g. rules_applied, rule_group_update_failed)
        #[arg(long)]
        event: Option<String>,
        /// Only entries about this rule
        #[arg(long)]
        rule: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Delete entries older than N days
    Clear {
        #[arg(long, default_value = "30")]
        older_than_days: u32,
        #[arg(long, short = 'f')]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// Per-event totals, including bulk apply results
    Stats {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: LogsCommands) -> Result<()> {
    let tidyline_dir = get_tidyline_dir()?;
    std::fs::create_dir_all(&tidyline_dir)?;
    let logs = LoggingService::new(&tidyline_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))?;

    match command {
        LogsCommands::List {
            limit,
            errors,
            event,
            rule,
            json,
        } => {
            let filter = LogFilter {
                event,
                rule_id: rule.as_deref().map(parse_id).transpose()?,
                errors_only: errors,
                limit,
            };
            let entries = logs.query(&filter)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if entries.is_empty() {
                println!("No log entries match.");
            } else {
                print_entries(&entries);
            }
        }
        LogsCommands::Clear {
            older_than_days,
            force,
            json,
        } => {
            let cutoff = Utc::now() - Duration::days(older_than_days.into());

            if !force && !json {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete log entries older than {} days?", older_than_days))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            let deleted = logs.prune(cutoff)?;
            if json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                output::success(&format!("Deleted {} log entries", deleted));
            }
        }
        LogsCommands::Stats { json } => {
            let stats = logs.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                print_stats(&stats);
            }
        }
    }

    Ok(())
}

fn print_entries(entries: &[LogEntry]) {
    let mut table = output::create_table();
    table.set_header(vec!["Time", "Event", "Rule", "Command", "Count", "Error"]);

    for entry in entries {
        let event = if entry.is_error() {
            entry.event.red().to_string()
        } else {
            entry.event.clone()
        };
        table.add_row(vec![
            local_time(entry.timestamp),
            event,
            entry.rule_id.clone().unwrap_or_default(),
            entry.command.clone().unwrap_or_default(),
            entry.affected_count.map(|c| c.to_string()).unwrap_or_default(),
            entry.error_message.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
}

fn print_stats(stats: &LogStats) {
    let applied = stats.event(events::RULES_APPLIED);
    let failed = stats.event(events::RULE_GROUP_UPDATE_FAILED);

    println!("{}", "Rule activity".bold());
    println!("  Rules created: {}", stats.event(events::RULE_CREATED).entries);
    println!("  Bulk runs: {}", applied.entries);
    println!("  Transactions classified by bulk runs: {}", applied.affected);
    if failed.entries > 0 {
        println!(
            "  {}",
            format!(
                "Failed groups: {} ({} transactions left unchanged)",
                failed.entries, failed.affected
            )
            .yellow()
        );
    }

    if !stats.events.is_empty() {
        println!();
        let mut table = output::create_table();
        table.set_header(vec!["Event", "Entries", "Errors", "Affected"]);
        for event in &stats.events {
            table.add_row(vec![
                event.event.clone(),
                event.entries.to_string(),
                event.errors.to_string(),
                event.affected.to_string(),
            ]);
        }
        println!("{}", table);
    }

    let size = std::fs::metadata(&stats.database_path).map(|m| m.len()).unwrap_or(0);
    println!();
    println!(
        "{}",
        format!(
            "{} entries, {} with errors. {} ({})",
            stats.total_entries,
            stats.error_entries,
            stats.database_path.display(),
            output::format_size(size)
        )
        .dimmed()
    );
}

fn local_time(timestamp_ms: i64) -> String {
    chrono::Local
        .timestamp_millis_opt(timestamp_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| timestamp_ms.to_string())
}
