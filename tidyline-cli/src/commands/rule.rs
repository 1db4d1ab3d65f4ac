//! Rule command - manage and apply classification rules

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;

use super::{get_context, get_logger, log_event, parse_id, parse_ids};
use crate::output;
use tidyline_core::services::logging::events;
use tidyline_core::{
    validate_rule_conditions, Error, LogEvent, LoggingService, NewRule, OperationResult, Rule, RuleChange,
    RuleUpdate, ValidationResult,
};

#[derive(Subcommand)]
pub enum RuleCommands {
    /// Check a rule body without saving it
    Validate {
        /// Rule body as JSON (read from stdin when omitted)
        body: Option<String>,
        /// Read the rule body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create a rule
    Add {
        /// Rule name
        #[arg(long)]
        name: String,
        /// Rule body as JSON
        #[arg(long)]
        conditions: String,
        /// Category to assign
        #[arg(long)]
        category: Option<i64>,
        /// Merchant to assign
        #[arg(long)]
        merchant: Option<String>,
        /// Evaluation order (lower runs first); defaults to last
        #[arg(long)]
        priority: Option<i32>,
        /// Apply the rule to existing transactions afterwards
        #[arg(long)]
        backfill: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a rule
    Edit {
        /// Rule ID
        id: String,
        #[arg(long)]
        name: Option<String>,
        /// New rule body as JSON
        #[arg(long)]
        conditions: Option<String>,
        #[arg(long, conflicts_with = "clear_category")]
        category: Option<i64>,
        #[arg(long, conflicts_with = "clear_merchant")]
        merchant: Option<String>,
        /// Stop assigning a category
        #[arg(long)]
        clear_category: bool,
        /// Stop assigning a merchant
        #[arg(long)]
        clear_merchant: bool,
        #[arg(long)]
        priority: Option<i32>,
        /// Apply the rule to existing transactions afterwards
        #[arg(long)]
        backfill: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Turn a rule on
    Enable {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Turn a rule off
    Disable {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Delete a rule
    Remove {
        id: String,
        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
        #[arg(long)]
        json: bool,
    },
    /// List rules in evaluation order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Re-apply active rules to existing transactions
    Apply {
        /// Only these transaction IDs (comma-separated)
        #[arg(long, value_delimiter = ',')]
        ids: Vec<String>,
        /// Also overwrite values that were set by hand
        #[arg(long)]
        include_manual: bool,
        #[arg(long)]
        json: bool,
    },
}

pub fn run(command: RuleCommands) -> Result<()> {
    let logger = get_logger();

    let name = match &command {
        RuleCommands::Validate { .. } => "rule validate",
        RuleCommands::Add { .. } => "rule add",
        RuleCommands::Edit { .. } => "rule edit",
        RuleCommands::Enable { .. } => "rule enable",
        RuleCommands::Disable { .. } => "rule disable",
        RuleCommands::Remove { .. } => "rule remove",
        RuleCommands::List { .. } => "rule list",
        RuleCommands::Apply { .. } => "rule apply",
    };
    log_event(&logger, LogEvent::new(events::COMMAND_EXECUTED).with_command(name));

    match command {
        RuleCommands::Validate { body, file, json } => run_validate(body, file, json),
        RuleCommands::Add {
            name,
            conditions,
            category,
            merchant,
            priority,
            backfill,
            json,
        } => {
            let ctx = get_context(&logger)?;
            let new = NewRule {
                rule_name: name,
                conditions: parse_body(&conditions, json)?,
                category_id: category,
                merchant,
                priority_order: priority,
                rule_source: None,
                backfill: backfill || ctx.config.backfill_on_create,
            };
            let change = checked(ctx.rule_service.create_rule(ctx.user_id(), new), json)?;
            print_change("Rule created", &change, json)
        }
        RuleCommands::Edit {
            id,
            name,
            conditions,
            category,
            merchant,
            clear_category,
            clear_merchant,
            priority,
            backfill,
            json,
        } => {
            let ctx = get_context(&logger)?;
            let rule_id = parse_id(&id)?;
            let update = RuleUpdate {
                rule_name: name,
                conditions: conditions.map(|c| parse_body(&c, json)).transpose()?,
                category_id: if clear_category { Some(None) } else { category.map(Some) },
                merchant: if clear_merchant { Some(None) } else { merchant.map(Some) },
                is_active: None,
                priority_order: priority,
                backfill,
            };
            let change = checked(ctx.rule_service.update_rule(ctx.user_id(), rule_id, update), json)?;
            print_change("Rule updated", &change, json)
        }
        RuleCommands::Enable { id, json } => run_set_active(&logger, &id, true, json),
        RuleCommands::Disable { id, json } => run_set_active(&logger, &id, false, json),
        RuleCommands::Remove { id, force, json } => {
            let ctx = get_context(&logger)?;
            let rule = ctx.rule_service.get_rule(ctx.user_id(), parse_id(&id)?)?;

            if !force && !json {
                println!("\n{}", format!("This will delete the rule '{}'.", rule.rule_name).yellow());
                println!("{}\n", "Transactions it already classified keep their values.".dimmed());

                if !Confirm::new()
                    .with_prompt("Are you sure?")
                    .default(false)
                    .interact()?
                {
                    println!("{}\n", "Cancelled".dimmed());
                    return Ok(());
                }
            }

            ctx.rule_service.delete_rule(ctx.user_id(), rule.rule_id)?;
            if json {
                let result = OperationResult::ok(json!({ "rule_id": rule.rule_id }));
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("\n{} Rule '{}' removed\n", "✓".green(), rule.rule_name);
            }
            Ok(())
        }
        RuleCommands::List { json } => {
            let ctx = get_context(&logger)?;
            let rules = ctx.rule_service.list_rules(ctx.user_id())?;

            if json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
                return Ok(());
            }
            if rules.is_empty() {
                println!("No rules yet. Create one with 'tidy rule add'.");
                return Ok(());
            }
            print_rules(&rules);
            Ok(())
        }
        RuleCommands::Apply {
            ids,
            include_manual,
            json,
        } => {
            let ctx = get_context(&logger)?;
            let ids = parse_ids(&ids)?;
            let include_manual = include_manual || ctx.config.include_manually_set;

            let spinner = if json { None } else { Some(spinner("Applying rules...")?) };
            let result = ctx.rule_service.apply_to_existing(
                ctx.user_id(),
                if ids.is_empty() { None } else { Some(ids.as_slice()) },
                include_manual,
            );
            if let Some(spinner) = spinner {
                spinner.finish_and_clear();
            }
            let result = result?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
                if result.groups_failed > 0 {
                    exit(1);
                }
                return Ok(());
            }

            if result.rules_evaluated == 0 {
                output::info("No active rules to apply.");
                return Ok(());
            }
            println!("{} Rules applied", "✓".green());
            println!("  Rules evaluated: {}", result.rules_evaluated);
            println!("  Transactions evaluated: {}", result.transactions_evaluated);
            println!("  Transactions matched: {}", result.transactions_matched);
            println!("  Transactions updated: {}", result.updated_count);
            if result.groups_failed > 0 {
                output::warning(&format!(
                    "  {} group(s) could not be written; see 'tidy logs list --event rule_group_update_failed'",
                    result.groups_failed
                ));
                exit(1);
            }
            Ok(())
        }
    }
}

fn run_validate(body: Option<String>, file: Option<PathBuf>, json: bool) -> Result<()> {
    let raw = match (body, file) {
        (Some(body), _) => body,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        (None, None) if atty::isnt(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
        (None, None) => anyhow::bail!("No rule body provided. Pass it as an argument, with --file, or on stdin."),
    };

    let result = validate_rule_conditions(&raw);
    if !result.valid {
        report_invalid(&result, json);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        output::success("Rule body is valid");
        if let Some(conditions) = &result.conditions {
            println!("{}", serde_json::to_string_pretty(conditions)?);
        }
    }
    Ok(())
}

fn run_set_active(logger: &Option<Arc<LoggingService>>, id: &str, is_active: bool, json: bool) -> Result<()> {
    let ctx = get_context(logger)?;
    let rule = ctx
        .rule_service
        .set_active(ctx.user_id(), parse_id(id)?, is_active)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rule)?);
    } else if is_active {
        output::success(&format!("Rule '{}' enabled", rule.rule_name));
    } else {
        output::warning(&format!("Rule '{}' disabled", rule.rule_name));
    }
    Ok(())
}

/// Parse a rule body given on the command line; bad JSON is reported the
/// same way as any other invalid body
fn parse_body(raw: &str, json: bool) -> Result<serde_json::Value> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) => report_invalid(&validate_rule_conditions(raw), json),
    }
}

/// Unwrap a service result, reporting a rejected rule body in full
fn checked(result: tidyline_core::domain::result::Result<RuleChange>, json: bool) -> Result<RuleChange> {
    match result {
        Err(Error::InvalidConditions(validation)) => report_invalid(&validation, json),
        other => Ok(other?),
    }
}

fn report_invalid(result: &ValidationResult, json: bool) -> ! {
    if json {
        match serde_json::to_string_pretty(result) {
            Ok(body) => println!("{}", body),
            Err(e) => eprintln!("{}", e),
        }
        exit(1);
    }

    output::error("Rule body is invalid");
    let mut table = output::create_table();
    table.set_header(vec!["Field", "Code", "Message"]);
    for error in &result.errors {
        table.add_row(vec![error.field.clone(), error.code.to_string(), error.message.clone()]);
    }
    eprintln!("{}", table);
    exit(1);
}

fn print_change(title: &str, change: &RuleChange, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(change)?);
        return Ok(());
    }

    let rule = &change.rule;
    println!("{} {}", "✓".green(), title);
    println!("  Rule ID: {}", rule.rule_id);
    println!("  Name: {}", rule.rule_name);
    println!("  Priority: {}", rule.priority_order);
    println!("  Assigns: {}", targets(rule));
    if let Some(backfill) = &change.backfill {
        println!("  Existing transactions updated: {}", backfill.updated_count);
        if backfill.groups_failed > 0 {
            output::warning(&format!("  {} group(s) could not be written", backfill.groups_failed));
        }
    }
    Ok(())
}

fn print_rules(rules: &[Rule]) {
    let mut table = output::create_table();
    table.set_header(vec!["#", "ID", "Name", "Active", "Assigns", "Conditions", "Applied", "Last applied"]);

    for rule in rules {
        let active = if rule.is_active {
            "yes".green().to_string()
        } else {
            "no".dimmed().to_string()
        };
        table.add_row(vec![
            rule.priority_order.to_string(),
            rule.rule_id.to_string(),
            rule.rule_name.clone(),
            active,
            targets(rule),
            rule.conditions.to_json().to_string(),
            rule.times_applied.to_string(),
            rule.last_applied_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        ]);
    }
    println!("{}", table);
}

fn targets(rule: &Rule) -> String {
    let mut parts = Vec::new();
    if let Some(category_id) = rule.category_id {
        parts.push(format!("category {}", category_id));
    }
    if let Some(merchant) = &rule.merchant {
        parts.push(format!("merchant '{}'", merchant));
    }
    parts.join(", ")
}

fn spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.cyan} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    Ok(spinner)
}
