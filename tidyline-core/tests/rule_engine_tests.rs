//! DuckDB-backed rule storage and application tests
//!
//! Run with: cargo test --test rule_engine_tests

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use tidyline_core::adapters::duckdb::DuckDbRepository;
use tidyline_core::domain::{Account, Rule, RuleConditions, Transaction};
use tidyline_core::ports::{LedgerStore, RuleStore};
use tidyline_core::{validate_rule_conditions, NewRule, RuleService};

const USER: &str = "user-1";

// ============================================================================
// Test Helpers
// ============================================================================

fn create_test_repo(dir: &Path) -> Arc<DuckDbRepository> {
    let repo = DuckDbRepository::new(&dir.join("test.duckdb")).expect("Failed to open database");
    repo.ensure_schema().expect("Failed to migrate");
    Arc::new(repo)
}

fn conditions(body: serde_json::Value) -> RuleConditions {
    validate_rule_conditions(&body.to_string())
        .into_conditions()
        .expect("valid conditions")
}

fn make_rule(name: &str, priority: i32, category_id: Option<i64>) -> Rule {
    let mut rule = Rule::new(
        USER,
        name,
        conditions(json!({"logic": "AND", "conditions": [
            {"field": "merchant", "operator": "contains", "value": name}
        ]})),
    );
    rule.priority_order = priority;
    rule.category_id = category_id;
    rule
}

fn make_account(repo: &DuckDbRepository) -> Account {
    let mut account = Account::new(Uuid::new_v4(), USER, "Joint Savings");
    account.account_type = Some("savings".into());
    account.bank = Some("Ally".into());
    repo.insert_account(&account).unwrap();
    account
}

fn make_tx(repo: &DuckDbRepository, account: &Account, merchant: &str, amount: &str) -> Transaction {
    let mut tx = Transaction::new(
        Uuid::new_v4(),
        USER,
        account.id,
        amount.parse::<Decimal>().unwrap(),
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap(),
    );
    tx.merchant = Some(merchant.to_string());
    tx.description = Some(format!("POS {}", merchant));
    tx.direction = Some(Transaction::direction_for_amount(tx.amount));
    repo.insert_transaction(&tx).unwrap();
    tx
}

// ============================================================================
// Rule Storage
// ============================================================================

#[test]
fn test_rule_round_trip() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());

    let mut rule = make_rule("costco", 3, Some(7));
    rule.merchant = Some("Costco".into());
    repo.insert_rule(&rule).unwrap();

    let loaded = repo.get_rule(USER, rule.rule_id).unwrap().unwrap();
    assert_eq!(loaded.rule_name, "costco");
    assert_eq!(loaded.conditions, rule.conditions);
    assert_eq!(loaded.category_id, Some(7));
    assert_eq!(loaded.merchant.as_deref(), Some("Costco"));
    assert_eq!(loaded.priority_order, 3);
    assert!(loaded.is_active);

    assert!(repo.get_rule("someone-else", rule.rule_id).unwrap().is_none());
    assert_eq!(repo.max_priority(USER).unwrap(), Some(3));
    assert_eq!(repo.max_priority("someone-else").unwrap(), None);
}

#[test]
fn test_update_and_delete_rule() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());

    let mut rule = make_rule("shell", 0, Some(9));
    repo.insert_rule(&rule).unwrap();
    repo.record_rule_applications(rule.rule_id, 4, Utc::now()).unwrap();

    rule.is_active = false;
    rule.rule_name = "Fuel".into();
    repo.update_rule(&rule).unwrap();

    let loaded = repo.get_rule(USER, rule.rule_id).unwrap().unwrap();
    assert_eq!(loaded.rule_name, "Fuel");
    assert!(!loaded.is_active);
    // Counters survive an edit
    assert_eq!(loaded.times_applied, 4);
    assert!(loaded.last_applied_at.is_some());
    assert!(repo.fetch_active_rules(USER).unwrap().is_empty());

    assert!(repo.delete_rule(USER, rule.rule_id).unwrap());
    assert!(!repo.delete_rule(USER, rule.rule_id).unwrap());

    let missing = make_rule("missing", 0, Some(1));
    assert!(repo.update_rule(&missing).is_err());
}

#[test]
fn test_active_rules_in_priority_order() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());

    for (name, priority) in [("third", 20), ("first", 0), ("second", 10)] {
        repo.insert_rule(&make_rule(name, priority, Some(1))).unwrap();
    }

    let names: Vec<String> = repo
        .fetch_active_rules(USER)
        .unwrap()
        .into_iter()
        .map(|r| r.rule_name)
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn test_invalid_stored_conditions_are_skipped() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("test.duckdb");

    let good = make_rule("good", 0, Some(1));
    let bad = make_rule("bad", 1, Some(2));
    {
        let repo = DuckDbRepository::new(&db_path).unwrap();
        repo.ensure_schema().unwrap();
        repo.insert_rule(&good).unwrap();
        repo.insert_rule(&bad).unwrap();
    }
    {
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute(
            "UPDATE sys_rules SET conditions = ? WHERE rule_id = ?",
            duckdb::params![
                r#"{"logic":"AND","conditions":[{"field":"amount","operator":"contains","value":"x"}]}"#,
                bad.rule_id.to_string()
            ],
        )
        .unwrap();
    }

    let repo = DuckDbRepository::new(&db_path).unwrap();
    let active = repo.fetch_active_rules(USER).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_id, good.rule_id);
    assert_eq!(repo.list_rules(USER).unwrap().len(), 1);
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_transaction_round_trip() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());
    let account = make_account(&repo);

    let tx = make_tx(&repo, &account, "Trader Joe's", "-42.17");
    let loaded = repo.fetch_transaction(USER, tx.id).unwrap().unwrap();
    assert_eq!(loaded.amount, Decimal::new(-4217, 2));
    assert_eq!(loaded.direction, Some(0));
    assert_eq!(loaded.transaction_date, tx.transaction_date);
    assert_eq!(loaded.merchant.as_deref(), Some("Trader Joe's"));

    let context = repo.fetch_account_context(USER, account.id).unwrap().unwrap();
    assert_eq!(context.account_type.as_deref(), Some("savings"));
    assert_eq!(context.bank.as_deref(), Some("Ally"));
    assert!(repo.fetch_account_context("someone-else", account.id).unwrap().is_none());
}

#[test]
fn test_eligibility_filter() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());
    let account = make_account(&repo);

    let open = make_tx(&repo, &account, "Open", "-1.00");
    let mut half = make_tx(&repo, &account, "Half", "-2.00");
    half.category_manually_set = true;
    repo.update_transaction(&half).unwrap();
    let mut full = make_tx(&repo, &account, "Full", "-3.00");
    full.category_manually_set = true;
    full.merchant_manually_set = true;
    repo.update_transaction(&full).unwrap();

    let ids = |txs: Vec<Transaction>| {
        let mut ids: Vec<Uuid> = txs.into_iter().map(|t| t.id).collect();
        ids.sort();
        ids
    };
    let sorted = |mut v: Vec<Uuid>| {
        v.sort();
        v
    };

    let eligible = repo
        .fetch_transactions_eligible_for_rule_application(USER, None, false)
        .unwrap();
    assert_eq!(ids(eligible), sorted(vec![open.id, half.id]));

    let everything = repo
        .fetch_transactions_eligible_for_rule_application(USER, None, true)
        .unwrap();
    assert_eq!(everything.len(), 3);

    let narrowed = repo
        .fetch_transactions_eligible_for_rule_application(USER, Some(&[full.id, open.id]), false)
        .unwrap();
    assert_eq!(ids(narrowed), vec![open.id]);

    let none = repo
        .fetch_transactions_eligible_for_rule_application(USER, Some(&[]), true)
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_grouped_update_writes_only_given_fields() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());
    let account = make_account(&repo);

    let a = make_tx(&repo, &account, "amzn mktp", "-10.00");
    let b = make_tx(&repo, &account, "amzn prime", "-14.99");
    let c = make_tx(&repo, &account, "other", "-1.00");

    let updated = repo
        .persist_grouped_update(USER, Some(8), None, &[a.id, b.id])
        .unwrap();
    assert_eq!(updated, 2);

    let a = repo.fetch_transaction(USER, a.id).unwrap().unwrap();
    assert_eq!(a.category_id, Some(8));
    assert_eq!(a.merchant.as_deref(), Some("amzn mktp"));
    assert_eq!(repo.fetch_transaction(USER, c.id).unwrap().unwrap().category_id, None);

    // Another user's rows are never touched
    let updated = repo
        .persist_grouped_update("someone-else", Some(1), Some("X"), &[a.id])
        .unwrap();
    assert_eq!(updated, 0);
    assert_eq!(repo.persist_grouped_update(USER, None, None, &[a.id]).unwrap(), 0);
}

// ============================================================================
// End To End
// ============================================================================

#[test]
fn test_bulk_application_on_duckdb() {
    let dir = TempDir::new().unwrap();
    let repo = create_test_repo(dir.path());
    let service = RuleService::new(repo.clone());
    let account = make_account(&repo);

    let rule = service
        .create_rule(
            USER,
            NewRule {
                rule_name: "Groceries".into(),
                conditions: json!({"logic": "OR", "conditions": [
                    {"field": "merchant", "operator": "contains", "value": "kroger"},
                    {"field": "merchant", "operator": "contains", "value": "safeway"}
                ]}),
                category_id: Some(3),
                ..Default::default()
            },
        )
        .unwrap()
        .rule;
    service
        .create_rule(
            USER,
            NewRule {
                rule_name: "Big spend".into(),
                conditions: json!({"logic": "AND", "conditions": [
                    {"field": "amount", "operator": "greater_than", "value": 100},
                    {"field": "direction", "operator": "equals", "value": 0}
                ]}),
                merchant: Some("Large purchase".into()),
                ..Default::default()
            },
        )
        .unwrap();

    make_tx(&repo, &account, "KROGER #12", "-54.10");
    make_tx(&repo, &account, "SAFEWAY 0099", "-22.00");
    let big = make_tx(&repo, &account, "KROGER #12", "-180.00");
    make_tx(&repo, &account, "Payroll", "2500.00");

    let result = service.apply_to_existing(USER, None, false).unwrap();
    assert_eq!(result.rules_evaluated, 2);
    assert_eq!(result.transactions_evaluated, 4);
    assert_eq!(result.transactions_matched, 3);
    assert_eq!(result.groups_written, 2);
    assert_eq!(result.updated_count, 3);

    let big = repo.fetch_transaction(USER, big.id).unwrap().unwrap();
    assert_eq!(big.category_id, Some(3));
    assert_eq!(big.merchant.as_deref(), Some("Large purchase"));

    let rule = service.get_rule(USER, rule.rule_id).unwrap();
    assert_eq!(rule.times_applied, 3);
}

#[test]
fn test_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let rule = make_rule("rent", 0, Some(2));
    {
        let repo = create_test_repo(dir.path());
        repo.insert_rule(&rule).unwrap();
    }

    let repo = create_test_repo(dir.path());
    assert_eq!(repo.list_rules(USER).unwrap().len(), 1);
    let result = repo.run_migrations().unwrap();
    assert_eq!(result.applied.len(), 0);
}
