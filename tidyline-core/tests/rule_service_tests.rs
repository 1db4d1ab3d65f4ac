//! Rule application tests against the in-memory store
//!
//! Run with: cargo test --test rule_service_tests

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

use tidyline_core::adapters::memory::MemoryStore;
use tidyline_core::domain::{Account, Transaction};
use tidyline_core::ports::{LedgerStore, RuleStore};
use tidyline_core::{LedgerService, NewRule, NewTransaction, RuleService, TransactionUpdate};

const USER: &str = "user-1";

// ============================================================================
// Test Helpers
// ============================================================================

fn setup() -> (Arc<MemoryStore>, RuleService, Account) {
    let store = Arc::new(MemoryStore::new());
    let service = RuleService::new(store.clone());

    let mut account = Account::new(Uuid::new_v4(), USER, "Everyday Checking");
    account.account_type = Some("checking".into());
    account.bank = Some("Chase".into());
    store.insert_account(&account).unwrap();

    (store, service, account)
}

fn add_tx(store: &MemoryStore, account: &Account, merchant: &str, cents: i64) -> Transaction {
    let mut tx = Transaction::new(
        Uuid::new_v4(),
        USER,
        account.id,
        Decimal::new(cents, 2),
        NaiveDate::from_ymd_opt(2025, 2, 3).unwrap(),
    );
    tx.merchant = Some(merchant.to_string());
    tx.direction = Some(0);
    store.insert_transaction(&tx).unwrap();
    tx
}

fn create_rule(
    service: &RuleService,
    name: &str,
    conditions: serde_json::Value,
    category_id: Option<i64>,
    merchant: Option<&str>,
) -> Uuid {
    service
        .create_rule(
            USER,
            NewRule {
                rule_name: name.to_string(),
                conditions,
                category_id,
                merchant: merchant.map(str::to_string),
                ..Default::default()
            },
        )
        .unwrap()
        .rule
        .rule_id
}

fn merchant_contains(text: &str) -> serde_json::Value {
    json!({"logic": "AND", "conditions": [
        {"field": "merchant", "operator": "contains", "value": text}
    ]})
}

fn reload(store: &MemoryStore, tx: &Transaction) -> Transaction {
    store.fetch_transaction(USER, tx.id).unwrap().unwrap()
}

// ============================================================================
// Single Transaction
// ============================================================================

#[test]
fn test_manual_category_is_protected() {
    let (store, service, account) = setup();
    create_rule(&service, "Amazon", merchant_contains("amzn"), Some(8), Some("Amazon"));

    let mut tx = add_tx(&store, &account, "AMZN Mktp US*2K4", -2599);
    tx.category_id = Some(3);
    tx.category_manually_set = true;
    store.update_transaction(&tx).unwrap();

    let outcome = service.apply_to_transaction(USER, tx.id).unwrap();
    assert_eq!(outcome.category_id, None);
    assert_eq!(outcome.merchant.as_deref(), Some("Amazon"));

    let stored = reload(&store, &tx);
    assert_eq!(stored.category_id, Some(3));
    assert_eq!(stored.merchant.as_deref(), Some("Amazon"));
}

#[test]
fn test_fully_manual_transaction_is_skipped() {
    let (store, service, account) = setup();
    create_rule(&service, "Amazon", merchant_contains("amzn"), Some(8), Some("Amazon"));

    let mut tx = add_tx(&store, &account, "AMZN Mktp US", -1000);
    tx.category_manually_set = true;
    tx.merchant_manually_set = true;
    store.update_transaction(&tx).unwrap();

    let outcome = service.apply_to_transaction(USER, tx.id).unwrap();
    assert!(outcome.is_empty());
    assert!(store.group_writes().unwrap().is_empty());
}

#[test]
fn test_first_match_wins_per_field() {
    let (store, service, account) = setup();
    let a = create_rule(&service, "Coffee category", merchant_contains("starbucks"), Some(5), None);
    let b = create_rule(&service, "Coffee merchant", merchant_contains("star"), None, Some("Starbucks"));
    create_rule(&service, "Late", merchant_contains("starbucks"), Some(6), Some("SBUX"));

    let tx = add_tx(&store, &account, "STARBUCKS #402", -450);
    let outcome = service.apply_to_transaction(USER, tx.id).unwrap();
    assert_eq!(outcome.category_id, Some(5));
    assert_eq!(outcome.merchant.as_deref(), Some("Starbucks"));

    // Both contributing rules are credited once
    assert_eq!(service.get_rule(USER, a).unwrap().times_applied, 1);
    assert_eq!(service.get_rule(USER, b).unwrap().times_applied, 1);
    assert!(service.get_rule(USER, a).unwrap().last_applied_at.is_some());
}

#[test]
fn test_account_fields_visible_to_rules() {
    let (store, service, account) = setup();
    create_rule(
        &service,
        "Chase checking",
        json!({"logic": "AND", "conditions": [
            {"field": "bank", "operator": "equals", "value": "CHASE"},
            {"field": "account_name", "operator": "starts_with", "value": "everyday"},
            {"field": "direction", "operator": "equals", "value": 0}
        ]}),
        Some(11),
        None,
    );

    let tx = add_tx(&store, &account, "Anything", -100);
    let outcome = service.apply_to_transaction(USER, tx.id).unwrap();
    assert_eq!(outcome.category_id, Some(11));
}

#[test]
fn test_inactive_rules_are_ignored() {
    let (store, service, account) = setup();
    let rule_id = create_rule(&service, "Shell", merchant_contains("shell"), Some(9), None);
    service.set_active(USER, rule_id, false).unwrap();

    let tx = add_tx(&store, &account, "Shell Oil 5512", -4000);
    assert!(service.apply_to_transaction(USER, tx.id).unwrap().is_empty());
}

// ============================================================================
// Bulk Re-Application
// ============================================================================

#[test]
fn test_bulk_groups_identical_outcomes() {
    let (store, service, account) = setup();
    let rule_id = create_rule(&service, "Costco", merchant_contains("costco"), Some(7), None);

    let matching: Vec<Transaction> = (0..3)
        .map(|i| add_tx(&store, &account, &format!("COSTCO WHSE #{}", i), -5000 - i))
        .collect();
    add_tx(&store, &account, "Trader Joe's", -1200);
    add_tx(&store, &account, "Whole Foods", -3300);

    let result = service.apply_to_existing(USER, None, false).unwrap();
    assert_eq!(result.transactions_evaluated, 5);
    assert_eq!(result.transactions_matched, 3);
    assert_eq!(result.groups_written, 1);
    assert_eq!(result.groups_failed, 0);
    assert_eq!(result.updated_count, 3);

    let writes = store.group_writes().unwrap();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].category_id, Some(7));
    assert_eq!(writes[0].merchant, None);
    assert_eq!(writes[0].transaction_ids.len(), 3);

    for tx in &matching {
        assert_eq!(reload(&store, tx).category_id, Some(7));
    }
    assert_eq!(service.get_rule(USER, rule_id).unwrap().times_applied, 3);
}

#[test]
fn test_bulk_failed_group_does_not_stop_others() {
    let (store, service, account) = setup();
    create_rule(&service, "Uber", merchant_contains("uber"), Some(2), Some("Uber"));
    create_rule(&service, "Lyft", merchant_contains("lyft"), Some(2), Some("Lyft"));
    store.fail_group_updates(Some(2), Some("Uber")).unwrap();

    let uber = add_tx(&store, &account, "UBER *TRIP", -1800);
    let lyft = add_tx(&store, &account, "LYFT RIDE", -2100);

    let result = service.apply_to_existing(USER, None, false).unwrap();
    assert_eq!(result.groups_written, 1);
    assert_eq!(result.groups_failed, 1);
    assert_eq!(result.updated_count, 1);

    assert_eq!(reload(&store, &uber).category_id, None);
    assert_eq!(reload(&store, &lyft).merchant.as_deref(), Some("Lyft"));
}

#[test]
fn test_bulk_respects_manual_flags() {
    let (store, service, account) = setup();
    create_rule(&service, "Netflix", merchant_contains("netflix"), Some(4), Some("Netflix"));

    let mut partly = add_tx(&store, &account, "NETFLIX.COM", -1599);
    partly.category_id = Some(30);
    partly.category_manually_set = true;
    store.update_transaction(&partly).unwrap();

    let mut fully = add_tx(&store, &account, "NETFLIX.COM", -1599);
    fully.category_manually_set = true;
    fully.merchant_manually_set = true;
    store.update_transaction(&fully).unwrap();

    let result = service.apply_to_existing(USER, None, false).unwrap();
    assert_eq!(result.transactions_evaluated, 1);
    assert_eq!(result.updated_count, 1);

    let stored = reload(&store, &partly);
    assert_eq!(stored.category_id, Some(30));
    assert_eq!(stored.merchant.as_deref(), Some("Netflix"));
    assert_eq!(reload(&store, &fully).category_id, None);

    // Explicitly including manual transactions overrides the flags
    let result = service.apply_to_existing(USER, None, true).unwrap();
    assert_eq!(result.transactions_evaluated, 2);
    assert_eq!(reload(&store, &fully).category_id, Some(4));
    assert_eq!(reload(&store, &partly).category_id, Some(4));
}

#[test]
fn test_bulk_limited_to_given_ids() {
    let (store, service, account) = setup();
    create_rule(&service, "Target", merchant_contains("target"), Some(13), None);

    let first = add_tx(&store, &account, "TARGET T-1", -900);
    let second = add_tx(&store, &account, "TARGET T-2", -900);

    let result = service.apply_to_existing(USER, Some(&[first.id]), false).unwrap();
    assert_eq!(result.updated_count, 1);
    assert_eq!(reload(&store, &first).category_id, Some(13));
    assert_eq!(reload(&store, &second).category_id, None);
}

#[test]
fn test_create_with_backfill() {
    let (store, service, account) = setup();
    let tx = add_tx(&store, &account, "SPOTIFY USA", -1099);

    let change = service
        .create_rule(
            USER,
            NewRule {
                rule_name: "Music".into(),
                conditions: merchant_contains("spotify"),
                category_id: Some(21),
                backfill: true,
                ..Default::default()
            },
        )
        .unwrap();

    let backfill = change.backfill.unwrap();
    assert_eq!(backfill.updated_count, 1);
    assert_eq!(change.rule.times_applied, 1);
    assert_eq!(reload(&store, &tx).category_id, Some(21));
}

// ============================================================================
// Amount and direction rules through the ledger
// ============================================================================

fn ledger_setup() -> (Arc<MemoryStore>, LedgerService, RuleService, Account) {
    let (store, rules, account) = setup();
    let ledger = LedgerService::new(store.clone(), rules.clone());
    (store, ledger, rules, account)
}

fn coffee_conditions() -> serde_json::Value {
    json!({"logic": "AND", "conditions": [
        {"field": "merchant", "operator": "contains_any",
         "values": ["starbucks", "dunkin"], "case_sensitive": false},
        {"field": "amount", "operator": "between", "min_value": 2.00, "max_value": 25.00}
    ]})
}

fn record(ledger: &LedgerService, account: &Account, merchant: &str, cents: i64) -> Transaction {
    ledger
        .add_transaction(
            USER,
            NewTransaction {
                account_id: account.id,
                amount: Decimal::new(cents, 2),
                merchant: Some(merchant.to_string()),
                ..Default::default()
            },
        )
        .unwrap()
}

#[test]
fn test_purchase_classified_by_amount_range() {
    let (_, ledger, rules, account) = ledger_setup();
    create_rule(&rules, "Coffee", coffee_conditions(), Some(7), None);

    let debit = record(&ledger, &account, "STARBUCKS #402", -450);
    assert_eq!(debit.amount, Decimal::new(-450, 2));
    assert_eq!(debit.direction, Some(0));
    assert_eq!(debit.category_id, Some(7));

    let big = record(&ledger, &account, "STARBUCKS #402", -4000);
    assert_eq!(big.category_id, None);
}

#[test]
fn test_amount_range_edges_on_debits() {
    let (_, ledger, rules, account) = ledger_setup();
    create_rule(&rules, "Coffee", coffee_conditions(), Some(7), None);

    assert_eq!(record(&ledger, &account, "Dunkin", -200).category_id, Some(7));
    assert_eq!(record(&ledger, &account, "Dunkin", -2500).category_id, Some(7));
    assert_eq!(record(&ledger, &account, "Dunkin", -199).category_id, None);
    assert_eq!(record(&ledger, &account, "Dunkin", -2501).category_id, None);
}

#[test]
fn test_direction_rule_splits_debits_and_credits() {
    let (_, ledger, rules, account) = ledger_setup();
    let refunds = json!({"logic": "AND", "conditions": [
        {"field": "merchant", "operator": "contains", "value": "amazon"},
        {"field": "direction", "operator": "equals", "value": 1}
    ]});
    create_rule(&rules, "Refunds", refunds, Some(30), None);
    create_rule(&rules, "Shopping", merchant_contains("amazon"), Some(31), None);

    let refund = record(&ledger, &account, "Amazon.com", 1999);
    assert_eq!(refund.direction, Some(1));
    assert_eq!(refund.category_id, Some(30));

    let order = record(&ledger, &account, "Amazon.com", -1999);
    assert_eq!(order.category_id, Some(31));
}

#[test]
fn test_amount_edit_reclassifies() {
    let (_, ledger, rules, account) = ledger_setup();
    create_rule(&rules, "Coffee", coffee_conditions(), Some(7), None);

    let tx = record(&ledger, &account, "Starbucks", -3000);
    assert_eq!(tx.category_id, None);

    let update = TransactionUpdate {
        amount: Some(Decimal::new(-1250, 2)),
        ..Default::default()
    };
    let tx = ledger.update_transaction(USER, tx.id, update).unwrap();
    assert_eq!(tx.category_id, Some(7));
}

#[test]
fn test_bulk_amount_and_direction_rules_on_stored_debits() {
    let (store, service, account) = setup();
    let big_spend = json!({"logic": "AND", "conditions": [
        {"field": "amount", "operator": "greater_than", "value": 100},
        {"field": "direction", "operator": "equals", "value": 0}
    ]});
    create_rule(&service, "Big spend", big_spend, None, Some("Large purchase"));

    let big = add_tx(&store, &account, "BEST BUY", -18000);
    let small = add_tx(&store, &account, "BEST BUY", -1500);

    let result = service.apply_to_existing(USER, None, false).unwrap();
    assert_eq!(result.updated_count, 1);
    assert_eq!(reload(&store, &big).merchant.as_deref(), Some("Large purchase"));
    assert_eq!(reload(&store, &small).merchant.as_deref(), Some("BEST BUY"));
}
