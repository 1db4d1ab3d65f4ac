//! Core domain entities
//!
//! All business entities are defined here, together with the rule engine.
//! These are pure data structures and functions - no I/O or external
//! dependencies.

mod account;
mod transaction;
pub mod result;
pub mod rule;

pub use account::{Account, AccountContext, NewAccount};
pub use transaction::{direction, NewTransaction, Transaction, TransactionUpdate};
pub use rule::{NewRule, Rule, RuleConditions, RuleSource, RuleUpdate};
