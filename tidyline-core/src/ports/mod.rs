//! Port definitions (hexagonal architecture)
//!
//! Ports define the interfaces for external dependencies. The core domain
//! depends only on these traits, not on concrete implementations.

mod ledger_store;
mod rule_store;

pub use ledger_store::LedgerStore;
pub use rule_store::RuleStore;
