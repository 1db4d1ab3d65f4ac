//! Tidyline Core - rule-based transaction classification
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core entities (Account, Transaction, Rule) and the rule engine
//! - **ports**: Trait definitions for storage (RuleStore, LedgerStore)
//! - **services**: Business logic orchestration
//! - **adapters**: Concrete implementations (DuckDB, in-memory)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use adapters::duckdb::DuckDbRepository;
use config::Config;
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, OperationResult};
pub use domain::rule::{validate_rule_conditions, ErrorCode, ValidationError, ValidationResult};
pub use domain::{
    Account, NewAccount, NewRule, NewTransaction, Rule, RuleUpdate, Transaction,
    TransactionUpdate,
};
pub use services::{
    BulkApplyResult, EntryPoint, LedgerService, LogEntry, LogEvent, LogFilter, LogStats,
    LoggingService, RuleChange, RuleService,
};

/// Main context for Tidyline operations
///
/// Holds the configuration, the database and the services built on it.
pub struct TidylineContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub rule_service: RuleService,
    pub ledger_service: LedgerService,
}

impl TidylineContext {
    /// Open the database in `tidyline_dir` and wire up the services
    ///
    /// `logger` receives rule events; pass `None` to run without one.
    pub fn new(tidyline_dir: &Path, logger: Option<Arc<LoggingService>>) -> Result<Self> {
        let config = Config::load(tidyline_dir)?;

        let db_filename = if config.demo_mode {
            "demo.duckdb"
        } else {
            "tidyline.duckdb"
        };
        let db_path = tidyline_dir.join(db_filename);
        let repository = Arc::new(DuckDbRepository::new(&db_path)?);
        repository
            .ensure_schema()
            .with_context(|| format!("Failed to migrate {}", db_path.display()))?;

        let mut rule_service = RuleService::new(repository.clone())
            .with_backfill_includes_manual(config.include_manually_set);
        if let Some(logger) = logger {
            rule_service = rule_service.with_logger(logger);
        }
        let ledger_service = LedgerService::new(repository.clone(), rule_service.clone());

        Ok(Self {
            config,
            repository,
            rule_service,
            ledger_service,
        })
    }

    /// User every operation of this context acts for
    pub fn user_id(&self) -> &str {
        &self.config.user_id
    }
}
