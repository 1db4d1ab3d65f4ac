//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod ledger;
pub mod logging;
pub mod migration;
mod rule;

pub use ledger::LedgerService;
pub use logging::{EntryPoint, EventCount, LogEntry, LogEvent, LogFilter, LogStats, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use rule::{BulkApplyResult, RuleChange, RuleService};
