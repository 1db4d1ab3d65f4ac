//! CLI command implementations

pub mod account;
pub mod logs;
pub mod rule;
pub mod tx;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tidyline_core::{EntryPoint, LogEvent, LoggingService, TidylineContext};
use uuid::Uuid;

/// Get the logging service for CLI operations
///
/// Returns None if logging fails to initialize (shouldn't block operations)
pub fn get_logger() -> Option<Arc<LoggingService>> {
    let tidyline_dir = get_tidyline_dir().ok()?;
    std::fs::create_dir_all(&tidyline_dir).ok()?;
    LoggingService::new(&tidyline_dir, EntryPoint::Cli, env!("CARGO_PKG_VERSION"))
        .ok()
        .map(Arc::new)
}

/// Log an event, ignoring any errors (logging should never break the app)
pub fn log_event(logger: &Option<Arc<LoggingService>>, event: LogEvent) {
    if let Some(l) = logger {
        let _ = l.log(event);
    }
}

/// Get the tidyline directory from environment or default
pub fn get_tidyline_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TIDYLINE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".tidyline"))
        .ok_or_else(|| anyhow!("Could not find home directory; set TIDYLINE_DIR"))
}

/// Open the tidyline context, wired to the CLI logger
pub fn get_context(logger: &Option<Arc<LoggingService>>) -> Result<TidylineContext> {
    let tidyline_dir = get_tidyline_dir()?;

    std::fs::create_dir_all(&tidyline_dir)
        .with_context(|| format!("Failed to create tidyline directory: {:?}", tidyline_dir))?;

    TidylineContext::new(&tidyline_dir, logger.clone())
        .context("Failed to initialize tidyline context")
}

pub fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s.trim()).map_err(|_| anyhow!("Invalid id: {}", s))
}

/// Parse a comma-separated id list; empty input yields an empty list
pub fn parse_ids(ids: &[String]) -> Result<Vec<Uuid>> {
    ids.iter()
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_id)
        .collect()
}
