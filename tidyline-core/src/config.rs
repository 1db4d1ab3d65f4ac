//! Configuration management
//!
//! Settings live in settings.json in the tidyline directory:
//! ```json
//! {
//!   "app": { "userId": "local", "demoMode": false },
//!   "rules": { "backfillOnCreate": false, "includeManuallySet": false }
//! }
//! ```
//! Keys this crate does not know about are kept when saving.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// User id used when none is configured
pub const DEFAULT_USER_ID: &str = "local";

/// Raw settings.json structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsFile {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    rules: RuleSettings,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default)]
    demo_mode: bool,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleSettings {
    #[serde(default)]
    backfill_on_create: bool,
    #[serde(default)]
    include_manually_set: bool,
    #[serde(flatten)]
    other: HashMap<String, serde_json::Value>,
}

/// Tidyline configuration (simplified view of settings)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Owner of every rule, account and transaction this install touches
    pub user_id: String,
    /// Use demo.duckdb instead of tidyline.duckdb
    pub demo_mode: bool,
    /// Re-apply rules to existing transactions after a rule is created or edited
    pub backfill_on_create: bool,
    /// Let bulk application touch transactions whose targets were both set by hand
    pub include_manually_set: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_id: DEFAULT_USER_ID.to_string(),
            demo_mode: false,
            backfill_on_create: false,
            include_manually_set: false,
        }
    }
}

fn parse_flag(value: Option<&str>) -> Option<bool> {
    match value? {
        "true" | "1" | "yes" | "TRUE" | "YES" => Some(true),
        "false" | "0" | "no" | "FALSE" | "NO" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load config from the tidyline directory
    ///
    /// Environment overrides:
    /// - `TIDYLINE_USER_ID` replaces `app.userId`
    /// - `TIDYLINE_BACKFILL` replaces `rules.backfillOnCreate`
    pub fn load(tidyline_dir: &Path) -> Result<Self> {
        let mut config = Self::load_file(tidyline_dir)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load settings.json only, without environment overrides
    pub fn load_file(tidyline_dir: &Path) -> Result<Self> {
        let raw = read_settings(tidyline_dir)?;
        Ok(Self {
            user_id: raw
                .app
                .user_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_USER_ID.to_string()),
            demo_mode: raw.app.demo_mode,
            backfill_on_create: raw.rules.backfill_on_create,
            include_manually_set: raw.rules.include_manually_set,
        })
    }

    /// Apply overrides from a variable lookup (the process environment in `load`)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(user_id) = lookup("TIDYLINE_USER_ID").filter(|id| !id.trim().is_empty()) {
            self.user_id = user_id;
        }
        if let Some(backfill) = parse_flag(lookup("TIDYLINE_BACKFILL").as_deref()) {
            self.backfill_on_create = backfill;
        }
    }

    /// Save config to the tidyline directory
    /// Preserves other settings this crate doesn't manage
    pub fn save(&self, tidyline_dir: &Path) -> Result<()> {
        let mut settings = read_settings(tidyline_dir)?;

        settings.app.user_id = Some(self.user_id.clone());
        settings.app.demo_mode = self.demo_mode;
        settings.rules.backfill_on_create = self.backfill_on_create;
        settings.rules.include_manually_set = self.include_manually_set;

        let settings_path = tidyline_dir.join("settings.json");
        let content = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&settings_path, content)
            .with_context(|| format!("Failed to write {}", settings_path.display()))?;
        Ok(())
    }
}

/// A missing or unreadable-as-JSON file yields defaults
fn read_settings(tidyline_dir: &Path) -> Result<SettingsFile> {
    let settings_path = tidyline_dir.join("settings.json");
    if !settings_path.exists() {
        return Ok(SettingsFile::default());
    }
    let content = std::fs::read_to_string(&settings_path)
        .with_context(|| format!("Failed to read {}", settings_path.display()))?;
    Ok(serde_json::from_str(&content).unwrap_or_default())
}
