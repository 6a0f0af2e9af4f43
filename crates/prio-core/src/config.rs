use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ErrorCode;
use crate::model::ListName;
use crate::rest::RestRoutes;

/// Message shown when a persistence request fails and is rolled back.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Unable to update label prioritization at this time";

/// How the controller treats a command whose lane already has a request
/// pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Apply optimistically, hold the request until the lane is free.
    #[default]
    Queue,
    /// Refuse the command; the model is left untouched.
    Reject,
    /// Send immediately; responses may race.
    Concurrent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Lists whose order is persisted with `persist_order`.
    #[serde(default = "default_tracked_lists")]
    pub tracked_lists: Vec<ListName>,
    #[serde(default)]
    pub overlap: OverlapPolicy,
    #[serde(default = "default_failure_message")]
    pub failure_message: String,
    /// Panic on programming errors instead of logging and ignoring them.
    #[serde(default)]
    pub strict_assertions: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tracked_lists: default_tracked_lists(),
            overlap: OverlapPolicy::default(),
            failure_message: default_failure_message(),
            strict_assertions: false,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn is_tracked(&self, list: &ListName) -> bool {
        self.tracked_lists.contains(list)
    }
}

/// Everything a sync config file may hold.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub routes: RestRoutes,
}

fn default_tracked_lists() -> Vec<ListName> {
    vec![ListName::from("prioritized")]
}

fn default_failure_message() -> String {
    DEFAULT_FAILURE_MESSAGE.to_string()
}

/// Load a config file, falling back to defaults when it does not exist.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    parse_config(&content).with_context(|| {
        format!(
            "{}: failed to parse {}",
            ErrorCode::ConfigParseError,
            path.display()
        )
    })
}

/// Parse config text.
///
/// # Errors
///
/// Returns the TOML error for malformed input.
pub fn parse_config(content: &str) -> Result<ConfigFile> {
    Ok(toml::from_str::<ConfigFile>(content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_config(&dir.path().join("prio.toml")).expect("defaults");
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.sync.overlap, OverlapPolicy::Queue);
        assert_eq!(config.sync.failure_message, DEFAULT_FAILURE_MESSAGE);
        assert!(config.sync.is_tracked(&ListName::from("prioritized")));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config = parse_config(
            r#"
            [sync]
            overlap = "reject"
            tracked_lists = ["starred", "pinned"]
            "#,
        )
        .expect("parse");
        assert_eq!(config.sync.overlap, OverlapPolicy::Reject);
        assert_eq!(config.sync.tracked_lists.len(), 2);
        assert_eq!(config.sync.failure_message, DEFAULT_FAILURE_MESSAGE);
        assert!(!config.sync.strict_assertions);
        assert_eq!(config.routes, RestRoutes::default());
    }

    #[test]
    fn malformed_file_reports_code_and_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[sync]\noverlap = 7").expect("write");
        let err = load_config(file.path()).expect_err("bad type");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("E1002"), "{rendered}");
        assert!(rendered.contains(&file.path().display().to_string()));
    }
}
