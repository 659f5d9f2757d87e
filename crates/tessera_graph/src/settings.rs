// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine configuration, stored as RON.

use crate::evaluation::ExecParams;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSettings {
    /// Format version
    pub version: u32,
    /// Longest run of `Loop` results a single node may return in one pass
    pub max_loop_iterations: u32,
    /// Allow edges whose ends are on the same node
    pub allow_same_node_edges: bool,
    /// Parameters for `evaluate_with_defaults` and `run_entry_points_with_defaults`
    pub default_params: ExecParams,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            max_loop_iterations: 10_000,
            allow_same_node_edges: false,
            default_params: ExecParams::default(),
        }
    }
}

impl GraphSettings {
    /// Serialize to pretty RON
    pub fn to_ron(&self) -> Result<String, SettingsError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    /// Parse from RON
    pub fn from_ron(source: &str) -> Result<Self, SettingsError> {
        Ok(ron::from_str(source)?)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let source = std::fs::read_to_string(path)?;
        let settings = Self::from_ron(&source)?;
        tracing::info!("Loaded graph settings from {:?}", path);
        Ok(settings)
    }

    /// Save to a RON file
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}

/// Settings I/O error
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    /// File system error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RON
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GraphSettings::default();
        assert_eq!(settings.version, SETTINGS_FORMAT_VERSION);
        assert!(settings.max_loop_iterations > 0);
        assert!(!settings.allow_same_node_edges);
    }

    #[test]
    fn test_serialization() {
        let mut settings = GraphSettings::default();
        settings.max_loop_iterations = 64;
        settings.default_params.seed = 7;
        let ron_str = settings.to_ron().unwrap();
        let loaded = GraphSettings::from_ron(&ron_str).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let loaded = GraphSettings::from_ron("(max_loop_iterations: 3)").unwrap();
        assert_eq!(loaded.max_loop_iterations, 3);
        assert_eq!(loaded.default_params, ExecParams::default());
    }
}
