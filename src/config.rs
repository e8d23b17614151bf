//! Configuration for the taskboard server.
//!
//! Settings come from `taskboard.toml` and are layered
//! (file → environment → CLI, via clap's `env` support):
//!
//! ```toml
//! [server]
//! bind_addr = "127.0.0.1:3141"
//! dev_mode = false
//!
//! [database]
//! path = ".taskboard/taskboard.db"
//!
//! [reorder]
//! strategy = "fractional"   # or "shift"
//!
//! [logging]
//! level = "info"
//! json = false
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::board::reorder::ReorderStrategy;

/// File name looked up in the working directory when no `--config` is given.
pub const CONFIG_FILE_NAME: &str = "taskboard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    /// Permissive CORS for a separately served front-end.
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3141".to_string(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".taskboard/taskboard.db"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderSection {
    pub strategy: ReorderStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskboardConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub reorder: ReorderSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Values given on the command line or through the environment.
/// `None` leaves the file/default value in place.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_addr: Option<String>,
    pub db_path: Option<PathBuf>,
    pub dev_mode: Option<bool>,
    pub strategy: Option<ReorderStrategy>,
    pub log_level: Option<String>,
    pub log_json: Option<bool>,
}

impl TaskboardConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse taskboard.toml")
    }

    /// Load an explicitly named file (which must exist), or fall back to
    /// `taskboard.toml` in `dir` and then to the user config directory.
    /// Missing implicit files yield the defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        let local = dir.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Self::load(&local);
        }
        match dirs::config_dir().map(|d| d.join("taskboard").join("config.toml")) {
            Some(user) if user.exists() => Self::load(&user),
            _ => Ok(Self::default()),
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize taskboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply CLI/environment values on top of the file values.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(addr) = &overrides.bind_addr {
            self.server.bind_addr = addr.clone();
        }
        if let Some(path) = &overrides.db_path {
            self.database.path = path.clone();
        }
        if let Some(dev) = overrides.dev_mode {
            self.server.dev_mode = dev;
        }
        if let Some(strategy) = overrides.strategy {
            self.reorder.strategy = strategy;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = json;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TaskboardConfig::default();
        assert_eq!(config.server.bind_addr, "127.0.0.1:3141");
        assert!(!config.server.dev_mode);
        assert_eq!(config.database.path, PathBuf::from(".taskboard/taskboard.db"));
        assert_eq!(config.reorder.strategy, ReorderStrategy::Fractional);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_parse_full_file() {
        let config = TaskboardConfig::parse(
            r#"
[server]
bind_addr = "0.0.0.0:8080"
dev_mode = true

[database]
path = "/var/lib/taskboard/board.db"

[reorder]
strategy = "shift"

[logging]
level = "debug"
json = true
"#,
        )
        .unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert!(config.server.dev_mode);
        assert_eq!(config.database.path, PathBuf::from("/var/lib/taskboard/board.db"));
        assert_eq!(config.reorder.strategy, ReorderStrategy::Shift);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = TaskboardConfig::parse("[reorder]\nstrategy = \"shift\"\n").unwrap();
        assert_eq!(config.reorder.strategy, ReorderStrategy::Shift);
        assert_eq!(config.server, ServerSection::default());
        assert_eq!(config.logging, LoggingSection::default());
    }

    #[test]
    fn test_parse_rejects_unknown_strategy() {
        assert!(TaskboardConfig::parse("[reorder]\nstrategy = \"random\"\n").is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let config = TaskboardConfig::parse("[server]\nbind_addr = \"0.0.0.0:1\"\n")
            .unwrap()
            .with_overrides(&ConfigOverrides {
                bind_addr: Some("127.0.0.1:9999".to_string()),
                strategy: Some(ReorderStrategy::Shift),
                log_json: Some(true),
                ..Default::default()
            });
        assert_eq!(config.server.bind_addr, "127.0.0.1:9999");
        assert_eq!(config.reorder.strategy, ReorderStrategy::Shift);
        assert!(config.logging.json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_discover_prefers_local_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[logging]\nlevel = \"warn\"\n",
        )
        .unwrap();
        let config = TaskboardConfig::discover(None, dir.path()).unwrap();
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_discover_explicit_missing_file_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(TaskboardConfig::discover(Some(&missing), dir.path()).is_err());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut config = TaskboardConfig::default();
        config.server.dev_mode = true;
        config.reorder.strategy = ReorderStrategy::Shift;
        config.save(&path).unwrap();
        assert_eq!(TaskboardConfig::load(&path).unwrap(), config);
    }
}
