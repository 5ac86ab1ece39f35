//! TOML configuration for the content server.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Content storage.
    pub storage: StorageSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Root directory served to clients.
    pub base_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        let base_path = dirs::home_dir()
            .map(|h| h.join(".git-lob-serve"))
            .unwrap_or_else(|| PathBuf::from(".git-lob-serve"));
        Self { base_path }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                Ok(toml::from_str(&content)?)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: CliConfig = toml::from_str(
            r#"
[storage]
base_path = "/srv/git-lob"

[log]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(config.storage.base_path, PathBuf::from("/srv/git-lob"));
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: CliConfig = toml::from_str("").unwrap();
        assert_eq!(config.log.level, "info");
        assert!(config
            .storage
            .base_path
            .to_string_lossy()
            .contains(".git-lob-serve"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serve.toml");
        std::fs::write(
            &path,
            r#"
[storage]
base_path = "/tmp/test-lob-serve"
"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(
            config.storage.base_path,
            PathBuf::from("/tmp/test-lob-serve")
        );
    }
}
