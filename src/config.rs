use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::Category;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub api_base_url: String,
    pub keyring_service: String,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Categories refreshed on startup, by key (`inbox`, `sent`, `label:<id>`...).
    pub categories: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:smail.db?mode=rwc".to_string(),
            api_base_url: "http://localhost:3000".to_string(),
            keyring_service: "smail-sync".to_string(),
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            categories: vec!["inbox".to_string(), "sent".to_string(), "drafts".to_string()],
        }
    }
}

impl SyncConfig {
    /// Configured categories, skipping keys that don't name one.
    pub fn categories(&self) -> Vec<Category> {
        self.categories
            .iter()
            .filter_map(|key| Category::parse(key).ok())
            .collect()
    }
}

impl Config {
    pub fn load() -> Self {
        Self::load_from("settings.toml")
    }

    /// Reads `path`, falling back to defaults when it is missing or malformed.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if let Ok(content) = std::fs::read_to_string(path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => tracing::warn!(path = %path.display(), "ignoring settings: {e}"),
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let config: Config = toml::from_str(
            r#"
            api_base_url = "https://mail.example.org"

            [sync]
            categories = ["inbox", "starred", "label:l1", "bogus"]
            "#,
        )
        .unwrap();

        assert_eq!(config.api_base_url, "https://mail.example.org");
        assert_eq!(config.database_url, Config::default().database_url);
        assert_eq!(
            config.sync.categories(),
            vec![
                Category::Inbox,
                Category::Starred,
                Category::Label("l1".to_string())
            ]
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load_from("/nonexistent/settings.toml");
        assert_eq!(config, Config::default());
    }
}
