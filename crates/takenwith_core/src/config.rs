use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILENAME: &str = "takenwith.toml";
pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "takenwith/0.1";
pub const DEFAULT_CAT_FILE_LIMIT: i32 = 100;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MIN_EDIT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_BOT_PREFIX: &str = "Category:Taken ";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub bot: BotSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotSection {
    /// Categories holding this many files or more are not populated further.
    /// Zero disables the quota.
    pub cat_file_limit: Option<i32>,
    pub batch_size: Option<usize>,
    /// Stop after examining this many files. Zero means no cap.
    pub max_files: Option<usize>,
    /// Stop after this many warnings. Zero means no cap.
    pub max_warnings: Option<usize>,
    /// Page rewritten with a gallery of warned files at the end of a run.
    pub gallery_page: Option<String>,
    pub min_edit_interval_ms: Option<u64>,
    pub bot_prefix: Option<String>,
}

impl BotConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        env_override("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn cat_file_limit(&self) -> i32 {
        self.bot
            .cat_file_limit
            .unwrap_or(DEFAULT_CAT_FILE_LIMIT)
            .max(0)
    }

    pub fn batch_size(&self) -> usize {
        self.bot.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1)
    }

    pub fn max_files(&self) -> usize {
        self.bot.max_files.unwrap_or(0)
    }

    pub fn max_warnings(&self) -> usize {
        self.bot.max_warnings.unwrap_or(0)
    }

    pub fn gallery_page(&self) -> Option<&str> {
        self.bot
            .gallery_page
            .as_deref()
            .map(str::trim)
            .filter(|page| !page.is_empty())
    }

    pub fn min_edit_interval_ms(&self) -> u64 {
        self.bot
            .min_edit_interval_ms
            .unwrap_or(DEFAULT_MIN_EDIT_INTERVAL_MS)
    }

    pub fn bot_prefix(&self) -> &str {
        self.bot.bot_prefix.as_deref().unwrap_or(DEFAULT_BOT_PREFIX)
    }
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_values() {
        let config = BotConfig::default();
        assert_eq!(config.cat_file_limit(), 100);
        assert_eq!(config.batch_size(), 100);
        assert_eq!(config.max_files(), 0);
        assert_eq!(config.min_edit_interval_ms(), 5_000);
        assert_eq!(config.bot_prefix(), "Category:Taken ");
        assert!(config.gallery_page().is_none());
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/takenwith.toml")).expect("load config");
        assert_eq!(config, BotConfig::default());
    }

    #[test]
    fn load_config_parses_both_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(CONFIG_FILENAME);
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://wiki.example.org/w/api.php"
user_agent = "test-agent/1.0"

[bot]
cat_file_limit = 250
batch_size = 20
max_warnings = 10
gallery_page = "User:Example/Warnings"
min_edit_interval_ms = 0
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://wiki.example.org/w/api.php")
        );
        assert_eq!(config.cat_file_limit(), 250);
        assert_eq!(config.batch_size(), 20);
        assert_eq!(config.max_warnings(), 10);
        assert_eq!(config.gallery_page(), Some("User:Example/Warnings"));
        assert_eq!(config.min_edit_interval_ms(), 0);
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "[bot]\nbatch_size = 0\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.api_url.is_none());
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join(CONFIG_FILENAME);
        fs::write(&config_path, "[bot\nbatch_size = 3").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn blank_gallery_page_is_unset() {
        let mut config = BotConfig::default();
        config.bot.gallery_page = Some("  ".to_string());
        assert!(config.gallery_page().is_none());
    }
}
