use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    #[serde(default)]
    pub schema_cache: SchemaCacheConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Root holding `datasources.json` and the per-source `sources/` tree.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchemaCacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: i64,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

fn default_ttl_secs() -> i64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    /// Stop an insert-only refresh after this many new records per resource.
    #[serde(default = "default_max_new_records")]
    pub max_new_records: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            max_new_records: default_max_new_records(),
            page_size: default_page_size(),
        }
    }
}

fn default_max_new_records() -> usize {
    500
}
fn default_page_size() -> usize {
    250
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Per-request timeout for e-commerce platforms.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-request timeout for eBay, Jira, and financial APIs.
    #[serde(default = "default_long_timeout_secs")]
    pub long_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            long_timeout_secs: default_long_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_long_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Config rooted at `root` with every other setting at its default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            cache: CacheConfig { root: root.into() },
            schema_cache: SchemaCacheConfig::default(),
            refresh: RefreshConfig::default(),
            http: HttpConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_cache.ttl_secs <= 0 {
            anyhow::bail!("schema_cache.ttl_secs must be > 0");
        }
        if self.refresh.max_new_records == 0 {
            anyhow::bail!("refresh.max_new_records must be > 0");
        }
        if !(1..=250).contains(&self.refresh.page_size) {
            anyhow::bail!("refresh.page_size must be in [1, 250]");
        }
        if self.http.timeout_secs == 0 || self.http.long_timeout_secs == 0 {
            anyhow::bail!("http timeouts must be > 0");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_optional_sections() {
        let config: Config = toml::from_str("[cache]\nroot = \"/tmp/dh\"\n").unwrap();
        assert_eq!(config.schema_cache.ttl_secs, 300);
        assert_eq!(config.refresh.max_new_records, 500);
        assert_eq!(config.refresh.page_size, 250);
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.long_timeout_secs, 60);
        config.validate().unwrap();
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::with_root("/tmp/dh");
        config.refresh.page_size = 500;
        assert!(config.validate().is_err());

        let mut config = Config::with_root("/tmp/dh");
        config.schema_cache.ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_config(Path::new("/nonexistent/dh.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/dh.toml"));
    }
}
