use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default location of the TOML config, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "tgharvest.toml";

/// TOML-backed configuration loaded from disk.
/// Secrets (gateway token) stay as env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the MTProto gateway, e.g. `http://127.0.0.1:8080`.
    pub url: String,
    /// Session name on the gateway (one per authorized account).
    pub session: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestConfig {
    /// Directory holding one sub-directory per group.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Longest rate-limit wait that ad-hoc commands sleep through in-process.
    #[serde(default = "default_flood_sleep_threshold_secs")]
    pub flood_sleep_threshold_secs: u64,
    /// Cooldown applied when the platform rate-limits without saying for how long.
    #[serde(default = "default_rate_limit_secs")]
    pub default_rate_limit_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            flood_sleep_threshold_secs: default_flood_sleep_threshold_secs(),
            default_rate_limit_secs: default_rate_limit_secs(),
        }
    }
}

fn default_page_size() -> u32 {
    100
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_flood_sleep_threshold_secs() -> u64 {
    15 * 60
}

fn default_rate_limit_secs() -> u64 {
    3600
}

impl FileConfig {
    pub fn new(url: String, session: String) -> Self {
        Self {
            gateway: GatewayConfig {
                url,
                session,
                page_size: default_page_size(),
                timeout_secs: default_timeout_secs(),
            },
            harvest: HarvestConfig::default(),
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Write a config file, replacing any existing one.
pub fn save_config(path: &Path, config: &FileConfig) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
            [gateway]
            url = "http://127.0.0.1:8080"
            session = "research"
            "#,
        )
        .unwrap();

        assert_eq!(config.gateway.page_size, 100);
        assert_eq!(config.gateway.timeout_secs, 30);
        assert_eq!(config.harvest.data_dir, PathBuf::from("."));
        assert_eq!(config.harvest.flood_sleep_threshold_secs, 900);
        assert_eq!(config.harvest.default_rate_limit_secs, 3600);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: std::result::Result<FileConfig, _> = toml::from_str(
            r#"
            [gateway]
            url = "http://127.0.0.1:8080"
            session = "research"
            api_hash = "leftover"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_PATH);
        let mut config = FileConfig::new("http://gw:8080".into(), "main".into());
        config.harvest.data_dir = PathBuf::from("/srv/harvest");

        save_config(&path, &config).unwrap();
        let loaded = load_config(&path).unwrap();

        assert_eq!(loaded.gateway.url, "http://gw:8080");
        assert_eq!(loaded.gateway.session, "main");
        assert_eq!(loaded.harvest.data_dir, PathBuf::from("/srv/harvest"));
    }
}
