use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATASET: &str = "iam_roles";
pub const DEFAULT_TABLE: &str = "roles";

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Destination dataset (one database file in the warehouse directory).
    pub dataset: String,
    /// Destination table inside the dataset.
    pub table: String,
    pub warehouse_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    /// Harvest custom roles owned by this resource instead of the
    /// predefined catalog, e.g. `organizations/123`.
    pub parent: Option<String>,
    pub page_size: u32,
    pub show_deleted: bool,
    pub concurrency: usize,
    pub batch_size: usize,
    pub request_timeout_secs: u64,
    pub pass_deadline_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset: DEFAULT_DATASET.into(),
            table: DEFAULT_TABLE.into(),
            warehouse_dir: None,
            api_base_url: None,
            parent: None,
            page_size: 1000,
            show_deleted: false,
            concurrency: 1,
            batch_size: role_harvest::DEFAULT_BATCH_SIZE,
            request_timeout_secs: 30,
            pass_deadline_secs: None,
        }
    }
}

impl AppConfig {
    /// Apply `DATASET_NAME` / `TABLE_NAME` overrides. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dataset) = lookup("DATASET_NAME").filter(|v| !v.is_empty()) {
            self.dataset = dataset;
        }
        if let Some(table) = lookup("TABLE_NAME").filter(|v| !v.is_empty()) {
            self.table = table;
        }
    }

    /// Directory holding one database file per dataset.
    pub fn warehouse_dir(&self) -> Result<PathBuf> {
        match &self.warehouse_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::data_dir().context("could not determine data directory")?;
                Ok(base.join("role-harvest"))
            }
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pass_deadline(&self) -> Option<Duration> {
        self.pass_deadline_secs.map(Duration::from_secs)
    }
}

/// Config file path: `~/.config/role-harvest/config.toml`
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("role-harvest").join("config.toml"))
}

/// Load config from file, falling back to defaults if missing or invalid,
/// then apply environment overrides.
pub fn load_config() -> AppConfig {
    let mut config = read_config_file().unwrap_or_default();
    config.apply_env(|key| std::env::var(key).ok());
    config
}

fn read_config_file() -> Option<AppConfig> {
    let path = config_path()?;
    let contents = std::fs::read_to_string(&path).ok()?;

    match toml::from_str::<AppConfig>(&contents) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config, using defaults"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn defaults_match_documented_destination() {
        let config = AppConfig::default();
        assert_eq!(config.dataset, "iam_roles");
        assert_eq!(config.table, "roles");
        assert!(!config.show_deleted);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.pass_deadline(), None);
    }

    #[test]
    fn empty_toml_uses_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn parse_full_config_from_toml() {
        let toml_str = r#"
dataset = "audit"
table = "gcp_roles"
warehouse_dir = "/var/lib/role-harvest"
api_base_url = "http://localhost:8080"
parent = "organizations/123"
page_size = 200
show_deleted = true
concurrency = 8
batch_size = 100
request_timeout_secs = 5
pass_deadline_secs = 600
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.dataset, "audit");
        assert_eq!(config.table, "gcp_roles");
        assert_eq!(
            config.warehouse_dir.as_deref(),
            Some(std::path::Path::new("/var/lib/role-harvest"))
        );
        assert_eq!(config.parent.as_deref(), Some("organizations/123"));
        assert_eq!(config.page_size, 200);
        assert!(config.show_deleted);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.pass_deadline(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: AppConfig = toml::from_str(r#"table = "custom""#).unwrap();
        assert_eq!(config.table, "custom");
        assert_eq!(config.dataset, "iam_roles");
        assert_eq!(config.page_size, 1000);
    }

    #[test]
    fn env_overrides_destination() {
        let env = HashMap::from([
            ("DATASET_NAME", "from_env"),
            ("TABLE_NAME", "env_table"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| (*v).to_owned()));

        assert_eq!(config.dataset, "from_env");
        assert_eq!(config.table, "env_table");
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(|_| Some(String::new()));
        assert_eq!(config.dataset, "iam_roles");
        assert_eq!(config.table, "roles");
    }

    #[test]
    fn explicit_warehouse_dir_wins() {
        let config = AppConfig {
            warehouse_dir: Some(PathBuf::from("/tmp/wh")),
            ..Default::default()
        };
        assert_eq!(config.warehouse_dir().unwrap(), PathBuf::from("/tmp/wh"));
    }
}
