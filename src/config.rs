use std::env;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

const CONFIG_SCHEMA_VERSION: u32 = 2;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DASHBOARD_DAYS: usize = 7;
const MAX_DASHBOARD_DAYS: usize = 366;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub schema_version: u32,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Overrides `<home>/sessions.json`; relative paths resolve against home.
    pub sessions_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub auto_start: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardConfig {
    pub days: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schema_version: CONFIG_SCHEMA_VERSION,
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            port: DEFAULT_PORT,
            auto_start: false,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            days: DEFAULT_DASHBOARD_DAYS,
        }
    }
}

impl TrackerConfig {
    pub fn load_or_init() -> Result<Self> {
        Self::load_or_init_at(&config_path())
    }

    pub fn load_or_init_at(cfg_path: &Path) -> Result<Self> {
        if let Some(parent) = cfg_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        if cfg_path.exists() {
            let raw = fs::read_to_string(cfg_path)
                .with_context(|| format!("failed to read {}", cfg_path.display()))?;
            let mut parsed: TrackerConfig = serde_json::from_str(&raw)
                .with_context(|| format!("invalid JSON in {}", cfg_path.display()))?;
            if parsed.normalize_and_migrate() {
                parsed.save_to(cfg_path)?;
            }
            Ok(parsed)
        } else {
            let cfg = TrackerConfig::default();
            cfg.save_to(cfg_path)?;
            Ok(cfg)
        }
    }

    /// Falls back to defaults when the config cannot be loaded, so tracking
    /// never stops on a broken config file.
    pub fn or_default(loaded: Result<Self>) -> Self {
        match loaded {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "using default configuration");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create config directory {}", parent.display())
            })?;
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// History file: CLI override, then config, then `<home>/sessions.json`.
    pub fn sessions_path(&self, cli_override: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_override {
            return path.to_path_buf();
        }
        match self.storage.sessions_file.as_deref() {
            Some(file) => {
                let path = PathBuf::from(file);
                if path.is_absolute() {
                    path
                } else {
                    lockin_home().join(path)
                }
            }
            None => lockin_home().join("sessions.json"),
        }
    }

    /// Port: CLI override, then `LOCKIN_PORT`, then config.
    pub fn effective_port(&self, cli_override: Option<u16>) -> u16 {
        cli_override
            .or_else(|| env_port("LOCKIN_PORT"))
            .unwrap_or(self.server.port)
    }

    fn normalize_and_migrate(&mut self) -> bool {
        let mut changed = false;

        if self.schema_version < CONFIG_SCHEMA_VERSION {
            self.schema_version = CONFIG_SCHEMA_VERSION;
            changed = true;
        }

        if normalize_optional_string(&mut self.storage.sessions_file) {
            changed = true;
        }

        let bind = self.server.bind.trim();
        if bind.is_empty() || (bind.parse::<IpAddr>().is_err() && bind != "localhost") {
            self.server.bind = DEFAULT_BIND.to_string();
            changed = true;
        } else if bind != self.server.bind {
            self.server.bind = bind.to_string();
            changed = true;
        }
        if self.server.port == 0 {
            self.server.port = DEFAULT_PORT;
            changed = true;
        }

        if self.dashboard.days == 0 {
            self.dashboard.days = DEFAULT_DASHBOARD_DAYS;
            changed = true;
        } else if self.dashboard.days > MAX_DASHBOARD_DAYS {
            self.dashboard.days = MAX_DASHBOARD_DAYS;
            changed = true;
        }

        changed
    }
}

pub fn lockin_home() -> PathBuf {
    if let Ok(custom) = env::var("LOCKIN_HOME") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lockin")
}

pub fn config_path() -> PathBuf {
    lockin_home().join("config.json")
}

fn env_port(name: &str) -> Option<u16> {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u16>().ok())
        .filter(|v| *v > 0)
}

fn normalize_optional_string(value: &mut Option<String>) -> bool {
    if let Some(item) = value.as_mut() {
        let trimmed = item.trim().to_string();
        if trimmed.is_empty() {
            *value = None;
            return true;
        }
        if *item != trimmed {
            *item = trimmed;
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_bind_localhost_on_3000() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.server.bind, "127.0.0.1");
        assert_eq!(cfg.server.port, 3000);
        assert!(!cfg.server.auto_start);
        assert_eq!(cfg.dashboard.days, 7);
    }

    #[test]
    fn migration_repairs_invalid_fields() {
        let mut cfg = TrackerConfig {
            schema_version: 1,
            storage: StorageConfig {
                sessions_file: Some("   ".to_string()),
            },
            server: ServerConfig {
                bind: "not an address".to_string(),
                port: 0,
                auto_start: true,
            },
            dashboard: DashboardConfig { days: 0 },
        };

        let changed = cfg.normalize_and_migrate();

        assert!(changed);
        assert_eq!(cfg.schema_version, CONFIG_SCHEMA_VERSION);
        assert_eq!(cfg.storage.sessions_file, None);
        assert_eq!(cfg.server.bind, DEFAULT_BIND);
        assert_eq!(cfg.server.port, DEFAULT_PORT);
        assert!(cfg.server.auto_start);
        assert_eq!(cfg.dashboard.days, DEFAULT_DASHBOARD_DAYS);
    }

    #[test]
    fn normalized_config_is_unchanged() {
        let mut cfg = TrackerConfig::default();
        assert!(!cfg.normalize_and_migrate());
    }

    #[test]
    fn load_or_init_writes_defaults_then_reads_them_back() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("nested").join("config.json");

        let created = TrackerConfig::load_or_init_at(&path).expect("init");
        assert!(path.exists());
        let loaded = TrackerConfig::load_or_init_at(&path).expect("load");
        assert_eq!(created, loaded);
    }

    #[test]
    fn partial_config_fills_defaults_and_is_resaved() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"schema_version":1,"server":{"port":3002}}"#).expect("write");

        let cfg = TrackerConfig::load_or_init_at(&path).expect("load");
        assert_eq!(cfg.server.port, 3002);
        assert_eq!(cfg.server.bind, DEFAULT_BIND);

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains(&format!("\"schema_version\": {CONFIG_SCHEMA_VERSION}")));
    }

    #[test]
    fn invalid_json_is_an_error() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{").expect("write");
        assert!(TrackerConfig::load_or_init_at(&path).is_err());
    }

    #[test]
    fn broken_config_falls_back_to_defaults() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(&path, "{").expect("write");

        let cfg = TrackerConfig::or_default(TrackerConfig::load_or_init_at(&path));
        assert_eq!(cfg, TrackerConfig::default());
        assert_eq!(fs::read_to_string(&path).expect("read"), "{");
    }

    #[test]
    fn loaded_config_is_kept() {
        let tmp = TempDir::new().expect("temp dir");
        let path = tmp.path().join("config.json");
        fs::write(&path, r#"{"server":{"port":3002}}"#).expect("write");

        let cfg = TrackerConfig::or_default(TrackerConfig::load_or_init_at(&path));
        assert_eq!(cfg.server.port, 3002);
    }

    #[test]
    fn cli_sessions_override_wins() {
        let cfg = TrackerConfig {
            storage: StorageConfig {
                sessions_file: Some("/tmp/other.json".to_string()),
            },
            ..TrackerConfig::default()
        };
        assert_eq!(
            cfg.sessions_path(Some(Path::new("/work/.lockin/sessions.json"))),
            PathBuf::from("/work/.lockin/sessions.json")
        );
        assert_eq!(cfg.sessions_path(None), PathBuf::from("/tmp/other.json"));
    }

    #[test]
    fn cli_port_override_wins() {
        let cfg = TrackerConfig::default();
        assert_eq!(cfg.effective_port(Some(3002)), 3002);
    }
}
