use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::DB_FILE;
use crate::error::{Result, TallyError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: i64,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_to_file: bool,
}

fn default_batch_size() -> usize {
    500
}

fn default_stale_after_minutes() -> i64 {
    30
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            batch_size: default_batch_size(),
            stale_after_minutes: default_stale_after_minutes(),
            busy_timeout_ms: default_busy_timeout_ms(),
            log_level: default_log_level(),
            log_to_file: false,
        }
    }
}

impl Settings {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path().join(DB_FILE)
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_path().join("inbox")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.data_path().join("processed")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_path().join("logs")
    }

    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_after_minutes)
    }

    pub fn busy_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.busy_timeout_ms)
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("tally")
}

fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Documents")
        .join("tally")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if path.exists() {
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        serde_json::from_str(&content).unwrap_or_default()
    } else {
        Settings::default()
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| TallyError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn shellexpand_path(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = Settings {
            data_dir: "/tmp/test".to_string(),
            batch_size: 50,
            stale_after_minutes: 5,
            ..Default::default()
        };
        let json = serde_json::to_string_pretty(&settings).unwrap();
        std::fs::write(&path, &json).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let loaded: Settings = serde_json::from_str(&content).unwrap();
        assert_eq!(loaded.data_dir, "/tmp/test");
        assert_eq!(loaded.batch_size, 50);
        assert_eq!(loaded.stale_after(), chrono::Duration::minutes(5));
    }

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.batch_size, 500);
        assert_eq!(s.stale_after_minutes, 30);
        assert_eq!(s.busy_timeout(), std::time::Duration::from_millis(5000));
        assert_eq!(s.log_level, "info");
        assert!(!s.log_to_file);
        assert!(s.data_dir.ends_with("tally"));
    }

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "batch_size": 10}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.batch_size, 10);
        assert_eq!(s.stale_after_minutes, 30);
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_derived_paths() {
        let s = Settings {
            data_dir: "/srv/tally".to_string(),
            ..Default::default()
        };
        assert_eq!(s.db_path(), PathBuf::from("/srv/tally/tally.db"));
        assert_eq!(s.inbox_dir(), PathBuf::from("/srv/tally/inbox"));
        assert_eq!(s.processed_dir(), PathBuf::from("/srv/tally/processed"));
        assert_eq!(s.logs_dir(), PathBuf::from("/srv/tally/logs"));
    }

    #[test]
    fn test_shellexpand_tilde() {
        if let Some(home) = dirs::home_dir() {
            let expanded = shellexpand_path("~/data");
            assert_eq!(expanded, format!("{}/data", home.to_string_lossy()));
        }
    }
}
