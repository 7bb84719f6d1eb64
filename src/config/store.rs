//! JSON persistence for monitor settings and reading history
use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::device::Thresholds;
use crate::serial::{SensorRecord, DEFAULT_BAUD_RATE};
use super::Result;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const DEFAULT_HISTORY_FILE: &str = "history.json";
pub const DEFAULT_PORT: &str = "COM10";

/// Readings kept on disk
pub const MAX_HISTORY: usize = 100;
/// History is flushed after this many new readings
pub const SAVE_EVERY: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub port: String,
    #[serde(rename = "baudrate")]
    pub baud_rate: u32,
    #[serde(flatten)]
    pub thresholds: Thresholds,
    pub auto_connect: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            thresholds: Thresholds::default(),
            auto_connect: false,
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Monitor settings backed by a JSON file
pub struct ConfigStore {
    path: PathBuf,
    config: MonitorConfig,
}

impl ConfigStore {
    /// Load settings from `path`. A missing or unreadable file yields the
    /// defaults; keys absent from the file keep their default values, and
    /// inverted threshold ranges are replaced by the default thresholds.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut config = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed config {}: {}", path.display(), e);
                MonitorConfig::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MonitorConfig::default(),
            Err(e) => {
                log::warn!("Could not read config {}: {}", path.display(), e);
                MonitorConfig::default()
            }
        };
        if let Err(e) = config.thresholds.validate() {
            log::warn!("Ignoring thresholds in {}: {}", path.display(), e);
            config.thresholds = Thresholds::default();
        }
        Self { path, config }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn update<F>(&mut self, f: F)
    where
        F: FnOnce(&mut MonitorConfig),
    {
        f(&mut self.config);
    }

    /// Store new thresholds after validating them
    pub fn set_thresholds(&mut self, thresholds: Thresholds) -> Result<()> {
        thresholds.validate()?;
        self.config.thresholds = thresholds;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        write_json(&self.path, &self.config)?;
        log::debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}

/// Bounded, append-only list of past readings backed by a JSON file
pub struct HistoryStore {
    path: PathBuf,
    records: Vec<SensorRecord>,
    unsaved: usize,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed history {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self { path, records, unsaved: 0 }
    }

    /// Append a reading; every [`SAVE_EVERY`]th append flushes to disk
    pub fn push(&mut self, record: SensorRecord) -> Result<()> {
        self.records.push(record);
        self.unsaved += 1;
        if self.unsaved >= SAVE_EVERY {
            self.save()?;
        }
        Ok(())
    }

    /// Up to `limit` most recent readings, oldest first
    pub fn recent(&self, limit: usize) -> &[SensorRecord] {
        let start = self.records.len().saturating_sub(limit);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) -> Result<()> {
        self.records.clear();
        self.save()
    }

    /// Trim to the newest [`MAX_HISTORY`] readings and write them out
    pub fn save(&mut self) -> Result<()> {
        if self.records.len() > MAX_HISTORY {
            let excess = self.records.len() - MAX_HISTORY;
            self.records.drain(..excess);
        }
        write_json(&self.path, &self.records)?;
        self.unsaved = 0;
        Ok(())
    }
}
