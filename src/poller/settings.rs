//! Persisted poller identity
//!
//! The monitoring system id handed out at registration must survive
//! restarts, otherwise the poller would register itself again on every start.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub trait PollerSettings: Send + Sync {
    fn monitoring_system_id(&self) -> Result<Option<String>>;

    fn set_monitoring_system_id(&self, monitoring_system_id: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    monitoring_system_id: Option<String>,
}

/// Settings stored as a small JSON file
#[derive(Debug, Clone)]
pub struct FilePollerSettings {
    path: PathBuf,
}

impl FilePollerSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/outpost/poller-settings.json`, if the platform has a config dir
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("outpost").join("poller-settings.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<SettingsFile> {
        if !self.path.exists() {
            return Ok(SettingsFile::default());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings file {}", self.path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings file {}", self.path.display()))
    }
}

impl PollerSettings for FilePollerSettings {
    fn monitoring_system_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.monitoring_system_id)
    }

    fn set_monitoring_system_id(&self, monitoring_system_id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(&SettingsFile {
            monitoring_system_id: Some(monitoring_system_id.to_string()),
        })?;

        std::fs::write(&self.path, content)
            .with_context(|| format!("failed to write settings file {}", self.path.display()))?;

        debug!("persisted monitoring system id to {}", self.path.display());
        Ok(())
    }
}

/// In-process settings, explicitly constructed per coordinator
#[derive(Debug, Default)]
pub struct MemoryPollerSettings {
    monitoring_system_id: Mutex<Option<String>>,
}

impl MemoryPollerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitoring_system_id(monitoring_system_id: impl Into<String>) -> Self {
        Self {
            monitoring_system_id: Mutex::new(Some(monitoring_system_id.into())),
        }
    }
}

impl PollerSettings for MemoryPollerSettings {
    fn monitoring_system_id(&self) -> Result<Option<String>> {
        let id = self
            .monitoring_system_id
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        Ok(id.clone())
    }

    fn set_monitoring_system_id(&self, monitoring_system_id: &str) -> Result<()> {
        let mut id = self
            .monitoring_system_id
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        *id = Some(monitoring_system_id.to_string());
        Ok(())
    }
}
