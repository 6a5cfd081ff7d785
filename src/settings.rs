use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    models::{DetectionFrequency, TrialState},
    trial::TrialStore,
};

/// User-tunable behaviour of automatic capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSettings {
    pub frequency: DetectionFrequency,
    pub auto_save: bool,
    pub background_detection: bool,
    pub gps_tracking: bool,
    /// Auto-save threshold, 0.0..=1.0
    pub minimum_confidence: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            frequency: DetectionFrequency::Balanced,
            auto_save: false,
            background_detection: true,
            gps_tracking: true,
            minimum_confidence: 0.65,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSettings {
    #[serde(default)]
    trial: TrialState,
    #[serde(default)]
    detection: DetectionSettings,
}

/// JSON-file backed settings, cached in memory and written through on change.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                warn!("Ignoring unreadable settings at {}: {err}", path.display());
                UserSettings::default()
            })
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn detection(&self) -> Result<DetectionSettings> {
        Ok(self.read()?.detection.clone())
    }

    pub fn update_detection(&self, settings: DetectionSettings) -> Result<()> {
        if !(0.0..=1.0).contains(&settings.minimum_confidence) {
            return Err(anyhow!(
                "minimum confidence {} outside 0..=1",
                settings.minimum_confidence
            ));
        }
        let mut guard = self.write()?;
        let mut next = guard.clone();
        next.detection = settings;
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        *self.write()? = data;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, UserSettings>> {
        self.data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, UserSettings>> {
        self.data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

impl TrialStore for SettingsStore {
    fn read(&self) -> Result<TrialState> {
        Ok(SettingsStore::read(self)?.trial)
    }

    fn write(&self, remaining: u32, first_use: Option<DateTime<Utc>>) -> Result<()> {
        let mut guard = SettingsStore::write(self)?;
        let mut next = guard.clone();
        next.trial.remaining_credits = remaining;
        next.trial.first_use_timestamp = first_use;
        // Only swap the cache once the file write succeeded.
        self.persist(&next)?;
        *guard = next;
        Ok(())
    }
}
