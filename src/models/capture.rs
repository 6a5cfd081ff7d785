use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Which inputs a session captures from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CaptureMode {
    Camera,
    Listen,
    Both,
}

impl CaptureMode {
    pub fn uses_audio(self) -> bool {
        matches!(self, CaptureMode::Listen | CaptureMode::Both)
    }

    pub fn uses_camera(self) -> bool {
        matches!(self, CaptureMode::Camera | CaptureMode::Both)
    }
}

/// Whether captures are user-triggered or driven by the scheduler.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OperatingMode {
    Automatic,
    Manual,
}

/// Track persists marked detections; passive only shows them live.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ListeningMode {
    Track,
    Passive,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionType {
    Walk,
    SingleCapture,
    Passive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    pub mode: CaptureMode,
    pub operating_mode: OperatingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listening_mode: Option<ListeningMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Camera,
            operating_mode: OperatingMode::Manual,
            listening_mode: None,
            max_duration_seconds: Some(300),
            auto_save: Some(false),
        }
    }
}

impl CaptureConfig {
    /// A listening mode only matters for automatic sessions that record audio.
    pub fn listening_mode_applies(&self) -> bool {
        self.mode.uses_audio() && self.operating_mode == OperatingMode::Automatic
    }

    /// The listening mode that actually governs trial consumption. `None` when
    /// the configured value is irrelevant for this mode combination.
    pub fn effective_listening_mode(&self) -> Option<ListeningMode> {
        if self.listening_mode_applies() {
            self.listening_mode
        } else {
            None
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.listening_mode_applies() && self.listening_mode.is_none() {
            return Err(EngineError::InvalidConfig(
                "automatic audio capture requires a listening mode".into(),
            ));
        }
        if self.max_duration_seconds == Some(0) {
            return Err(EngineError::InvalidConfig(
                "max duration must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn auto_save_enabled(&self) -> bool {
        self.auto_save.unwrap_or(false)
    }

    pub fn session_type(&self) -> SessionType {
        match (self.operating_mode, self.effective_listening_mode()) {
            (OperatingMode::Manual, _) => SessionType::SingleCapture,
            (OperatingMode::Automatic, Some(ListeningMode::Passive)) => SessionType::Passive,
            (OperatingMode::Automatic, _) => SessionType::Walk,
        }
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_seconds.map(Duration::from_secs)
    }
}

/// Scheduler sampling profile chosen when an automatic session starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionFrequency {
    High,
    #[default]
    Balanced,
    BatterySaver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum BatteryImpact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyProfile {
    pub interval_ms: u64,
    pub chunk_duration_ms: u64,
    pub battery_impact: BatteryImpact,
}

impl FrequencyProfile {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_duration_ms)
    }
}

impl DetectionFrequency {
    pub fn profile(self) -> FrequencyProfile {
        match self {
            DetectionFrequency::High => FrequencyProfile {
                interval_ms: 5_000,
                chunk_duration_ms: 10_000,
                battery_impact: BatteryImpact::High,
            },
            DetectionFrequency::Balanced => FrequencyProfile {
                interval_ms: 10_000,
                chunk_duration_ms: 10_000,
                battery_impact: BatteryImpact::Medium,
            },
            DetectionFrequency::BatterySaver => FrequencyProfile {
                interval_ms: 15_000,
                chunk_duration_ms: 8_000,
                battery_impact: BatteryImpact::Low,
            },
        }
    }
}
