//! Identification results as they move through a capture session: provisional
//! `LiveDetection`s shown on screen, and confirmed `Detection`s that were marked.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SpeciesCategory {
    Bird,
    Bat,
    Insect,
    Plant,
    Fungi,
    Animal,
}

/// Best-guess match returned by the identification service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesMatch {
    pub common_name: String,
    pub scientific_name: String,
    pub category: SpeciesCategory,
    /// 0.0..=1.0
    pub confidence: f64,
}

impl SpeciesMatch {
    pub fn new(
        common_name: &str,
        scientific_name: &str,
        category: SpeciesCategory,
        confidence: f64,
    ) -> Self {
        Self {
            common_name: common_name.to_string(),
            scientific_name: scientific_name.to_string(),
            category,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Identity used for de-duplication. Scientific names are stable across
    /// locales, common names are not.
    pub fn same_species(&self, other: &SpeciesMatch) -> bool {
        self.scientific_name.eq_ignore_ascii_case(&other.scientific_name)
    }

    pub fn is_confident(&self) -> bool {
        self.confidence >= 0.7
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DetectionSource {
    Camera,
    Audio,
    Both,
}

impl DetectionSource {
    pub fn includes_camera(self) -> bool {
        matches!(self, DetectionSource::Camera | DetectionSource::Both)
    }

    pub fn includes_audio(self) -> bool {
        matches!(self, DetectionSource::Audio | DetectionSource::Both)
    }
}

/// URIs of the captured media backing a detection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_uri: Option<String>,
}

impl MediaRef {
    pub fn image(uri: &str) -> Self {
        Self {
            image_uri: Some(uri.to_string()),
            ..Self::default()
        }
    }

    pub fn audio(uri: &str) -> Self {
        Self {
            audio_uri: Some(uri.to_string()),
            ..Self::default()
        }
    }

    /// The URI a discovery should point at: image first, then audio, then video.
    pub fn primary_uri(&self) -> Option<&str> {
        self.image_uri
            .as_deref()
            .or(self.audio_uri.as_deref())
            .or(self.video_uri.as_deref())
    }
}

/// A confirmed observation. `marked` only ever flips false -> true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub species_match: SpeciesMatch,
    pub confidence: f64,
    pub marked: bool,
    pub media: MediaRef,
    pub location: Option<GeoPoint>,
    pub duration_ms: Option<u64>,
    pub source: DetectionSource,
}

/// Provisional result shown while a session runs. Failed identifications are
/// surfaced here too, with `error` set, so the user can dismiss them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveDetection {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub species_name: String,
    pub scientific_name: String,
    pub confidence: f64,
    pub category: Option<SpeciesCategory>,
    pub dismissed: bool,
    pub marked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LiveDetection {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    pub fn is_pending(&self) -> bool {
        !self.dismissed && !self.marked && !self.is_failure()
    }
}
