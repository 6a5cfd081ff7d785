use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Detection, DetectionSource, GeoPoint, SpeciesCategory, SpeciesMatch};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    PhotoPlant,
    PhotoWildlife,
    PhotoFungi,
    AudioBird,
    AudioMammal,
    AudioInsect,
    ManualObservation,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryType::PhotoPlant => "PHOTO_PLANT",
            DiscoveryType::PhotoWildlife => "PHOTO_WILDLIFE",
            DiscoveryType::PhotoFungi => "PHOTO_FUNGI",
            DiscoveryType::AudioBird => "AUDIO_BIRD",
            DiscoveryType::AudioMammal => "AUDIO_MAMMAL",
            DiscoveryType::AudioInsect => "AUDIO_INSECT",
            DiscoveryType::ManualObservation => "MANUAL_OBSERVATION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "PHOTO_PLANT" => DiscoveryType::PhotoPlant,
            "PHOTO_WILDLIFE" => DiscoveryType::PhotoWildlife,
            "PHOTO_FUNGI" => DiscoveryType::PhotoFungi,
            "AUDIO_BIRD" => DiscoveryType::AudioBird,
            "AUDIO_MAMMAL" => DiscoveryType::AudioMammal,
            "AUDIO_INSECT" => DiscoveryType::AudioInsect,
            "MANUAL_OBSERVATION" => DiscoveryType::ManualObservation,
            _ => return None,
        })
    }

    pub fn is_photo(&self) -> bool {
        matches!(
            self,
            DiscoveryType::PhotoPlant | DiscoveryType::PhotoWildlife | DiscoveryType::PhotoFungi
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            DiscoveryType::AudioBird | DiscoveryType::AudioMammal | DiscoveryType::AudioInsect
        )
    }

    /// Camera evidence wins when a capture used both inputs.
    pub fn classify(source: DetectionSource, category: SpeciesCategory) -> Self {
        if source.includes_camera() {
            match category {
                SpeciesCategory::Plant => DiscoveryType::PhotoPlant,
                SpeciesCategory::Fungi => DiscoveryType::PhotoFungi,
                _ => DiscoveryType::PhotoWildlife,
            }
        } else {
            match category {
                SpeciesCategory::Bird => DiscoveryType::AudioBird,
                SpeciesCategory::Insect => DiscoveryType::AudioInsect,
                SpeciesCategory::Bat | SpeciesCategory::Animal => DiscoveryType::AudioMammal,
                SpeciesCategory::Plant | SpeciesCategory::Fungi => DiscoveryType::ManualObservation,
            }
        }
    }
}

/// A saved, identified observation. `journey_id` is `None` for standalone
/// identifications and for discoveries detached from a cancelled walk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub id: String,
    pub journey_id: Option<String>,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub media_url: String,
    pub thumbnail_url: Option<String>,
    pub identification_result: Option<SpeciesMatch>,
    pub user_notes: Option<String>,
    pub is_favorite: bool,
    pub is_public: bool,
    pub tags: Vec<String>,
}

impl Discovery {
    pub fn from_detection(detection: &Detection, journey_id: Option<&str>) -> Self {
        Self {
            id: detection.id.clone(),
            journey_id: journey_id.map(str::to_string),
            discovery_type: DiscoveryType::classify(
                detection.source,
                detection.species_match.category,
            ),
            timestamp: detection.timestamp,
            location: detection.location.clone(),
            media_url: detection.media.primary_uri().unwrap_or_default().to_string(),
            thumbnail_url: detection.media.image_uri.clone(),
            identification_result: Some(detection.species_match.clone()),
            user_notes: None,
            is_favorite: false,
            is_public: false,
            tags: Vec::new(),
        }
    }

    pub fn species_name(&self) -> Option<&str> {
        self.identification_result
            .as_ref()
            .map(|m| m.common_name.as_str())
    }
}

/// User-added point of interest along a journey.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JourneyWaypoint {
    pub id: String,
    pub journey_id: String,
    pub location: GeoPoint,
    pub title: String,
    pub description: Option<String>,
    pub icon: String,
    pub timestamp: DateTime<Utc>,
}

pub const DEFAULT_WAYPOINT_ICON: &str = "📍";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_evidence_classifies_as_photo() {
        assert_eq!(
            DiscoveryType::classify(DetectionSource::Both, SpeciesCategory::Bird),
            DiscoveryType::PhotoWildlife
        );
        assert_eq!(
            DiscoveryType::classify(DetectionSource::Camera, SpeciesCategory::Fungi),
            DiscoveryType::PhotoFungi
        );
    }

    #[test]
    fn audio_only_classifies_by_category() {
        assert_eq!(
            DiscoveryType::classify(DetectionSource::Audio, SpeciesCategory::Bird),
            DiscoveryType::AudioBird
        );
        assert_eq!(
            DiscoveryType::classify(DetectionSource::Audio, SpeciesCategory::Bat),
            DiscoveryType::AudioMammal
        );
        assert!(DiscoveryType::AudioInsect.is_audio());
        assert!(!DiscoveryType::AudioInsect.is_photo());
    }

    #[test]
    fn type_string_round_trips_through_storage_form() {
        for t in [
            DiscoveryType::PhotoPlant,
            DiscoveryType::AudioMammal,
            DiscoveryType::ManualObservation,
        ] {
            assert_eq!(DiscoveryType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DiscoveryType::parse("VIDEO"), None);
    }
}
