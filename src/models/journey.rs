use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::GeoPoint;

pub const DEFAULT_JOURNEY_TITLE: &str = "Nature Walk";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JourneyStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl JourneyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Active => "Active",
            JourneyStatus::Paused => "Paused",
            JourneyStatus::Completed => "Completed",
            JourneyStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JourneyStatus::Completed | JourneyStatus::Cancelled)
    }
}

/// Derived statistics. Always recomputable from route + discoveries.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JourneyStats {
    pub distance_meters: f64,
    pub duration_millis: u64,
    pub elevation_gain_meters: Option<f64>,
    pub elevation_loss_meters: Option<f64>,
    pub max_elevation_meters: Option<f64>,
    pub min_elevation_meters: Option<f64>,
    pub avg_speed_mps: Option<f64>,
    pub max_speed_mps: Option<f64>,
    pub discovery_count: u32,
    pub photo_count: u32,
    pub audio_count: u32,
    pub pause_duration_millis: u64,
}

impl JourneyStats {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }

    pub fn distance_miles(&self) -> f64 {
        self.distance_meters / 1609.34
    }

    /// Walking time with pauses taken out.
    pub fn active_duration_millis(&self) -> u64 {
        self.duration_millis.saturating_sub(self.pause_duration_millis)
    }

    pub fn avg_speed_kmh(&self) -> Option<f64> {
        self.avg_speed_mps.map(|mps| mps * 3.6)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum WeatherCondition {
    Clear,
    PartlyCloudy,
    Cloudy,
    Rain,
    HeavyRain,
    Snow,
    Fog,
    Wind,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeatherSnapshot {
    /// Celsius
    pub temperature: f64,
    pub condition: WeatherCondition,
    pub humidity: Option<u8>,
    pub wind_speed: Option<f64>,
    pub pressure: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Persisted record of one walk. Immutable once terminal, apart from the
/// metadata fields (title, notes, tags, visibility).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Journey {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: JourneyStatus,
    pub route: Vec<GeoPoint>,
    pub stats: JourneyStats,
    /// Discovery ids, in the order they were marked.
    pub discoveries: Vec<String>,
    pub weather: Option<WeatherSnapshot>,
    pub photos: Vec<String>,
    pub is_public: bool,
    pub share_url: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
}

impl Journey {
    pub fn discovery_count(&self) -> usize {
        self.discoveries.len()
    }

    pub fn photo_count(&self) -> usize {
        self.photos.len()
    }
}

/// Metadata-only edit applied to a stored journey.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyMetadataUpdate {
    pub title: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_public: Option<bool>,
}

/// Lifetime totals over a user's completed journeys.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JourneyTotals {
    pub journey_count: u64,
    pub total_distance_meters: f64,
    pub total_duration_millis: u64,
    pub total_discoveries: u64,
}
