pub mod capture;
pub mod detection;
pub mod discovery;
pub mod geo_point;
pub mod journey;
pub mod pause;
pub mod session;
pub mod trial;

pub use capture::{
    BatteryImpact, CaptureConfig, CaptureMode, DetectionFrequency, FrequencyProfile,
    ListeningMode, OperatingMode, SessionType,
};
pub use detection::{
    Detection, DetectionSource, LiveDetection, MediaRef, SpeciesCategory, SpeciesMatch,
};
pub use discovery::{Discovery, DiscoveryType, JourneyWaypoint, DEFAULT_WAYPOINT_ICON};
pub use geo_point::{GeoBounds, GeoPoint};
pub use journey::{
    Journey, JourneyMetadataUpdate, JourneyStats, JourneyStatus, JourneyTotals,
    WeatherCondition, WeatherSnapshot, DEFAULT_JOURNEY_TITLE,
};
pub use pause::PauseSpan;
pub use session::CaptureSession;
pub use trial::{TrialState, DEFAULT_MAX_TRIALS};
