use chrono::{DateTime, Utc};

use crate::{
    geo,
    models::{CaptureSession, Detection, DiscoveryType, GeoPoint, JourneyStats},
};

/// Photo and audio discovery counts for a set of marked detections.
pub fn media_counts<'a>(detections: impl IntoIterator<Item = &'a Detection>) -> (u32, u32) {
    detections
        .into_iter()
        .filter(|d| d.marked)
        .map(|d| DiscoveryType::classify(d.source, d.species_match.category))
        .fold((0, 0), |(photos, audio), kind| {
            (
                photos + u32::from(kind.is_photo()),
                audio + u32::from(kind.is_audio()),
            )
        })
}

/// Full recomputation over a route and its marked detections.
pub fn compute_stats(
    route: &[GeoPoint],
    detections: &[Detection],
    duration_millis: u64,
    pause_duration_millis: u64,
) -> JourneyStats {
    let elevation = geo::elevation_delta(route);
    let range = geo::elevation_range(route);
    let speed = geo::speed_stats(route);
    let (photo_count, audio_count) = media_counts(detections);
    let has_elevation = elevation.samples > 0;

    JourneyStats {
        distance_meters: geo::route_distance(route),
        duration_millis,
        elevation_gain_meters: has_elevation.then_some(elevation.gain),
        elevation_loss_meters: has_elevation.then_some(elevation.loss),
        max_elevation_meters: range.map(|(_, max)| max),
        min_elevation_meters: range.map(|(min, _)| min),
        avg_speed_mps: speed.map(|s| s.avg_mps),
        max_speed_mps: speed.map(|s| s.max_mps),
        discovery_count: detections.iter().filter(|d| d.marked).count() as u32,
        photo_count,
        audio_count,
        pause_duration_millis,
    }
}

pub fn session_stats(session: &CaptureSession, now: DateTime<Utc>) -> JourneyStats {
    compute_stats(
        &session.location_track,
        session.detections(),
        session.elapsed_ms(now),
        session.pause_duration_ms(now),
    )
}
