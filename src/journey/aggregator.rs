use chrono::{DateTime, Utc};

use crate::{
    geo::{self, ElevationDelta},
    models::{CaptureSession, Detection, DiscoveryType, GeoPoint, Journey, JourneyStats},
};

/// Running stats kept next to a live session so the UI can show distance and
/// counts without walking the whole route on every sample.
#[derive(Debug, Clone, Default)]
pub struct JourneyAggregator {
    distance_meters: f64,
    first_timestamp: Option<DateTime<Utc>>,
    last_point: Option<GeoPoint>,
    last_altitude: Option<f64>,
    elevation: ElevationDelta,
    elevation_range: Option<(f64, f64)>,
    max_speed_mps: f64,
    discovery_count: u32,
    photo_count: u32,
    audio_count: u32,
}

impl JourneyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_point(&mut self, point: &GeoPoint) {
        if let Some(previous) = &self.last_point {
            let segment = geo::distance_meters(previous, point);
            self.distance_meters += segment;
            let dt = geo::seconds_between(previous, point);
            if dt > 0.0 {
                self.max_speed_mps = self.max_speed_mps.max(segment / dt);
            }
        } else {
            self.first_timestamp = Some(point.timestamp);
        }

        if let Some(altitude) = point.altitude {
            if let Some(previous) = self.last_altitude {
                self.elevation.accumulate(altitude - previous);
            }
            self.last_altitude = Some(altitude);
            self.elevation_range = Some(match self.elevation_range {
                None => (altitude, altitude),
                Some((min, max)) => (min.min(altitude), max.max(altitude)),
            });
        }

        self.last_point = Some(point.clone());
    }

    pub fn on_discovery(&mut self, detection: &Detection) {
        let kind = DiscoveryType::classify(detection.source, detection.species_match.category);
        self.discovery_count += 1;
        self.photo_count += u32::from(kind.is_photo());
        self.audio_count += u32::from(kind.is_audio());
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_meters
    }

    pub fn snapshot(&self, duration_millis: u64, pause_duration_millis: u64) -> JourneyStats {
        let elapsed_secs = match (self.first_timestamp, &self.last_point) {
            (Some(first), Some(last)) => (last.timestamp - first).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        let has_speed = elapsed_secs > 0.0;
        let has_elevation = self.elevation.samples > 0;

        JourneyStats {
            distance_meters: self.distance_meters,
            duration_millis,
            elevation_gain_meters: has_elevation.then_some(self.elevation.gain),
            elevation_loss_meters: has_elevation.then_some(self.elevation.loss),
            max_elevation_meters: self.elevation_range.map(|(_, max)| max),
            min_elevation_meters: self.elevation_range.map(|(min, _)| min),
            avg_speed_mps: has_speed.then(|| self.distance_meters / elapsed_secs),
            max_speed_mps: has_speed.then_some(self.max_speed_mps),
            discovery_count: self.discovery_count,
            photo_count: self.photo_count,
            audio_count: self.audio_count,
            pause_duration_millis,
        }
    }

    pub fn session_snapshot(&self, session: &CaptureSession, now: DateTime<Utc>) -> JourneyStats {
        self.snapshot(session.elapsed_ms(now), session.pause_duration_ms(now))
    }
}

/// Builds the persisted record for a session. Only marked detections become
/// discoveries; photos come from marked detections that used the camera.
pub fn to_journey(session: &CaptureSession, stats: JourneyStats, title: &str) -> Journey {
    let marked: Vec<&Detection> = session.detections().iter().filter(|d| d.marked).collect();

    Journey {
        id: session.id.clone(),
        user_id: session.user_id.clone(),
        title: title.to_string(),
        description: None,
        start_time: session.start_time,
        end_time: session.end_time,
        status: session.status,
        route: session.location_track.clone(),
        stats,
        discoveries: session
            .marked_detection_ids()
            .iter()
            .filter(|id| marked.iter().any(|d| &d.id == *id))
            .cloned()
            .collect(),
        weather: None,
        photos: marked
            .iter()
            .filter(|d| d.source.includes_camera())
            .filter_map(|d| d.media.image_uri.clone())
            .collect(),
        is_public: false,
        share_url: None,
        tags: Vec::new(),
        notes: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journey::stats::compute_stats;
    use chrono::{Duration, TimeZone};

    fn walk() -> Vec<GeoPoint> {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        vec![
            GeoPoint::new(46.0, 7.0, t0).with_altitude(1200.0),
            GeoPoint::new(46.0005, 7.0004, t0 + Duration::seconds(30)),
            GeoPoint::new(46.001, 7.0009, t0 + Duration::seconds(60)).with_altitude(1235.0),
            GeoPoint::new(46.0012, 7.0015, t0 + Duration::seconds(95)).with_altitude(1221.5),
            GeoPoint::new(46.0013, 7.0022, t0 + Duration::seconds(140)),
        ]
    }

    #[test]
    fn incremental_matches_full_recompute() {
        let route = walk();
        let mut aggregator = JourneyAggregator::new();
        for point in &route {
            aggregator.on_point(point);
        }

        let running = aggregator.snapshot(140_000, 0);
        let full = compute_stats(&route, &[], 140_000, 0);

        assert!((running.distance_meters - full.distance_meters).abs() < 1e-6);
        assert_eq!(running.elevation_gain_meters, full.elevation_gain_meters);
        assert_eq!(running.elevation_loss_meters, full.elevation_loss_meters);
        assert_eq!(running.max_elevation_meters, Some(1235.0));
        assert_eq!(running.min_elevation_meters, Some(1200.0));

        let (avg_a, avg_b) = (running.avg_speed_mps.unwrap(), full.avg_speed_mps.unwrap());
        assert!((avg_a - avg_b).abs() < 1e-9);
        let (max_a, max_b) = (running.max_speed_mps.unwrap(), full.max_speed_mps.unwrap());
        assert!((max_a - max_b).abs() < 1e-9);
    }

    #[test]
    fn single_point_has_no_speed() {
        let mut aggregator = JourneyAggregator::new();
        aggregator.on_point(&walk()[0]);
        let stats = aggregator.snapshot(0, 0);
        assert_eq!(stats.distance_meters, 0.0);
        assert_eq!(stats.avg_speed_mps, None);
        assert_eq!(stats.elevation_gain_meters, None);
    }
}
