//! Pure geospatial helpers over recorded routes. No I/O, no allocation beyond
//! the returned values.

use crate::models::GeoPoint;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle (haversine) distance in metres. Altitude is ignored.
pub fn distance_meters(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair outside [0, 1] for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_METERS * c
}

/// Sum of consecutive-pair distances.
pub fn route_distance(route: &[GeoPoint]) -> f64 {
    route
        .windows(2)
        .map(|pair| distance_meters(&pair[0], &pair[1]))
        .sum()
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ElevationDelta {
    pub gain: f64,
    pub loss: f64,
    /// Number of altitude pairs that contributed.
    pub samples: usize,
}

/// Accumulated climb and descent. Points without altitude are skipped; the next
/// reading is compared to the last altitude actually seen.
pub fn elevation_delta(route: &[GeoPoint]) -> ElevationDelta {
    let mut delta = ElevationDelta::default();
    let mut last_altitude: Option<f64> = None;

    for altitude in route.iter().filter_map(|p| p.altitude) {
        if let Some(previous) = last_altitude {
            delta.accumulate(altitude - previous);
        }
        last_altitude = Some(altitude);
    }

    delta
}

impl ElevationDelta {
    pub(crate) fn accumulate(&mut self, diff: f64) {
        if diff > 0.0 {
            self.gain += diff;
        } else {
            self.loss += -diff;
        }
        self.samples += 1;
    }
}

/// (min, max) altitude over the route, if any point carries one.
pub fn elevation_range(route: &[GeoPoint]) -> Option<(f64, f64)> {
    route.iter().filter_map(|p| p.altitude).fold(None, |range, alt| {
        Some(match range {
            None => (alt, alt),
            Some((min, max)) => (min.min(alt), max.max(alt)),
        })
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedStats {
    pub avg_mps: f64,
    pub max_mps: f64,
}

/// Average is total distance over total elapsed time; max is the fastest
/// consecutive segment. `None` with fewer than two points or no elapsed time.
pub fn speed_stats(route: &[GeoPoint]) -> Option<SpeedStats> {
    let (first, last) = (route.first()?, route.last()?);
    let elapsed_secs = seconds_between(first, last);
    if route.len() < 2 || elapsed_secs <= 0.0 {
        return None;
    }

    let mut total = 0.0;
    let mut max_mps: f64 = 0.0;
    for pair in route.windows(2) {
        let segment = distance_meters(&pair[0], &pair[1]);
        total += segment;
        let dt = seconds_between(&pair[0], &pair[1]);
        if dt > 0.0 {
            max_mps = max_mps.max(segment / dt);
        }
    }

    Some(SpeedStats {
        avg_mps: total / elapsed_secs,
        max_mps,
    })
}

pub(crate) fn seconds_between(a: &GeoPoint, b: &GeoPoint) -> f64 {
    (b.timestamp - a.timestamp).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn point(lat: f64, lon: f64, alt: Option<f64>, secs: i64) -> GeoPoint {
        let mut p = GeoPoint::new(lat, lon, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
        p.altitude = alt;
        p
    }

    #[test]
    fn identical_points_are_zero_apart() {
        let a = point(51.5007, -0.1246, None, 0);
        assert_eq!(distance_meters(&a, &a), 0.0);
    }

    #[test]
    fn known_distance_london_paris() {
        let london = point(51.5074, -0.1278, None, 0);
        let paris = point(48.8566, 2.3522, None, 0);
        let d = distance_meters(&london, &paris);
        assert!((d - 343_556.0).abs() < 1_000.0, "got {d}");
    }

    #[test]
    fn altitude_does_not_change_distance() {
        let a = point(10.0, 10.0, Some(0.0), 0);
        let b = point(10.0, 10.01, Some(900.0), 0);
        let flat_b = point(10.0, 10.01, None, 0);
        assert_eq!(distance_meters(&a, &b), distance_meters(&a, &flat_b));
    }

    #[test]
    fn single_point_route_has_no_distance() {
        assert_eq!(route_distance(&[point(1.0, 1.0, None, 0)]), 0.0);
        assert_eq!(route_distance(&[]), 0.0);
    }

    #[test]
    fn three_point_walk() {
        let route = vec![
            point(0.0, 0.0, Some(100.0), 0),
            point(0.0, 0.001, Some(120.0), 60),
            point(0.0, 0.002, Some(110.0), 120),
        ];

        let delta = elevation_delta(&route);
        assert!((delta.gain - 20.0).abs() < 1e-9);
        assert!((delta.loss - 10.0).abs() < 1e-9);

        let expected = distance_meters(&route[0], &route[1]) + distance_meters(&route[1], &route[2]);
        let total = route_distance(&route);
        assert!((total - expected).abs() < 1e-9);
        // 0.001 degrees of longitude at the equator is roughly 111 m.
        assert!((total - 222.39).abs() < 0.5, "got {total}");

        let speed = speed_stats(&route).unwrap();
        assert!((speed.avg_mps - total / 120.0).abs() < 1e-9);
        assert!(speed.max_mps >= speed.avg_mps - 1e-9);
    }

    #[test]
    fn missing_altitude_does_not_break_chain() {
        let route = vec![
            point(0.0, 0.0, Some(100.0), 0),
            point(0.0, 0.0, None, 10),
            point(0.0, 0.0, Some(130.0), 20),
            point(0.0, 0.0, None, 30),
            point(0.0, 0.0, Some(125.0), 40),
        ];
        let delta = elevation_delta(&route);
        assert_eq!(delta.gain, 30.0);
        assert_eq!(delta.loss, 5.0);
        assert_eq!(delta.samples, 2);
        assert_eq!(elevation_range(&route), Some((100.0, 130.0)));
    }

    #[test]
    fn route_without_altitudes_has_no_elevation() {
        let route = vec![point(0.0, 0.0, None, 0), point(0.0, 1.0, None, 10)];
        assert_eq!(elevation_delta(&route).samples, 0);
        assert_eq!(elevation_range(&route), None);
    }

    #[test]
    fn speed_undefined_without_elapsed_time() {
        assert!(speed_stats(&[point(0.0, 0.0, None, 0)]).is_none());
        let same_instant = vec![point(0.0, 0.0, None, 5), point(0.0, 0.01, None, 5)];
        assert!(speed_stats(&same_instant).is_none());
    }

    #[test]
    fn max_speed_picks_fastest_segment() {
        let route = vec![
            point(0.0, 0.0, None, 0),
            point(0.0, 0.001, None, 100),
            point(0.0, 0.002, None, 110),
        ];
        let speed = speed_stats(&route).unwrap();
        let fast = distance_meters(&route[1], &route[2]) / 10.0;
        assert!((speed.max_mps - fast).abs() < 1e-9);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_point() -> impl Strategy<Value = (f64, f64)> {
            (-89.0..89.0_f64, -179.0..179.0_f64)
        }

        proptest! {
            #[test]
            fn distance_is_symmetric(a in arb_point(), b in arb_point()) {
                let pa = point(a.0, a.1, None, 0);
                let pb = point(b.0, b.1, None, 0);
                let ab = distance_meters(&pa, &pb);
                let ba = distance_meters(&pb, &pa);
                prop_assert!((ab - ba).abs() < 1e-6, "{} vs {}", ab, ba);
                prop_assert!(ab >= 0.0);
            }

            #[test]
            fn route_distance_never_decreases(points in prop::collection::vec(arb_point(), 1..40)) {
                let route: Vec<GeoPoint> = points
                    .iter()
                    .enumerate()
                    .map(|(i, (lat, lon))| point(*lat, *lon, None, i as i64))
                    .collect();

                let mut previous = 0.0;
                for len in 1..=route.len() {
                    let total = route_distance(&route[..len]);
                    prop_assert!(total >= previous, "distance shrank at {}: {} < {}", len, total, previous);
                    previous = total;
                }
                prop_assert_eq!(route_distance(&route[..1]), 0.0);
            }
        }
    }
}
