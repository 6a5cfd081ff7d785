use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single position fix from the location source. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    pub accuracy: Option<f32>,
    /// Metres per second, as reported by the device.
    pub speed: Option<f32>,
    /// Degrees clockwise from north.
    pub bearing: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            accuracy: None,
            speed: None,
            bearing: None,
            timestamp,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_accuracy(mut self, accuracy: f32) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn is_within(&self, bounds: &GeoBounds) -> bool {
        bounds.contains(self)
    }
}

/// Bounding box of a route, used by map consumers to frame a journey.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn from_points(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let seed = Self {
            north: first.latitude,
            south: first.latitude,
            east: first.longitude,
            west: first.longitude,
        };
        Some(points[1..].iter().fold(seed, |bounds, p| bounds.expand(p)))
    }

    pub fn expand(self, point: &GeoPoint) -> Self {
        Self {
            north: self.north.max(point.latitude),
            south: self.south.min(point.latitude),
            east: self.east.max(point.longitude),
            west: self.west.min(point.longitude),
        }
    }

    /// Centre as (latitude, longitude).
    pub fn center(&self) -> (f64, f64) {
        ((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.latitude >= self.south
            && point.latitude <= self.north
            && point.longitude >= self.west
            && point.longitude <= self.east
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon, Utc.timestamp_opt(0, 0).unwrap())
    }

    #[test]
    fn bounds_cover_every_point() {
        let points = vec![at(51.5, -0.1), at(51.6, -0.3), at(51.4, 0.2)];
        let bounds = GeoBounds::from_points(&points).unwrap();

        assert_eq!(bounds.north, 51.6);
        assert_eq!(bounds.south, 51.4);
        assert_eq!(bounds.east, 0.2);
        assert_eq!(bounds.west, -0.3);
        assert!(points.iter().all(|p| p.is_within(&bounds)));
        assert!(!at(52.0, 0.0).is_within(&bounds));
    }

    #[test]
    fn bounds_of_empty_route_is_none() {
        assert!(GeoBounds::from_points(&[]).is_none());
    }

    #[test]
    fn center_is_midpoint() {
        let bounds = GeoBounds::from_points(&[at(10.0, 20.0), at(20.0, 40.0)]).unwrap();
        assert_eq!(bounds.center(), (15.0, 30.0));
    }
}
