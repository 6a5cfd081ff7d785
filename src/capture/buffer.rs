use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, EngineResult},
    models::{Detection, DetectionSource, GeoPoint, LiveDetection, MediaRef, SpeciesMatch},
};

/// Everything known about one identified capture before it is marked.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub species_match: SpeciesMatch,
    pub media: MediaRef,
    pub source: DetectionSource,
    pub location: Option<GeoPoint>,
    pub duration_ms: Option<u64>,
}

/// Whether a live entry can still be promoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkCheck {
    Ready,
    AlreadyMarked(String),
}

/// Live and confirmed detections of one session.
///
/// Detection ids reuse the id of the live entry they were promoted from, so a
/// retried mark can be recognised.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionBuffer {
    live: Vec<LiveDetection>,
    detections: Vec<Detection>,
    marked_ids: Vec<String>,
    observations: HashMap<String, Observation>,
    /// Live entries folded into an existing detection, keyed to that detection.
    merged: HashMap<String, String>,
}

impl DetectionBuffer {
    pub fn live_detections(&self) -> &[LiveDetection] {
        &self.live
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn marked_ids(&self) -> &[String] {
        &self.marked_ids
    }

    pub fn pending(&self) -> impl Iterator<Item = &LiveDetection> {
        self.live.iter().filter(|ld| ld.is_pending())
    }

    pub fn add_live(&mut self, id: String, observation: Observation) -> LiveDetection {
        let live = LiveDetection {
            id: id.clone(),
            timestamp: observation.timestamp,
            species_name: observation.species_match.common_name.clone(),
            scientific_name: observation.species_match.scientific_name.clone(),
            confidence: observation.species_match.confidence,
            category: Some(observation.species_match.category),
            dismissed: false,
            marked: false,
            error: None,
        };
        self.observations.insert(id, observation);
        self.live.push(live.clone());
        live
    }

    /// Records a failed identification as a dismissible entry.
    pub fn add_failure(&mut self, id: String, timestamp: DateTime<Utc>, error: String) -> LiveDetection {
        let live = LiveDetection {
            id,
            timestamp,
            species_name: String::new(),
            scientific_name: String::new(),
            confidence: 0.0,
            category: None,
            dismissed: false,
            marked: false,
            error: Some(error),
        };
        self.live.push(live.clone());
        live
    }

    /// Returns `false` for entries that are already marked; those stay saved.
    pub fn dismiss(&mut self, live_id: &str) -> EngineResult<bool> {
        let live = self.live_mut(live_id)?;
        if live.marked {
            return Ok(false);
        }
        live.dismissed = true;
        self.observations.remove(live_id);
        Ok(true)
    }

    /// Dismissed and failed entries have nothing to promote and are reported
    /// as unknown.
    pub fn check_markable(&self, live_id: &str) -> EngineResult<MarkCheck> {
        let live = self
            .live
            .iter()
            .find(|ld| ld.id == live_id)
            .ok_or_else(|| EngineError::UnknownDetection(live_id.to_string()))?;

        if live.marked {
            let detection_id = self
                .merged
                .get(live_id)
                .cloned()
                .unwrap_or_else(|| live_id.to_string());
            return Ok(MarkCheck::AlreadyMarked(detection_id));
        }
        if live.dismissed || live.is_failure() || !self.observations.contains_key(live_id) {
            return Err(EngineError::UnknownDetection(live_id.to_string()));
        }
        Ok(MarkCheck::Ready)
    }

    pub fn observation(&self, live_id: &str) -> Option<&Observation> {
        self.observations.get(live_id)
    }

    /// Turns a pending live entry into a marked detection. Callers settle the
    /// trial credit first.
    pub fn promote(&mut self, live_id: &str) -> EngineResult<Detection> {
        if self.check_markable(live_id)? != MarkCheck::Ready {
            return Err(EngineError::UnknownDetection(live_id.to_string()));
        }
        let observation = self
            .observations
            .remove(live_id)
            .ok_or_else(|| EngineError::UnknownDetection(live_id.to_string()))?;
        self.live_mut(live_id)?.marked = true;

        let detection = Detection {
            id: live_id.to_string(),
            timestamp: observation.timestamp,
            confidence: observation.species_match.confidence,
            species_match: observation.species_match,
            marked: true,
            media: observation.media,
            location: observation.location,
            duration_ms: observation.duration_ms,
            source: observation.source,
        };
        self.marked_ids.push(detection.id.clone());
        self.detections.push(detection.clone());
        Ok(detection)
    }

    /// A marked detection of the same species within `window` of `timestamp`.
    pub fn find_duplicate(
        &self,
        species: &SpeciesMatch,
        timestamp: DateTime<Utc>,
        window: Duration,
    ) -> Option<&Detection> {
        let window_ms = window.as_millis() as i64;
        self.detections.iter().find(|d| {
            d.marked
                && d.species_match.same_species(species)
                && (d.timestamp - timestamp).num_milliseconds().abs() < window_ms
        })
    }

    /// Folds a pending live entry into an existing detection of the same
    /// observation, keeping whichever capture had the higher confidence. The
    /// detection keeps its id and timestamp. Returns the updated detection.
    pub fn absorb_duplicate(&mut self, live_id: &str, detection_id: &str) -> EngineResult<Detection> {
        let observation = self
            .observations
            .remove(live_id)
            .ok_or_else(|| EngineError::UnknownDetection(live_id.to_string()))?;
        let detection = self
            .detections
            .iter_mut()
            .find(|d| d.id == detection_id)
            .ok_or_else(|| EngineError::UnknownDetection(detection_id.to_string()))?;

        if observation.species_match.confidence > detection.confidence {
            detection.confidence = observation.species_match.confidence;
            detection.species_match = observation.species_match;
            detection.media = observation.media;
            detection.source = observation.source;
            detection.duration_ms = observation.duration_ms;
            if observation.location.is_some() {
                detection.location = observation.location;
            }
        }
        let updated = detection.clone();

        self.live_mut(live_id)?.marked = true;
        self.merged.insert(live_id.to_string(), detection_id.to_string());
        Ok(updated)
    }

    fn live_mut(&mut self, live_id: &str) -> EngineResult<&mut LiveDetection> {
        self.live
            .iter_mut()
            .find(|ld| ld.id == live_id)
            .ok_or_else(|| EngineError::UnknownDetection(live_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SpeciesCategory;
    use chrono::Duration as ChronoDuration;

    fn observation(scientific: &str, confidence: f64, at: DateTime<Utc>) -> Observation {
        Observation {
            timestamp: at,
            species_match: SpeciesMatch::new("Blackbird", scientific, SpeciesCategory::Bird, confidence),
            media: MediaRef::audio("file:///chunk.wav"),
            source: DetectionSource::Audio,
            location: None,
            duration_ms: Some(10_000),
        }
    }

    #[test]
    fn live_entries_do_not_count_as_detections() {
        let mut buffer = DetectionBuffer::default();
        buffer.add_live("a".into(), observation("Turdus merula", 0.8, Utc::now()));

        assert_eq!(buffer.live_detections().len(), 1);
        assert!(buffer.detections().is_empty());
        assert_eq!(buffer.pending().count(), 1);
    }

    #[test]
    fn promote_marks_once() {
        let mut buffer = DetectionBuffer::default();
        buffer.add_live("a".into(), observation("Turdus merula", 0.8, Utc::now()));

        let detection = buffer.promote("a").unwrap();
        assert!(detection.marked);
        assert_eq!(detection.id, "a");
        assert_eq!(buffer.marked_ids(), ["a".to_string()]);
        assert_eq!(
            buffer.check_markable("a").unwrap(),
            MarkCheck::AlreadyMarked("a".into())
        );
        assert!(buffer.promote("a").is_err());
        assert_eq!(buffer.detections().len(), 1);
    }

    #[test]
    fn dismissed_entries_cannot_be_marked() {
        let mut buffer = DetectionBuffer::default();
        buffer.add_live("a".into(), observation("Turdus merula", 0.8, Utc::now()));

        assert!(buffer.dismiss("a").unwrap());
        assert!(buffer.live_detections()[0].dismissed);
        assert!(matches!(
            buffer.check_markable("a"),
            Err(EngineError::UnknownDetection(_))
        ));
        assert!(matches!(
            buffer.dismiss("missing"),
            Err(EngineError::UnknownDetection(_))
        ));
    }

    #[test]
    fn failures_are_dismissible_but_not_markable() {
        let mut buffer = DetectionBuffer::default();
        buffer.add_failure("f".into(), Utc::now(), "timeout".into());

        assert!(buffer.check_markable("f").is_err());
        assert!(buffer.dismiss("f").unwrap());
        assert_eq!(buffer.pending().count(), 0);
    }

    #[test]
    fn duplicates_inside_window_keep_best_confidence() {
        let t0 = Utc::now();
        let mut buffer = DetectionBuffer::default();
        buffer.add_live("a".into(), observation("Turdus merula", 0.7, t0));
        buffer.promote("a").unwrap();

        let later = t0 + ChronoDuration::seconds(5);
        let better = observation("turdus merula", 0.92, later);
        let window = Duration::from_secs(10);
        let duplicate_id = buffer
            .find_duplicate(&better.species_match, later, window)
            .map(|d| d.id.clone())
            .unwrap();
        buffer.add_live("b".into(), better);

        let merged = buffer.absorb_duplicate("b", &duplicate_id).unwrap();
        assert_eq!(merged.id, "a");
        assert_eq!(merged.timestamp, t0);
        assert!((merged.confidence - 0.92).abs() < 1e-9);
        assert_eq!(buffer.detections().len(), 1);
        assert_eq!(
            buffer.check_markable("b").unwrap(),
            MarkCheck::AlreadyMarked("a".into())
        );

        let outside = t0 + ChronoDuration::seconds(10);
        assert!(buffer
            .find_duplicate(&merged.species_match, outside, window)
            .is_none());
    }

    #[test]
    fn weaker_duplicate_leaves_detection_untouched() {
        let t0 = Utc::now();
        let mut buffer = DetectionBuffer::default();
        buffer.add_live("a".into(), observation("Turdus merula", 0.9, t0));
        buffer.promote("a").unwrap();
        buffer.add_live("b".into(), observation("Turdus merula", 0.6, t0));

        let merged = buffer.absorb_duplicate("b", "a").unwrap();
        assert!((merged.confidence - 0.9).abs() < 1e-9);
    }
}
