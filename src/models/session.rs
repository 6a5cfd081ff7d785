use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::buffer::DetectionBuffer;

use super::{CaptureConfig, Detection, GeoPoint, JourneyStatus, LiveDetection, PauseSpan, SessionType};

/// In-memory state of one capture session. Owned by the controller for its
/// whole lifetime; never written to storage directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSession {
    pub id: String,
    pub config: CaptureConfig,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub buffer: DetectionBuffer,
    pub location_track: Vec<GeoPoint>,
    pub session_type: SessionType,
    pub user_id: String,
    pub trials_used: u32,
    pub status: JourneyStatus,
    pub pauses: Vec<PauseSpan>,
}

impl CaptureSession {
    pub fn new(id: String, user_id: String, config: CaptureConfig, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            session_type: config.session_type(),
            config,
            start_time,
            end_time: None,
            buffer: DetectionBuffer::default(),
            location_track: Vec::new(),
            user_id,
            trials_used: 0,
            status: JourneyStatus::Active,
            pauses: Vec::new(),
        }
    }

    pub fn detections(&self) -> &[Detection] {
        self.buffer.detections()
    }

    pub fn live_detections(&self) -> &[LiveDetection] {
        self.buffer.live_detections()
    }

    pub fn marked_detection_ids(&self) -> &[String] {
        self.buffer.marked_ids()
    }

    pub fn last_location(&self) -> Option<&GeoPoint> {
        self.location_track.last()
    }

    pub fn pause_duration_ms(&self, now: DateTime<Utc>) -> u64 {
        self.pauses.iter().map(|p| p.duration_ms(now)).sum()
    }

    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).num_milliseconds().max(0) as u64
    }

    /// Wall-clock time minus pauses.
    pub fn active_ms(&self, now: DateTime<Utc>) -> u64 {
        self.elapsed_ms(now).saturating_sub(self.pause_duration_ms(now))
    }

    pub(crate) fn open_pause(&mut self, now: DateTime<Utc>) {
        if !self.pauses.last().is_some_and(PauseSpan::is_open) {
            self.pauses.push(PauseSpan::open(now));
        }
    }

    pub(crate) fn close_pause(&mut self, now: DateTime<Utc>) {
        if let Some(span) = self.pauses.last_mut().filter(|span| span.is_open()) {
            span.ended_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn pause_time_is_excluded_from_active_time() {
        let start = Utc::now();
        let mut session = CaptureSession::new(
            "s1".into(),
            "u1".into(),
            CaptureConfig::default(),
            start,
        );

        session.open_pause(start + Duration::seconds(60));
        // A second pause request while already paused does not open another window.
        session.open_pause(start + Duration::seconds(70));
        session.close_pause(start + Duration::seconds(90));

        let now = start + Duration::seconds(120);
        assert_eq!(session.pauses.len(), 1);
        assert_eq!(session.pause_duration_ms(now), 30_000);
        assert_eq!(session.active_ms(now), 90_000);
    }

    #[test]
    fn open_pause_counts_up_to_now() {
        let start = Utc::now();
        let mut session = CaptureSession::new(
            "s1".into(),
            "u1".into(),
            CaptureConfig::default(),
            start,
        );
        session.open_pause(start + Duration::seconds(10));
        assert_eq!(session.pause_duration_ms(start + Duration::seconds(25)), 15_000);
    }
}
