//! Session lifecycle as a plain state machine. Transitions mutate the state in
//! place and hand back the side effects the controller must run; nothing here
//! touches storage, timers or channels.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{EngineError, EngineResult},
    journey::{session_stats, to_journey, JourneyAggregator},
    models::{
        CaptureSession, Discovery, FrequencyProfile, Journey, JourneyStats, JourneyStatus,
        JourneyWaypoint,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Idle,
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Active => "active",
            SessionPhase::Paused => "paused",
            SessionPhase::Completed => "completed",
            SessionPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Paused)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session that is still running or paused.
#[derive(Debug, Clone)]
pub struct LiveSession {
    pub session: CaptureSession,
    pub aggregator: JourneyAggregator,
    /// Set for automatic sessions only.
    pub profile: Option<FrequencyProfile>,
    pub title: String,
    pub waypoints: Vec<JourneyWaypoint>,
}

impl LiveSession {
    pub fn new(session: CaptureSession, profile: Option<FrequencyProfile>, title: String) -> Self {
        Self {
            session,
            aggregator: JourneyAggregator::new(),
            profile,
            title,
            waypoints: Vec::new(),
        }
    }

    pub fn running_stats(&self, now: DateTime<Utc>) -> JourneyStats {
        self.aggregator.session_snapshot(&self.session, now)
    }

    /// True once non-paused time reaches the configured cap.
    pub fn max_duration_reached(&self, now: DateTime<Utc>) -> bool {
        self.session
            .config
            .max_duration()
            .is_some_and(|max| u128::from(self.session.active_ms(now)) >= max.as_millis())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartScheduler(FrequencyProfile),
    StopScheduler,
    StartLocationUpdates,
    StopLocationUpdates,
}

/// What `end` would persist. Built without touching the live state so a
/// failed write leaves the session where it was.
#[derive(Debug, Clone)]
pub struct EndPlan {
    pub journey: Journey,
    pub trials_used: u32,
    pub discoveries: Vec<Discovery>,
    pub waypoints: Vec<JourneyWaypoint>,
}

#[derive(Debug, Clone)]
pub struct CancelPlan {
    pub session_id: String,
}

#[derive(Debug, Clone, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active(LiveSession),
    Paused(LiveSession),
    Completed { journey: Journey, trials_used: u32 },
    Cancelled(CaptureSession),
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::Paused(_) => SessionPhase::Paused,
            SessionState::Completed { .. } => SessionPhase::Completed,
            SessionState::Cancelled(_) => SessionPhase::Cancelled,
        }
    }

    pub fn live(&self) -> Option<&LiveSession> {
        match self {
            SessionState::Active(live) | SessionState::Paused(live) => Some(live),
            _ => None,
        }
    }

    pub fn live_mut(&mut self) -> Option<&mut LiveSession> {
        match self {
            SessionState::Active(live) | SessionState::Paused(live) => Some(live),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        match self {
            SessionState::Idle => None,
            SessionState::Active(live) | SessionState::Paused(live) => Some(&live.session.id),
            SessionState::Completed { journey, .. } => Some(&journey.id),
            SessionState::Cancelled(session) => Some(&session.id),
        }
    }

    pub fn start(&mut self, live: LiveSession) -> EngineResult<Vec<Effect>> {
        if self.phase().is_live() {
            return Err(EngineError::SessionAlreadyActive {
                user_id: live.session.user_id,
            });
        }

        let mut effects = vec![Effect::StartLocationUpdates];
        if let Some(profile) = live.profile {
            effects.push(Effect::StartScheduler(profile));
        }
        *self = SessionState::Active(live);
        Ok(effects)
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<Effect>> {
        match std::mem::take(self) {
            SessionState::Active(mut live) => {
                live.session.open_pause(now);
                live.session.status = JourneyStatus::Paused;
                let effects = if live.profile.is_some() {
                    vec![Effect::StopScheduler]
                } else {
                    Vec::new()
                };
                *self = SessionState::Paused(live);
                Ok(effects)
            }
            other => {
                let phase = other.phase();
                *self = other;
                Err(EngineError::transition("pause", phase))
            }
        }
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> EngineResult<Vec<Effect>> {
        match std::mem::take(self) {
            SessionState::Paused(mut live) => {
                live.session.close_pause(now);
                live.session.status = JourneyStatus::Active;
                let effects = live
                    .profile
                    .map(|profile| vec![Effect::StartScheduler(profile)])
                    .unwrap_or_default();
                *self = SessionState::Active(live);
                Ok(effects)
            }
            other => {
                let phase = other.phase();
                *self = other;
                Err(EngineError::transition("resume", phase))
            }
        }
    }

    /// Finalises a copy of the session: closes any open pause, recomputes
    /// stats over the full route and builds the journey and its discoveries.
    pub fn plan_end(&self, now: DateTime<Utc>) -> EngineResult<EndPlan> {
        let live = self
            .live()
            .ok_or_else(|| EngineError::transition("end", self.phase()))?;

        let mut session = live.session.clone();
        session.close_pause(now);
        session.end_time = Some(now);
        session.status = JourneyStatus::Completed;

        let stats = session_stats(&session, now);
        let journey = to_journey(&session, stats, &live.title);
        let discoveries = session
            .detections()
            .iter()
            .filter(|d| d.marked)
            .map(|d| Discovery::from_detection(d, Some(&session.id)))
            .collect();

        Ok(EndPlan {
            journey,
            trials_used: session.trials_used,
            discoveries,
            waypoints: live.waypoints.clone(),
        })
    }

    pub fn commit_end(&mut self, plan: EndPlan) -> Vec<Effect> {
        let had_scheduler = self.live().is_some_and(|live| live.profile.is_some());
        *self = SessionState::Completed {
            journey: plan.journey,
            trials_used: plan.trials_used,
        };
        stop_effects(had_scheduler)
    }

    pub fn plan_cancel(&self) -> EngineResult<CancelPlan> {
        let live = self
            .live()
            .ok_or_else(|| EngineError::transition("cancel", self.phase()))?;
        Ok(CancelPlan {
            session_id: live.session.id.clone(),
        })
    }

    pub fn commit_cancel(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        match std::mem::take(self) {
            SessionState::Active(live) | SessionState::Paused(live) => {
                let had_scheduler = live.profile.is_some();
                let mut session = live.session;
                session.close_pause(now);
                session.end_time = Some(now);
                session.status = JourneyStatus::Cancelled;
                *self = SessionState::Cancelled(session);
                stop_effects(had_scheduler)
            }
            other => {
                *self = other;
                Vec::new()
            }
        }
    }
}

fn stop_effects(had_scheduler: bool) -> Vec<Effect> {
    let mut effects = Vec::with_capacity(2);
    if had_scheduler {
        effects.push(Effect::StopScheduler);
    }
    effects.push(Effect::StopLocationUpdates);
    effects
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::buffer::Observation;
    use crate::models::{
        CaptureConfig, CaptureMode, DetectionFrequency, DetectionSource, GeoPoint, ListeningMode,
        MediaRef, OperatingMode, SpeciesCategory, SpeciesMatch, DEFAULT_JOURNEY_TITLE,
    };
    use chrono::Duration;

    fn automatic_track() -> CaptureConfig {
        CaptureConfig {
            mode: CaptureMode::Listen,
            operating_mode: OperatingMode::Automatic,
            listening_mode: Some(ListeningMode::Track),
            max_duration_seconds: None,
            auto_save: None,
        }
    }

    fn live_session(start: DateTime<Utc>) -> LiveSession {
        let session = CaptureSession::new("s1".into(), "u1".into(), automatic_track(), start);
        LiveSession::new(
            session,
            Some(DetectionFrequency::Balanced.profile()),
            DEFAULT_JOURNEY_TITLE.into(),
        )
    }

    #[test]
    fn start_refuses_while_live() {
        let now = Utc::now();
        let mut state = SessionState::Idle;
        let effects = state.start(live_session(now)).unwrap();
        assert_eq!(
            effects,
            vec![
                Effect::StartLocationUpdates,
                Effect::StartScheduler(DetectionFrequency::Balanced.profile())
            ]
        );

        let err = state.start(live_session(now)).unwrap_err();
        assert!(matches!(err, EngineError::SessionAlreadyActive { .. }));

        state.pause(now).unwrap();
        assert!(matches!(
            state.start(live_session(now)),
            Err(EngineError::SessionAlreadyActive { .. })
        ));
    }

    #[test]
    fn pause_and_resume_toggle_scheduler() {
        let start = Utc::now();
        let mut state = SessionState::Idle;
        state.start(live_session(start)).unwrap();

        assert_eq!(state.pause(start).unwrap(), vec![Effect::StopScheduler]);
        assert_eq!(state.phase(), SessionPhase::Paused);
        assert!(matches!(
            state.pause(start),
            Err(EngineError::InvalidTransition { action: "pause", from: SessionPhase::Paused })
        ));

        let effects = state.resume(start + Duration::seconds(30)).unwrap();
        assert_eq!(
            effects,
            vec![Effect::StartScheduler(DetectionFrequency::Balanced.profile())]
        );
        let live = state.live().unwrap();
        assert_eq!(live.session.pause_duration_ms(start + Duration::seconds(60)), 30_000);
        assert!(state.resume(start).is_err());
    }

    #[test]
    fn idle_rejects_every_transition() {
        let now = Utc::now();
        let mut state = SessionState::Idle;
        assert!(state.pause(now).is_err());
        assert!(state.resume(now).is_err());
        assert!(state.plan_end(now).is_err());
        assert!(state.plan_cancel().is_err());
        assert_eq!(state.phase(), SessionPhase::Idle);
    }

    #[test]
    fn planning_an_end_does_not_touch_state() {
        let start = Utc::now();
        let mut state = SessionState::Idle;
        state.start(live_session(start)).unwrap();

        let plan = state.plan_end(start + Duration::seconds(90)).unwrap();
        assert_eq!(plan.journey.status, JourneyStatus::Completed);
        assert_eq!(plan.journey.stats.duration_millis, 90_000);
        assert_eq!(state.phase(), SessionPhase::Active);

        let effects = state.commit_end(plan);
        assert_eq!(
            effects,
            vec![Effect::StopScheduler, Effect::StopLocationUpdates]
        );
        assert_eq!(state.phase(), SessionPhase::Completed);
        assert!(matches!(
            state.pause(start),
            Err(EngineError::InvalidTransition { from: SessionPhase::Completed, .. })
        ));
    }

    #[test]
    fn end_keeps_only_marked_detections() {
        let start = Utc::now();
        let mut state = SessionState::Idle;
        state.start(live_session(start)).unwrap();

        let live = state.live_mut().unwrap();
        live.session
            .location_track
            .push(GeoPoint::new(0.0, 0.0, start).with_altitude(100.0));
        for id in ["a", "b", "c"] {
            live.session.buffer.add_live(
                id.into(),
                Observation {
                    timestamp: start,
                    species_match: SpeciesMatch::new("Wren", "Troglodytes troglodytes", SpeciesCategory::Bird, 0.8),
                    media: MediaRef::audio("file:///wren.wav"),
                    source: DetectionSource::Audio,
                    location: None,
                    duration_ms: Some(10_000),
                },
            );
        }
        live.session.buffer.promote("b").unwrap();

        let plan = state.plan_end(start + Duration::seconds(30)).unwrap();
        assert_eq!(plan.journey.discoveries, vec!["b".to_string()]);
        assert_eq!(plan.journey.stats.discovery_count, 1);
        assert_eq!(plan.journey.stats.audio_count, 1);
        assert_eq!(plan.discoveries.len(), 1);
        assert_eq!(plan.discoveries[0].journey_id.as_deref(), Some("s1"));
        assert!(plan.journey.photos.is_empty());
    }

    #[test]
    fn cancel_from_paused() {
        let start = Utc::now();
        let mut state = SessionState::Idle;
        state.start(live_session(start)).unwrap();
        state.pause(start).unwrap();

        let plan = state.plan_cancel().unwrap();
        assert_eq!(plan.session_id, "s1");
        let effects = state.commit_cancel(start + Duration::seconds(5));
        assert_eq!(
            effects,
            vec![Effect::StopScheduler, Effect::StopLocationUpdates]
        );
        match &state {
            SessionState::Cancelled(session) => {
                assert_eq!(session.status, JourneyStatus::Cancelled);
                assert!(session.pauses.iter().all(|p| !p.is_open()));
            }
            other => panic!("unexpected state {:?}", other.phase()),
        }

        // A fresh session may start once the previous one is terminal.
        assert!(state.start(live_session(start)).is_ok());
    }

    #[test]
    fn phase_display_is_lowercase() {
        assert_eq!(SessionPhase::Cancelled.to_string(), "cancelled");
    }
}
