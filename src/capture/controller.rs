use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    error::{EngineError, EngineResult},
    identification::{
        category_hint, identify_with_timeout, CaptureRequest, CapturedMedia,
        IdentificationResult, IdentificationService, MediaCapture,
    },
    location::{LocationEvent, LocationSource},
    models::{
        CaptureConfig, CaptureMode, CaptureSession, Detection, DetectionFrequency, Discovery,
        GeoPoint, Journey, JourneyStats, JourneyWaypoint, ListeningMode, LiveDetection,
        OperatingMode, DEFAULT_JOURNEY_TITLE, DEFAULT_WAYPOINT_ICON,
    },
    persistence::JourneyStore,
    settings::DetectionSettings,
    trial::{consumes_trial, TrialLedger},
};

use super::{
    buffer::{MarkCheck, Observation},
    events::{EventBus, SessionEvent},
    scheduler::CaptureScheduler,
    state::{EndPlan, Effect, LiveSession, SessionPhase, SessionState},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

pub const DEFAULT_IDENTIFY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub detection: DetectionSettings,
    pub identify_timeout: Duration,
    /// Emit a stats heartbeat every N location samples.
    pub heartbeat_every_samples: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let debug_mode = std::env::var("FIELDWALK_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            detection: DetectionSettings::default(),
            identify_timeout: DEFAULT_IDENTIFY_TIMEOUT,
            heartbeat_every_samples: if debug_mode { 1 } else { 10 },
        }
    }
}

/// Collaborators the controller drives. Media and location are optional so a
/// host without a camera or GPS can still run manual identifications.
#[derive(Clone)]
pub struct ControllerDeps {
    pub ledger: TrialLedger,
    pub store: Arc<dyn JourneyStore>,
    pub identifier: Arc<dyn IdentificationService>,
    pub media: Option<Arc<dyn MediaCapture>>,
    pub location: Option<Arc<dyn LocationSource>>,
}

/// What happened to one identification result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultDisposition {
    /// The session it belonged to is gone or terminal.
    Dropped,
    NoMatch,
    Failed { live_id: String },
    Live { live_id: String },
    Saved { live_id: String, detection_id: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub phase: SessionPhase,
    pub started_at: DateTime<Utc>,
    pub stats: JourneyStats,
    pub live_detections: Vec<LiveDetection>,
    pub trials_used: u32,
}

struct SessionSlot {
    state: SessionState,
    scheduler: CaptureScheduler,
    capture_pump: Option<JoinHandle<()>>,
    location_pump: Option<JoinHandle<()>>,
    sequence: Arc<AtomicU64>,
    samples_seen: u32,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            scheduler: CaptureScheduler::new(),
            capture_pump: None,
            location_pump: None,
            sequence: Arc::new(AtomicU64::new(0)),
            samples_seen: 0,
        }
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        for handle in [self.capture_pump.take(), self.location_pump.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct ControllerInner {
    deps: ControllerDeps,
    config: RwLock<ControllerConfig>,
    slots: Mutex<HashMap<String, Arc<Mutex<SessionSlot>>>>,
    events: EventBus,
}

/// Owns every user's capture session and all transitions between phases.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct CaptureSessionController {
    inner: Arc<ControllerInner>,
}

impl CaptureSessionController {
    pub fn new(deps: ControllerDeps, config: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                deps,
                config: RwLock::new(config),
                slots: Mutex::new(HashMap::new()),
                events: EventBus::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn ledger(&self) -> &TrialLedger {
        &self.inner.deps.ledger
    }

    pub async fn set_detection_settings(&self, detection: DetectionSettings) {
        self.inner.config.write().await.detection = detection;
    }

    pub async fn start_session(
        &self,
        user_id: &str,
        config: CaptureConfig,
        frequency: DetectionFrequency,
    ) -> EngineResult<SessionSnapshot> {
        config.validate()?;

        let slot = self.slot(user_id).await;
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let now = Utc::now();
        let session_id = Uuid::new_v4().to_string();
        let profile =
            (config.operating_mode == OperatingMode::Automatic).then(|| frequency.profile());
        let session = CaptureSession::new(session_id.clone(), user_id.to_string(), config, now);
        let live = LiveSession::new(session, profile, DEFAULT_JOURNEY_TITLE.to_string());

        let effects = slot.state.start(live)?;
        slot.sequence = Arc::new(AtomicU64::new(0));
        slot.samples_seen = 0;
        self.apply_effects(user_id, &session_id, slot, effects);

        match profile {
            Some(profile) => info!(
                "Started automatic session {session_id} for user {user_id} ({}ms interval)",
                profile.interval_ms
            ),
            None => info!("Started manual session {session_id} for user {user_id}"),
        }
        self.emit_state(user_id, &session_id, SessionPhase::Active);

        snapshot_of(&slot.state, now)
            .ok_or_else(|| EngineError::transition("start", SessionPhase::Idle))
    }

    pub async fn pause_session(&self, user_id: &str) -> EngineResult<()> {
        self.toggle(user_id, true).await
    }

    pub async fn resume_session(&self, user_id: &str) -> EngineResult<()> {
        self.toggle(user_id, false).await
    }

    async fn toggle(&self, user_id: &str, pause: bool) -> EngineResult<()> {
        let action = if pause { "pause" } else { "resume" };
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition(action, SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let now = Utc::now();
        let effects = if pause {
            slot.state.pause(now)?
        } else {
            slot.state.resume(now)?
        };
        let session_id = slot.state.session_id().unwrap_or_default().to_string();
        self.apply_effects(user_id, &session_id, slot, effects);

        let phase = slot.state.phase();
        info!("Session {session_id} for user {user_id} is now {phase}");
        self.emit_state(user_id, &session_id, phase);
        Ok(())
    }

    /// Persists the journey with its marked discoveries and waypoints. On a
    /// write failure the session stays live and the call may be retried.
    pub async fn end_session(&self, user_id: &str) -> EngineResult<Journey> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("end", SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let plan = slot.state.plan_end(Utc::now())?;
        if let Err(err) = self.persist_end(&plan).await {
            log_error!("Failed to persist journey {}: {err:#}", plan.journey.id);
            return Err(EngineError::PersistenceFailed(err));
        }

        let journey = plan.journey.clone();
        let effects = slot.state.commit_end(plan);
        self.apply_effects(user_id, &journey.id, slot, effects);

        info!(
            "Completed journey {} for user {user_id}: {:.0} m, {} discoveries",
            journey.id, journey.stats.distance_meters, journey.stats.discovery_count
        );
        self.emit_state(user_id, &journey.id, SessionPhase::Completed);
        self.inner.events.emit(SessionEvent::SessionCompleted {
            user_id: user_id.to_string(),
            journey: journey.clone(),
        });
        Ok(journey)
    }

    /// Discards the session without writing a journey. Discoveries already
    /// saved for it become standalone; their credits are not refunded.
    pub async fn cancel_session(&self, user_id: &str) -> EngineResult<()> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("cancel", SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let plan = slot.state.plan_cancel()?;
        let detached = self
            .inner
            .deps
            .store
            .detach_discoveries(&plan.session_id)
            .await
            .with_context(|| format!("failed to detach discoveries of {}", plan.session_id))
            .map_err(EngineError::PersistenceFailed)?;
        // A failed end may have left a journey row behind.
        let removed = self
            .inner
            .deps
            .store
            .delete_journey(&plan.session_id)
            .await
            .with_context(|| format!("failed to remove journey {}", plan.session_id))
            .map_err(EngineError::PersistenceFailed)?;
        if removed {
            log_warn!("Removed partial journey {} on cancel", plan.session_id);
        }

        let effects = slot.state.commit_cancel(Utc::now());
        self.apply_effects(user_id, &plan.session_id, slot, effects);

        info!(
            "Cancelled session {} for user {user_id}; {detached} discoveries kept as standalone",
            plan.session_id
        );
        self.emit_state(user_id, &plan.session_id, SessionPhase::Cancelled);
        Ok(())
    }

    /// Returns `false` when the sample was dropped because no session is live.
    pub async fn on_location_sample(&self, user_id: &str, point: GeoPoint) -> bool {
        let Some(slot) = self.existing_slot(user_id).await else {
            return false;
        };
        let heartbeat_every = self.inner.config.read().await.heartbeat_every_samples.max(1);
        let mut guard = slot.lock().await;
        let slot = &mut *guard;

        let Some(live) = slot.state.live_mut() else {
            debug!("Dropping location sample for user {user_id}: no live session");
            return false;
        };
        live.aggregator.on_point(&point);
        live.session.location_track.push(point);

        let now = Utc::now();
        slot.samples_seen = slot.samples_seen.wrapping_add(1);
        if slot.samples_seen % heartbeat_every == 0 {
            self.inner.events.emit(SessionEvent::StatsUpdated {
                user_id: user_id.to_string(),
                session_id: live.session.id.clone(),
                stats: live.running_stats(now),
            });
        }
        if live.max_duration_reached(now) {
            self.spawn_auto_end(user_id);
        }
        true
    }

    /// Routes one finished identification into the session it was captured
    /// for. Results for a different or terminal session are dropped.
    pub async fn on_identification_result(
        &self,
        result: IdentificationResult,
    ) -> EngineResult<ResultDisposition> {
        let Some(slot) = self.existing_slot(&result.user_id).await else {
            return Ok(ResultDisposition::Dropped);
        };
        let detection_settings = self.inner.config.read().await.detection.clone();
        let mut guard = slot.lock().await;

        let Some(live) = guard
            .state
            .live_mut()
            .filter(|live| live.session.id == result.session_id)
        else {
            log_info!(
                "Dropping late identification result #{} for session {}",
                result.sequence,
                result.session_id
            );
            return Ok(ResultDisposition::Dropped);
        };

        let user_id = result.user_id.as_str();
        let live_id = Uuid::new_v4().to_string();
        let species = match result.outcome {
            Err(err) => {
                log_warn!(
                    "Identification #{} failed for session {}: {err}",
                    result.sequence,
                    result.session_id
                );
                let entry = live.session.buffer.add_failure(
                    live_id.clone(),
                    result.requested_at,
                    err.to_string(),
                );
                self.inner.events.emit(SessionEvent::IdentificationFailed {
                    user_id: user_id.to_string(),
                    session_id: result.session_id.clone(),
                    live_id: live_id.clone(),
                    message: err.to_string(),
                });
                self.emit_live(user_id, &result.session_id, entry);
                return Ok(ResultDisposition::Failed { live_id });
            }
            Ok(None) => {
                debug!("No species recognised in capture #{}", result.sequence);
                return Ok(ResultDisposition::NoMatch);
            }
            Ok(Some(species)) => species,
        };

        let observation = Observation {
            timestamp: result.requested_at,
            species_match: species.clone(),
            media: result.media,
            source: result.source,
            location: live.session.last_location().cloned(),
            duration_ms: result.duration_ms,
        };
        let entry = live.session.buffer.add_live(live_id.clone(), observation);
        self.emit_live(user_id, &result.session_id, entry);

        if live.session.config.operating_mode == OperatingMode::Manual {
            let detection = self.mark_locked(user_id, live, &live_id).await?;
            return Ok(ResultDisposition::Saved {
                live_id,
                detection_id: detection.id,
            });
        }

        if !auto_saves(&live.session.config, &detection_settings)
            || species.confidence < detection_settings.minimum_confidence
        {
            return Ok(ResultDisposition::Live { live_id });
        }

        let window = live
            .profile
            .unwrap_or_else(|| DetectionFrequency::default().profile())
            .chunk_duration();
        let duplicate = live
            .session
            .buffer
            .find_duplicate(&species, result.requested_at, window)
            .map(|d| d.id.clone());

        if let Some(detection_id) = duplicate {
            let updated = live.session.buffer.absorb_duplicate(&live_id, &detection_id)?;
            debug!("Merged duplicate {live_id} into detection {detection_id}");
            self.persist_discovery(&live.session.id, &updated).await;
            self.inner.events.emit(SessionEvent::DetectionSaved {
                user_id: user_id.to_string(),
                session_id: live.session.id.clone(),
                detection: updated,
                trial_consumed: false,
            });
            return Ok(ResultDisposition::Saved {
                live_id,
                detection_id,
            });
        }

        match self.mark_locked(user_id, live, &live_id).await {
            Ok(detection) => Ok(ResultDisposition::Saved {
                live_id,
                detection_id: detection.id,
            }),
            // Stays live and retryable; the event already told the UI.
            Err(EngineError::QuotaExhausted) => Ok(ResultDisposition::Live { live_id }),
            Err(err) => Err(err),
        }
    }

    /// Promotes a live detection, consuming a trial credit where required.
    /// Marking an already-marked entry returns its detection id again.
    /// Passive listening sessions refuse every mark.
    pub async fn mark_for_save(&self, user_id: &str, live_id: &str) -> EngineResult<String> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("mark", SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let phase = guard.state.phase();
        let live = guard
            .state
            .live_mut()
            .ok_or_else(|| EngineError::transition("mark", phase))?;

        let detection = self.mark_locked(user_id, live, live_id).await?;
        Ok(detection.id)
    }

    pub async fn dismiss(&self, user_id: &str, live_id: &str) -> EngineResult<bool> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("dismiss", SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let phase = guard.state.phase();
        let live = guard
            .state
            .live_mut()
            .ok_or_else(|| EngineError::transition("dismiss", phase))?;
        live.session.buffer.dismiss(live_id)
    }

    /// Records one chunk from the capture device and identifies it.
    pub async fn capture_now(&self, user_id: &str) -> EngineResult<ResultDisposition> {
        let device = self.inner.deps.media.clone().ok_or_else(|| {
            EngineError::IdentificationFailed("no capture device registered".into())
        })?;
        let request = self.prepare_manual_capture(user_id).await?;

        let media = device
            .capture(request.mode, &request.request)
            .await
            .map_err(|err| EngineError::IdentificationFailed(format!("capture failed: {err:#}")))?;
        self.identify_captured(user_id, request, media).await
    }

    /// Identifies media the caller already recorded, e.g. a photo from the
    /// gallery, within the running session.
    pub async fn identify_media(
        &self,
        user_id: &str,
        media: CapturedMedia,
    ) -> EngineResult<ResultDisposition> {
        let request = self.prepare_manual_capture(user_id).await?;
        self.identify_captured(user_id, request, media).await
    }

    /// Pins a waypoint at the last recorded position. It is written together
    /// with the journey when the session ends.
    pub async fn add_waypoint(
        &self,
        user_id: &str,
        title: &str,
        description: Option<String>,
        icon: Option<String>,
    ) -> EngineResult<JourneyWaypoint> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("add a waypoint to", SessionPhase::Idle))?;
        let mut guard = slot.lock().await;
        let phase = guard.state.phase();
        let live = guard
            .state
            .live_mut()
            .ok_or_else(|| EngineError::transition("add a waypoint to", phase))?;

        let location = live.session.last_location().cloned().ok_or_else(|| {
            EngineError::LocationUnavailable("no position fix recorded yet".into())
        })?;
        let waypoint = JourneyWaypoint {
            id: Uuid::new_v4().to_string(),
            journey_id: live.session.id.clone(),
            location,
            title: title.to_string(),
            description,
            icon: icon.unwrap_or_else(|| DEFAULT_WAYPOINT_ICON.to_string()),
            timestamp: Utc::now(),
        };
        live.waypoints.push(waypoint.clone());
        Ok(waypoint)
    }

    pub async fn snapshot(&self, user_id: &str) -> Option<SessionSnapshot> {
        let slot = self.existing_slot(user_id).await?;
        let guard = slot.lock().await;
        snapshot_of(&guard.state, Utc::now())
    }

    pub async fn phase(&self, user_id: &str) -> SessionPhase {
        match self.existing_slot(user_id).await {
            Some(slot) => slot.lock().await.state.phase(),
            None => SessionPhase::Idle,
        }
    }

    async fn mark_locked(
        &self,
        user_id: &str,
        live: &mut LiveSession,
        live_id: &str,
    ) -> EngineResult<Detection> {
        if let MarkCheck::AlreadyMarked(detection_id) = live.session.buffer.check_markable(live_id)? {
            return live
                .session
                .detections()
                .iter()
                .find(|d| d.id == detection_id)
                .cloned()
                .ok_or(EngineError::UnknownDetection(detection_id));
        }
        if live.session.config.effective_listening_mode() == Some(ListeningMode::Passive) {
            return Err(EngineError::PassiveListening);
        }

        let consumes = consumes_trial(live.session.config.effective_listening_mode(), true);
        if consumes && !self.inner.deps.ledger.consume_credit().await? {
            log_warn!(
                "Trial credits exhausted; detection {live_id} stays unmarked in session {}",
                live.session.id
            );
            self.inner.events.emit(SessionEvent::QuotaExhausted {
                user_id: user_id.to_string(),
                session_id: live.session.id.clone(),
                live_id: live_id.to_string(),
            });
            return Err(EngineError::QuotaExhausted);
        }

        let detection = live.session.buffer.promote(live_id)?;
        if consumes {
            live.session.trials_used += 1;
        }
        live.aggregator.on_discovery(&detection);
        self.persist_discovery(&live.session.id, &detection).await;

        info!(
            "Saved detection {} ({}) in session {}",
            detection.id, detection.species_match.common_name, live.session.id
        );
        self.inner.events.emit(SessionEvent::DetectionSaved {
            user_id: user_id.to_string(),
            session_id: live.session.id.clone(),
            detection: detection.clone(),
            trial_consumed: consumes,
        });
        Ok(detection)
    }

    /// Write-through on mark. A failure is only logged: `end_session` writes
    /// every marked discovery again.
    async fn persist_discovery(&self, session_id: &str, detection: &Detection) {
        let discovery = Discovery::from_detection(detection, Some(session_id));
        if let Err(err) = self.inner.deps.store.save_discovery(&discovery).await {
            log_warn!(
                "Failed to save discovery {} (will retry at session end): {err:#}",
                discovery.id
            );
        }
    }

    async fn persist_end(&self, plan: &EndPlan) -> Result<()> {
        self.inner
            .deps
            .store
            .finish_journey(&plan.journey, &plan.discoveries, &plan.waypoints)
            .await
    }

    async fn prepare_manual_capture(&self, user_id: &str) -> EngineResult<ManualCapture> {
        let slot = self
            .existing_slot(user_id)
            .await
            .ok_or_else(|| EngineError::transition("capture in", SessionPhase::Idle))?;

        let (capture, over_time) = {
            let guard = slot.lock().await;
            let live = match &guard.state {
                SessionState::Active(live) => live,
                other => return Err(EngineError::transition("capture in", other.phase())),
            };
            let now = Utc::now();
            let chunk_duration = live
                .profile
                .unwrap_or_else(|| DetectionFrequency::default().profile())
                .chunk_duration();
            let capture = ManualCapture {
                mode: live.session.config.mode,
                listening_mode: live.session.config.effective_listening_mode(),
                request: CaptureRequest {
                    session_id: live.session.id.clone(),
                    sequence: guard.sequence.fetch_add(1, Ordering::SeqCst),
                    requested_at: now,
                    chunk_duration,
                },
            };
            (capture, live.max_duration_reached(now))
        };

        if over_time {
            self.end_session(user_id).await?;
            return Err(EngineError::transition("capture in", SessionPhase::Completed));
        }
        if consumes_trial(capture.listening_mode, true) && !self.inner.deps.ledger.can_identify().await
        {
            log_warn!("Refusing capture for user {user_id}: no trial credits left");
            return Err(EngineError::QuotaExhausted);
        }
        Ok(capture)
    }

    async fn identify_captured(
        &self,
        user_id: &str,
        capture: ManualCapture,
        media: CapturedMedia,
    ) -> EngineResult<ResultDisposition> {
        let timeout = self.inner.config.read().await.identify_timeout;
        let outcome = identify_with_timeout(
            self.inner.deps.identifier.as_ref(),
            &media,
            category_hint(capture.mode),
            timeout,
        )
        .await;

        self.on_identification_result(IdentificationResult {
            user_id: user_id.to_string(),
            session_id: capture.request.session_id,
            sequence: capture.request.sequence,
            requested_at: capture.request.requested_at,
            outcome,
            media: media.media,
            source: media.source,
            duration_ms: media.duration_ms,
        })
        .await
    }

    fn apply_effects(
        &self,
        user_id: &str,
        session_id: &str,
        slot: &mut SessionSlot,
        effects: Vec<Effect>,
    ) {
        for effect in effects {
            match effect {
                Effect::StartScheduler(profile) => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    slot.scheduler
                        .start(session_id.to_string(), profile, slot.sequence.clone(), tx);
                    if let Some(handle) = slot.capture_pump.take() {
                        handle.abort();
                    }
                    slot.capture_pump =
                        Some(tokio::spawn(self.clone().capture_pump(user_id.to_string(), rx)));
                }
                Effect::StopScheduler => {
                    slot.scheduler.stop();
                    if let Some(handle) = slot.capture_pump.take() {
                        handle.abort();
                    }
                }
                Effect::StartLocationUpdates => {
                    let Some(source) = self.inner.deps.location.clone() else {
                        continue;
                    };
                    match source.subscribe() {
                        Ok(rx) => {
                            if let Some(handle) = slot.location_pump.take() {
                                handle.abort();
                            }
                            slot.location_pump = Some(tokio::spawn(
                                self.clone().location_pump(user_id.to_string(), session_id.to_string(), rx),
                            ));
                        }
                        Err(err) => {
                            log_warn!("Location updates unavailable for session {session_id}: {err:#}");
                            self.inner.events.emit(SessionEvent::LocationUnavailable {
                                user_id: user_id.to_string(),
                                session_id: session_id.to_string(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
                Effect::StopLocationUpdates => {
                    if let Some(handle) = slot.location_pump.take() {
                        handle.abort();
                        if let Some(source) = &self.inner.deps.location {
                            source.unsubscribe();
                        }
                    }
                }
            }
        }
    }

    /// Drains scheduler ticks. Each tick becomes its own task so a slow
    /// identification never holds up the next capture.
    async fn capture_pump(self, user_id: String, mut rx: mpsc::UnboundedReceiver<CaptureRequest>) {
        while let Some(request) = rx.recv().await {
            if self.end_if_over_time(&user_id).await {
                break;
            }
            let controller = self.clone();
            let user_id = user_id.clone();
            tokio::spawn(async move { controller.run_capture(user_id, request).await });
        }
    }

    async fn run_capture(&self, user_id: String, request: CaptureRequest) {
        let Some(device) = self.inner.deps.media.clone() else {
            log_warn!("No capture device registered; skipping tick #{}", request.sequence);
            return;
        };
        let Some(mode) = self.session_mode(&user_id, &request.session_id).await else {
            return;
        };

        let media = match device.capture(mode, &request).await {
            Ok(media) => media,
            Err(err) => {
                log_error!("Capture #{} failed for session {}: {err:#}", request.sequence, request.session_id);
                return;
            }
        };

        let timeout = self.inner.config.read().await.identify_timeout;
        let outcome = identify_with_timeout(
            self.inner.deps.identifier.as_ref(),
            &media,
            category_hint(mode),
            timeout,
        )
        .await;

        let result = IdentificationResult {
            user_id,
            session_id: request.session_id,
            sequence: request.sequence,
            requested_at: request.requested_at,
            outcome,
            media: media.media,
            source: media.source,
            duration_ms: media.duration_ms,
        };
        if let Err(err) = self.on_identification_result(result).await {
            log_warn!("Could not route identification result: {err}");
        }
    }

    async fn location_pump(
        self,
        user_id: String,
        session_id: String,
        mut rx: mpsc::Receiver<LocationEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                LocationEvent::Fix(point) => {
                    self.on_location_sample(&user_id, point).await;
                }
                LocationEvent::Unavailable(reason) => {
                    log_warn!("Location unavailable for session {session_id}: {reason}");
                    self.inner.events.emit(SessionEvent::LocationUnavailable {
                        user_id: user_id.clone(),
                        session_id: session_id.clone(),
                        reason,
                    });
                }
            }
        }
        log_info!("Location stream closed for session {session_id}");
    }

    async fn session_mode(&self, user_id: &str, session_id: &str) -> Option<CaptureMode> {
        let slot = self.existing_slot(user_id).await?;
        let guard = slot.lock().await;
        guard
            .state
            .live()
            .filter(|live| live.session.id == session_id)
            .map(|live| live.session.config.mode)
    }

    async fn end_if_over_time(&self, user_id: &str) -> bool {
        let Some(slot) = self.existing_slot(user_id).await else {
            return true;
        };
        let over_time = slot
            .lock()
            .await
            .state
            .live()
            .is_some_and(|live| live.max_duration_reached(Utc::now()));
        if over_time {
            self.spawn_auto_end(user_id);
        }
        over_time
    }

    /// Ends the session from a separate task: the caller may be one of the
    /// session's own pumps, which ending aborts.
    fn spawn_auto_end(&self, user_id: &str) {
        let controller = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            match controller.end_session(&user_id).await {
                Ok(journey) => log_info!("Session {} reached its max duration", journey.id),
                Err(EngineError::InvalidTransition { .. }) => {}
                Err(err) => log_error!("Automatic end failed for user {user_id}: {err}"),
            }
        });
    }

    fn emit_state(&self, user_id: &str, session_id: &str, phase: SessionPhase) {
        self.inner.events.emit(SessionEvent::StateChanged {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            phase,
        });
    }

    fn emit_live(&self, user_id: &str, session_id: &str, detection: LiveDetection) {
        self.inner.events.emit(SessionEvent::LiveDetection {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            detection,
        });
    }

    async fn slot(&self, user_id: &str) -> Arc<Mutex<SessionSlot>> {
        self.inner
            .slots
            .lock()
            .await
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionSlot::new())))
            .clone()
    }

    async fn existing_slot(&self, user_id: &str) -> Option<Arc<Mutex<SessionSlot>>> {
        self.inner.slots.lock().await.get(user_id).cloned()
    }
}

struct ManualCapture {
    mode: CaptureMode,
    listening_mode: Option<ListeningMode>,
    request: CaptureRequest,
}

/// Automatic, non-passive sessions save confident results without a tap when
/// auto-save is on for the session or, failing that, in the user's settings.
fn auto_saves(config: &CaptureConfig, settings: &DetectionSettings) -> bool {
    config.operating_mode == OperatingMode::Automatic
        && config.effective_listening_mode() != Some(ListeningMode::Passive)
        && config.auto_save.unwrap_or(settings.auto_save)
}

fn snapshot_of(state: &SessionState, now: DateTime<Utc>) -> Option<SessionSnapshot> {
    match state {
        SessionState::Idle => None,
        SessionState::Active(live) | SessionState::Paused(live) => Some(SessionSnapshot {
            session_id: live.session.id.clone(),
            phase: state.phase(),
            started_at: live.session.start_time,
            stats: live.running_stats(now),
            live_detections: live.session.live_detections().to_vec(),
            trials_used: live.session.trials_used,
        }),
        SessionState::Completed {
            journey,
            trials_used,
        } => Some(SessionSnapshot {
            session_id: journey.id.clone(),
            phase: SessionPhase::Completed,
            started_at: journey.start_time,
            stats: journey.stats.clone(),
            live_detections: Vec::new(),
            trials_used: *trials_used,
        }),
        SessionState::Cancelled(session) => Some(SessionSnapshot {
            session_id: session.id.clone(),
            phase: SessionPhase::Cancelled,
            started_at: session.start_time,
            stats: crate::journey::session_stats(session, now),
            live_detections: session.live_detections().to_vec(),
            trials_used: session.trials_used,
        }),
    }
}
