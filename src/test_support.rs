//! In-memory doubles for the engine's collaborators.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use anyhow::{bail, Result};

use crate::{
    identification::{
        BoxFuture, CaptureRequest, CapturedMedia, IdentificationError, IdentificationService,
        MediaCapture,
    },
    models::{
        CaptureMode, DetectionSource, Discovery, Journey, JourneyWaypoint, MediaRef,
        SpeciesCategory, SpeciesMatch,
    },
    persistence::JourneyStore,
};

#[derive(Default)]
pub struct MemoryStore {
    journeys: Mutex<HashMap<String, Journey>>,
    discoveries: Mutex<HashMap<String, Discovery>>,
    waypoints: Mutex<HashMap<String, JourneyWaypoint>>,
    fail_writes: AtomicBool,
    fail_waypoints: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fails waypoint writes only, so a finish breaks after the journey row.
    pub fn set_fail_waypoints(&self, fail: bool) {
        self.fail_waypoints.store(fail, Ordering::SeqCst);
    }

    pub fn journey_count(&self) -> usize {
        self.journeys.lock().unwrap().len()
    }

    pub fn discovery(&self, id: &str) -> Option<Discovery> {
        self.discoveries.lock().unwrap().get(id).cloned()
    }

    pub fn discovery_count(&self) -> usize {
        self.discoveries.lock().unwrap().len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        Ok(())
    }
}

impl JourneyStore for MemoryStore {
    fn save_journey<'a>(&'a self, journey: &'a Journey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_writable()?;
            self.journeys
                .lock()
                .unwrap()
                .insert(journey.id.clone(), journey.clone());
            Ok(())
        })
    }

    fn save_discovery<'a>(&'a self, discovery: &'a Discovery) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_writable()?;
            self.discoveries
                .lock()
                .unwrap()
                .insert(discovery.id.clone(), discovery.clone());
            Ok(())
        })
    }

    fn save_waypoint<'a>(&'a self, waypoint: &'a JourneyWaypoint) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.check_writable()?;
            if self.fail_waypoints.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            self.waypoints
                .lock()
                .unwrap()
                .insert(waypoint.id.clone(), waypoint.clone());
            Ok(())
        })
    }

    fn get_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Journey>>> {
        Box::pin(async move { Ok(self.journeys.lock().unwrap().get(id).cloned()) })
    }

    fn get_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<Discovery>>> {
        Box::pin(async move { Ok(self.discovery(id)) })
    }

    fn get_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<JourneyWaypoint>>> {
        Box::pin(async move { Ok(self.waypoints.lock().unwrap().get(id).cloned()) })
    }

    fn list_journeys_by_user<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, Result<Vec<Journey>>> {
        Box::pin(async move {
            let mut journeys: Vec<Journey> = self
                .journeys
                .lock()
                .unwrap()
                .values()
                .filter(|j| j.user_id == user_id)
                .cloned()
                .collect();
            journeys.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            Ok(journeys)
        })
    }

    fn list_discoveries_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Discovery>>> {
        Box::pin(async move {
            let mut discoveries: Vec<Discovery> = self
                .discoveries
                .lock()
                .unwrap()
                .values()
                .filter(|d| d.journey_id.as_deref() == Some(journey_id))
                .cloned()
                .collect();
            discoveries.sort_by_key(|d| d.timestamp);
            Ok(discoveries)
        })
    }

    fn list_waypoints_for_journey<'a>(
        &'a self,
        journey_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<JourneyWaypoint>>> {
        Box::pin(async move {
            let mut waypoints: Vec<JourneyWaypoint> = self
                .waypoints
                .lock()
                .unwrap()
                .values()
                .filter(|w| w.journey_id == journey_id)
                .cloned()
                .collect();
            waypoints.sort_by_key(|w| w.timestamp);
            Ok(waypoints)
        })
    }

    fn delete_journey<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.waypoints.lock().unwrap().retain(|_, w| w.journey_id != id);
            Ok(self.journeys.lock().unwrap().remove(id).is_some())
        })
    }

    fn delete_discovery<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.discoveries.lock().unwrap().remove(id).is_some()) })
    }

    fn delete_waypoint<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.waypoints.lock().unwrap().remove(id).is_some()) })
    }

    fn detach_discoveries<'a>(&'a self, journey_id: &'a str) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            self.check_writable()?;
            let mut detached = 0;
            for discovery in self.discoveries.lock().unwrap().values_mut() {
                if discovery.journey_id.as_deref() == Some(journey_id) {
                    discovery.journey_id = None;
                    detached += 1;
                }
            }
            Ok(detached)
        })
    }
}

type Outcome = Result<Option<SpeciesMatch>, IdentificationError>;

/// Answers from a script, then falls back to a fixed answer. Calls can be
/// given a latency, in call order.
pub struct StubIdentifier {
    script: Mutex<VecDeque<Outcome>>,
    latencies: Mutex<VecDeque<Duration>>,
    fallback: Outcome,
    calls: AtomicUsize,
}

impl StubIdentifier {
    pub fn always(species: SpeciesMatch) -> Self {
        Self::scripted(Vec::new(), Ok(Some(species)))
    }

    pub fn scripted(script: Vec<Outcome>, fallback: Outcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            latencies: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_latencies(self, latencies: Vec<Duration>) -> Self {
        *self.latencies.lock().unwrap() = latencies.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl IdentificationService for StubIdentifier {
    fn identify<'a>(
        &'a self,
        _media: &'a CapturedMedia,
        _category_hint: Option<SpeciesCategory>,
    ) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            let latency = self.latencies.lock().unwrap().pop_front();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }
            next.unwrap_or_else(|| self.fallback.clone())
        })
    }
}

/// Capture device that fabricates a chunk per request.
#[derive(Default)]
pub struct ScriptedMedia;

impl MediaCapture for ScriptedMedia {
    fn capture<'a>(
        &'a self,
        mode: CaptureMode,
        request: &'a CaptureRequest,
    ) -> BoxFuture<'a, Result<CapturedMedia>> {
        Box::pin(async move { Ok(media_for(mode, request.sequence)) })
    }
}

pub fn media_for(mode: CaptureMode, sequence: u64) -> CapturedMedia {
    let (media, source, mime_type) = match mode {
        CaptureMode::Listen => (
            MediaRef::audio(&format!("file:///chunk-{sequence}.wav")),
            DetectionSource::Audio,
            "audio/wav",
        ),
        CaptureMode::Camera => (
            MediaRef::image(&format!("file:///photo-{sequence}.jpg")),
            DetectionSource::Camera,
            "image/jpeg",
        ),
        CaptureMode::Both => (
            MediaRef {
                image_uri: Some(format!("file:///photo-{sequence}.jpg")),
                audio_uri: Some(format!("file:///chunk-{sequence}.wav")),
                video_uri: None,
            },
            DetectionSource::Both,
            "image/jpeg",
        ),
    };
    CapturedMedia {
        bytes: vec![0u8; 32],
        mime_type: mime_type.to_string(),
        media,
        source,
        duration_ms: Some(10_000),
    }
}

pub fn robin(confidence: f64) -> SpeciesMatch {
    SpeciesMatch::new(
        "European Robin",
        "Erithacus rubecula",
        SpeciesCategory::Bird,
        confidence,
    )
}
