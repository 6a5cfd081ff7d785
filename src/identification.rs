//! Boundary to the remote species identification service and to the capture
//! device that feeds it.

use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{CaptureMode, DetectionSource, MediaRef, SpeciesCategory, SpeciesMatch};

/// Boxed future for dyn-compatible async traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum IdentificationError {
    #[error("identification timed out after {0:?}")]
    Timeout(Duration),

    #[error("identification service quota exceeded")]
    QuotaExceeded,

    #[error("malformed identification response: {0}")]
    Malformed(String),

    #[error("identification service error: {0}")]
    Service(String),
}

/// Raw media handed to the identification service, plus where it is stored.
#[derive(Debug, Clone)]
pub struct CapturedMedia {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub media: MediaRef,
    pub source: DetectionSource,
    pub duration_ms: Option<u64>,
}

/// `Ok(None)` means the service answered but found nothing it recognised.
pub trait IdentificationService: Send + Sync {
    fn identify<'a>(
        &'a self,
        media: &'a CapturedMedia,
        category_hint: Option<SpeciesCategory>,
    ) -> BoxFuture<'a, Result<Option<SpeciesMatch>, IdentificationError>>;
}

/// Emitted by the scheduler once per tick.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub session_id: String,
    pub sequence: u64,
    pub requested_at: DateTime<Utc>,
    pub chunk_duration: Duration,
}

/// Camera/microphone access. Records one chunk per request.
pub trait MediaCapture: Send + Sync {
    fn capture<'a>(
        &'a self,
        mode: CaptureMode,
        request: &'a CaptureRequest,
    ) -> BoxFuture<'a, anyhow::Result<CapturedMedia>>;
}

/// One completed identification call, tagged with the capture that produced it
/// so it can be routed even when calls finish out of order.
#[derive(Debug, Clone)]
pub struct IdentificationResult {
    pub user_id: String,
    pub session_id: String,
    pub sequence: u64,
    pub requested_at: DateTime<Utc>,
    pub outcome: Result<Option<SpeciesMatch>, IdentificationError>,
    pub media: MediaRef,
    pub source: DetectionSource,
    pub duration_ms: Option<u64>,
}

/// Audio-only sessions are almost always birdsong; camera captures carry no hint.
pub fn category_hint(mode: CaptureMode) -> Option<SpeciesCategory> {
    match mode {
        CaptureMode::Listen => Some(SpeciesCategory::Bird),
        CaptureMode::Camera | CaptureMode::Both => None,
    }
}

pub async fn identify_with_timeout(
    service: &dyn IdentificationService,
    media: &CapturedMedia,
    category_hint: Option<SpeciesCategory>,
    timeout: Duration,
) -> Result<Option<SpeciesMatch>, IdentificationError> {
    match tokio::time::timeout(timeout, service.identify(media, category_hint)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(IdentificationError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NeverAnswers;

    impl IdentificationService for NeverAnswers {
        fn identify<'a>(
            &'a self,
            _media: &'a CapturedMedia,
            _category_hint: Option<SpeciesCategory>,
        ) -> BoxFuture<'a, Result<Option<SpeciesMatch>, IdentificationError>> {
            Box::pin(std::future::pending::<
                Result<Option<SpeciesMatch>, IdentificationError>,
            >())
        }
    }

    fn clip() -> CapturedMedia {
        CapturedMedia {
            bytes: vec![0; 16],
            mime_type: "audio/wav".into(),
            media: MediaRef::audio("file:///clip.wav"),
            source: DetectionSource::Audio,
            duration_ms: Some(10_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out() {
        let outcome =
            identify_with_timeout(&NeverAnswers, &clip(), None, Duration::from_secs(20)).await;
        assert_eq!(
            outcome,
            Err(IdentificationError::Timeout(Duration::from_secs(20)))
        );
    }

    #[test]
    fn listen_mode_hints_birds() {
        assert_eq!(category_hint(CaptureMode::Listen), Some(SpeciesCategory::Bird));
        assert_eq!(category_hint(CaptureMode::Both), None);
    }
}
