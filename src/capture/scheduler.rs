use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use chrono::Utc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{identification::CaptureRequest, models::FrequencyProfile};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Periodic capture trigger for one automatic session. Emits a
/// [`CaptureRequest`] every `interval`, starting immediately.
pub struct CaptureScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Restarts the loop if one is already running.
    pub fn start(
        &mut self,
        session_id: String,
        profile: FrequencyProfile,
        sequence: Arc<AtomicU64>,
        tx: mpsc::UnboundedSender<CaptureRequest>,
    ) {
        self.stop();

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(schedule_loop(
            session_id,
            profile,
            sequence,
            tx,
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
    }

    /// Safe to call in any state, any number of times.
    pub fn stop(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for CaptureScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CaptureScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn schedule_loop(
    session_id: String,
    profile: FrequencyProfile,
    sequence: Arc<AtomicU64>,
    tx: mpsc::UnboundedSender<CaptureRequest>,
    cancel_token: CancellationToken,
) {
    let mut ticker = time::interval(profile.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!(
        "capture scheduler started for session {} ({}ms interval, {}ms chunks)",
        session_id,
        profile.interval_ms,
        profile.chunk_duration_ms
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("capture scheduler shutting down for session {}", session_id);
                break;
            }
            _ = ticker.tick() => {
                let request = CaptureRequest {
                    session_id: session_id.clone(),
                    sequence: sequence.fetch_add(1, Ordering::SeqCst),
                    requested_at: Utc::now(),
                    chunk_duration: profile.chunk_duration(),
                };
                log_debug!("capture tick #{} for session {}", request.sequence, session_id);
                if tx.send(request).is_err() {
                    log_warn!("capture receiver dropped, stopping scheduler for session {}", session_id);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DetectionFrequency;
    use std::time::Duration;

    fn drain(rx: &mut mpsc::UnboundedReceiver<CaptureRequest>) -> Vec<CaptureRequest> {
        let mut out = Vec::new();
        while let Ok(request) = rx.try_recv() {
            out.push(request);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn balanced_profile_ticks_every_ten_seconds() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new();
        scheduler.start(
            "s1".into(),
            DetectionFrequency::Balanced.profile(),
            Arc::new(AtomicU64::new(0)),
            tx,
        );

        time::sleep(Duration::from_millis(25_000)).await;
        scheduler.stop();

        let requests = drain(&mut rx);
        assert_eq!(requests.len(), 3);
        let sequences: Vec<u64> = requests.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert!(requests
            .iter()
            .all(|r| r.chunk_duration == Duration::from_secs(10) && r.session_id == "s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_silences_ticks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = CaptureScheduler::new();
        scheduler.stop();

        scheduler.start(
            "s1".into(),
            DetectionFrequency::High.profile(),
            Arc::new(AtomicU64::new(0)),
            tx,
        );
        time::sleep(Duration::from_millis(1)).await;
        scheduler.stop();
        scheduler.stop();
        assert!(!scheduler.is_running());

        let before = drain(&mut rx).len();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(before, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_continues_sequence() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequence = Arc::new(AtomicU64::new(0));
        let mut scheduler = CaptureScheduler::new();
        let profile = DetectionFrequency::BatterySaver.profile();

        scheduler.start("s1".into(), profile, sequence.clone(), tx.clone());
        time::sleep(Duration::from_millis(1)).await;
        scheduler.start("s1".into(), profile, sequence.clone(), tx);
        time::sleep(Duration::from_millis(1)).await;
        scheduler.stop();

        let sequences: Vec<u64> = drain(&mut rx).iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
    }
}
