use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{Detection, Journey, JourneyStats, LiveDetection};

use super::state::SessionPhase;

pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Notifications for whatever renders the session. Sending never blocks and
/// is a no-op without subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    StateChanged {
        user_id: String,
        session_id: String,
        phase: SessionPhase,
    },
    LiveDetection {
        user_id: String,
        session_id: String,
        detection: LiveDetection,
    },
    DetectionSaved {
        user_id: String,
        session_id: String,
        detection: Detection,
        trial_consumed: bool,
    },
    IdentificationFailed {
        user_id: String,
        session_id: String,
        live_id: String,
        message: String,
    },
    QuotaExhausted {
        user_id: String,
        session_id: String,
        live_id: String,
    },
    LocationUnavailable {
        user_id: String,
        session_id: String,
        reason: String,
    },
    StatsUpdated {
        user_id: String,
        session_id: String,
        stats: JourneyStats,
    },
    SessionCompleted {
        user_id: String,
        journey: Journey,
    },
}

impl SessionEvent {
    pub fn user_id(&self) -> &str {
        match self {
            SessionEvent::StateChanged { user_id, .. }
            | SessionEvent::LiveDetection { user_id, .. }
            | SessionEvent::DetectionSaved { user_id, .. }
            | SessionEvent::IdentificationFailed { user_id, .. }
            | SessionEvent::QuotaExhausted { user_id, .. }
            | SessionEvent::LocationUnavailable { user_id, .. }
            | SessionEvent::StatsUpdated { user_id, .. }
            | SessionEvent::SessionCompleted { user_id, .. } => user_id,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
