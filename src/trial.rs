use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    error::{EngineError, EngineResult},
    models::{ListeningMode, TrialState},
};

/// Durable backing for the trial counter.
pub trait TrialStore: Send + Sync {
    fn read(&self) -> Result<TrialState>;
    fn write(&self, remaining: u32, first_use: Option<DateTime<Utc>>) -> Result<()>;
}

/// Passive listening never costs a credit; everything else costs one per
/// marked detection. Manual captures arrive here already marked.
pub fn consumes_trial(listening_mode: Option<ListeningMode>, marked: bool) -> bool {
    match listening_mode {
        Some(ListeningMode::Passive) => false,
        _ => marked,
    }
}

/// Process-wide credit ledger. Cloning shares the same counter.
///
/// The async mutex is held across the whole read-decrement-write so two
/// concurrent marks can never both see the last credit.
#[derive(Clone)]
pub struct TrialLedger {
    store: Arc<dyn TrialStore>,
    gate: Arc<Mutex<()>>,
}

impl TrialLedger {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self {
            store,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub async fn state(&self) -> EngineResult<TrialState> {
        let _guard = self.gate.lock().await;
        self.store.read().map_err(EngineError::PersistenceFailed)
    }

    pub async fn can_identify(&self) -> bool {
        match self.state().await {
            Ok(state) => state.can_identify(),
            Err(err) => {
                warn!("Trial ledger unreadable, refusing identification: {err}");
                false
            }
        }
    }

    /// Returns `Ok(false)` without writing when the balance is already zero.
    pub async fn consume_credit(&self) -> EngineResult<bool> {
        let _guard = self.gate.lock().await;
        let state = self.store.read().map_err(EngineError::PersistenceFailed)?;
        if state.remaining_credits == 0 {
            return Ok(false);
        }

        let remaining = state.remaining_credits - 1;
        let first_use = state.first_use_timestamp.or_else(|| Some(Utc::now()));
        self.store
            .write(remaining, first_use)
            .map_err(EngineError::PersistenceFailed)?;

        info!(
            "Trial credit consumed ({remaining}/{} remaining)",
            state.max_credits
        );
        Ok(true)
    }
}

/// Non-durable store, for tests and for hosts that keep the ledger elsewhere.
#[derive(Default)]
pub struct InMemoryTrialStore {
    state: StdMutex<TrialState>,
}

impl InMemoryTrialStore {
    pub fn with_credits(remaining: u32) -> Self {
        Self {
            state: StdMutex::new(TrialState {
                remaining_credits: remaining,
                ..TrialState::default()
            }),
        }
    }
}

impl TrialStore for InMemoryTrialStore {
    fn read(&self) -> Result<TrialState> {
        self.state
            .lock()
            .map(|state| *state)
            .map_err(|_| anyhow!("trial state lock poisoned"))
    }

    fn write(&self, remaining: u32, first_use: Option<DateTime<Utc>>) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("trial state lock poisoned"))?;
        state.remaining_credits = remaining;
        state.first_use_timestamp = first_use;
        Ok(())
    }
}
