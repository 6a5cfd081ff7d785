//! Capture-session and journey-tracking engine for nature walks.
//!
//! [`Engine::open`] wires the SQLite journal, the JSON settings file and the
//! trial ledger to a [`CaptureSessionController`]. Hosts supply the
//! identification service and, optionally, a capture device and a location
//! source.

pub mod capture;
pub mod db;
pub mod error;
pub mod geo;
pub mod identification;
pub mod journey;
pub mod location;
pub mod models;
pub mod persistence;
pub mod settings;
pub mod trial;
mod utils;

#[cfg(test)]
mod test_support;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};

pub use capture::{
    CaptureSessionController, ControllerConfig, ControllerDeps, ResultDisposition,
    SessionEvent, SessionPhase, SessionSnapshot,
};
pub use db::Database;
pub use error::{EngineError, EngineResult};
pub use identification::{IdentificationService, MediaCapture};
pub use location::LocationSource;
pub use settings::{DetectionSettings, SettingsStore};
pub use trial::TrialLedger;

const DATABASE_FILE: &str = "fieldwalk.sqlite3";
const SETTINGS_FILE: &str = "settings.json";

/// Installs the `env_logger` backend. `RUST_LOG` overrides the `info`
/// default. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Everything a host needs to run walks for its users.
#[derive(Clone)]
pub struct Engine {
    db: Database,
    settings: Arc<SettingsStore>,
    controller: CaptureSessionController,
}

impl Engine {
    pub async fn open(
        data_dir: &Path,
        identifier: Arc<dyn IdentificationService>,
        media: Option<Arc<dyn MediaCapture>>,
        location: Option<Arc<dyn LocationSource>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let db = Database::new(data_dir.join(DATABASE_FILE))?;

        // Walks that were running when the process died never wrote a
        // journey; keep their paid discoveries as standalone ones.
        let detached = db
            .detach_orphaned_discoveries()
            .await
            .context("failed to recover discoveries from interrupted walks")?;
        if detached > 0 {
            warn!("Recovered {detached} discoveries from interrupted walks as standalone");
        }

        let settings = Arc::new(SettingsStore::new(data_dir.join(SETTINGS_FILE))?);
        let ledger = TrialLedger::new(settings.clone());
        let config = ControllerConfig {
            detection: settings.detection()?,
            ..ControllerConfig::default()
        };

        let controller = CaptureSessionController::new(
            ControllerDeps {
                ledger,
                store: Arc::new(db.clone()),
                identifier,
                media,
                location,
            },
            config,
        );

        info!("Fieldwalk engine ready in {}", data_dir.display());

        Ok(Self {
            db,
            settings,
            controller,
        })
    }

    pub fn controller(&self) -> &CaptureSessionController {
        &self.controller
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn ledger(&self) -> &TrialLedger {
        self.controller.ledger()
    }

    pub fn detection_settings(&self) -> Result<DetectionSettings> {
        self.settings.detection()
    }

    /// Persists the settings, then applies them to results that arrive from
    /// now on. Running sessions keep their scheduler frequency.
    pub async fn update_detection_settings(&self, detection: DetectionSettings) -> Result<()> {
        self.settings.update_detection(detection.clone())?;
        self.controller.set_detection_settings(detection).await;
        Ok(())
    }
}
