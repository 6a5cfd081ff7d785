use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "fieldwalk-db";

/// A unit of work for the journal thread. It owns its reply channel.
type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Close,
}

/// Owns the request queue and the worker. Dropping the last handle closes
/// the connection after every queued job has run.
struct Worker {
    requests: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(db_path: PathBuf) -> Result<Self> {
        let (requests, inbox) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || match open_journal(&db_path) {
                Ok(mut conn) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        serve(&mut conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn journal worker thread")?;

        ready_rx
            .recv()
            .context("journal worker exited before it was ready")??;

        Ok(Self {
            requests,
            thread: Mutex::new(Some(thread)),
        })
    }

    fn submit(&self, job: Job) -> Result<()> {
        self.requests
            .send(Request::Run(job))
            .map_err(|_| anyhow!("journal worker is no longer running"))
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return;
        };

        if self.requests.send(Request::Close).is_err() {
            warn!("Journal worker already stopped");
        }
        if handle.join().is_err() {
            error!("Journal worker panicked");
        }
    }
}

/// Opens the file, switches on WAL and foreign keys, and brings the schema
/// up to date. Pragma failures are logged; a failed migration is fatal.
fn open_journal(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open journal at {}", path.display()))?;

    for (pragma, value) in [("journal_mode", "WAL"), ("foreign_keys", "ON")] {
        if let Err(err) = conn.pragma_update(None, pragma, value) {
            error!("Failed to set {pragma}={value}: {err}");
        }
    }

    run_migrations(&mut conn).context("failed to run journal migrations")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, inbox: mpsc::Receiver<Request>) {
    for request in inbox {
        match request {
            Request::Run(job) => job(&mut *conn),
            Request::Close => break,
        }
    }
    info!("Journal worker stopped");
}

/// Handle to the walk journal. Every statement runs on one worker thread
/// that owns the connection; clones share that worker.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create journal directory {}", parent.display())
            })?;
        }

        let worker = Worker::spawn(db_path.clone())?;
        info!("Journal opened at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(worker),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the worker thread and waits for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.worker.submit(Box::new(move |conn| {
            // The caller may have been cancelled; the work is done either way.
            let _ = reply_tx.send(task(conn));
        }))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("journal worker dropped the request"))?
    }

    /// Like `execute`, inside one transaction. The transaction commits only
    /// when `task` returns `Ok`; any error rolls every statement back.
    pub async fn execute_tx<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let value = task(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}
