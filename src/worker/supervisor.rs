//! Worker process supervision
//!
//! Confirms that the recorded worker is alive, or starts a new one.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::ChildStdin;
use tracing::{debug, info, instrument, warn};

use super::process::{ProcessTable, WorkerLauncher};
use super::status::WorkerStatus;
use crate::error::Result;
use crate::models::PidRecord;
use crate::repository::EndpointStore;

/// Starts the rendering worker on demand and recognises it in the process table
pub struct Supervisor {
    store: Arc<dyn EndpointStore>,
    processes: Arc<dyn ProcessTable>,
    launcher: Arc<dyn WorkerLauncher>,
    status: Arc<WorkerStatus>,
    /// Path expected on the worker's command line
    signature: PathBuf,
    stdin: Mutex<Option<ChildStdin>>,
    spawn_lock: tokio::sync::Mutex<()>,
}

impl Supervisor {
    pub fn new(
        store: Arc<dyn EndpointStore>,
        processes: Arc<dyn ProcessTable>,
        launcher: Arc<dyn WorkerLauncher>,
        status: Arc<WorkerStatus>,
        signature: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            processes,
            launcher,
            status,
            signature: signature.into(),
            stdin: Mutex::new(None),
            spawn_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Make sure a worker is running.
    ///
    /// Returns `true` if a new worker was started, `false` if the recorded one
    /// is still alive. Does not wait for the worker to publish its endpoint.
    #[instrument(skip(self))]
    pub async fn ensure_running(&self) -> Result<bool> {
        let _guard = self.spawn_lock.lock().await;

        if let Some(record) = self.store.load_pid()? {
            if self.is_worker_alive(record.pid) {
                debug!(pid = record.pid, "Worker already running");
                self.status.set_running(true);
                return Ok(false);
            }
            info!(pid = record.pid, "Recorded worker is not running");
        }

        self.spawn().await?;
        Ok(true)
    }

    /// Whether `pid` is a live process running the worker executable
    pub fn is_worker_alive(&self, pid: u32) -> bool {
        match self.processes.lookup(pid) {
            Some(info) => info.alive && self.matches_signature(&info.cmd),
            None => false,
        }
    }

    /// Whether `pid` exists in the process table at all
    pub fn process_exists(&self, pid: u32) -> bool {
        self.processes.lookup(pid).is_some_and(|info| info.alive)
    }

    fn matches_signature(&self, cmd: &[String]) -> bool {
        let bare_name = self.signature.parent().map_or(true, |p| p.as_os_str().is_empty());

        cmd.iter().any(|arg| {
            let arg = Path::new(arg);
            if bare_name {
                arg.file_name() == self.signature.file_name()
            } else {
                arg == self.signature
            }
        })
    }

    async fn spawn(&self) -> Result<()> {
        // A dead worker's endpoint must not be mistaken for the new one's
        self.store.clear_endpoint()?;

        let launched = self.launcher.launch().await?;
        if let Err(e) = self.store.save_pid(&PidRecord::now(launched.pid)) {
            // Unrecorded, it would never be found again
            warn!(pid = launched.pid, "Failed to record worker pid, killing it: {}", e);
            if !self.processes.kill(launched.pid) {
                warn!(pid = launched.pid, "Worker could not be killed");
            }
            return Err(e);
        }
        *self.stdin.lock() = launched.stdin;
        self.status.set_running(true);

        info!(pid = launched.pid, "Started plot worker");
        Ok(())
    }
}
