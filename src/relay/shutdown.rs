//! Client-exit notification
//!
//! When a client process goes away it tells the worker, so the worker can
//! decide to exit once its last client is gone. The notice is sent from a
//! separate helper process because the exiting process may already be tearing
//! down its runtime.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::connection::{WorkerConnection, WsConnector};
use crate::config::Config;
use crate::error::{Result, RelayError};
use crate::models::{ClientKind, ShutdownReason, WireMessage};
use crate::repository::EndpointStore;
use crate::worker::WorkerStatus;

/// Exit status of the helper process after delivering its notice
pub const NOTIFY_EXIT_CODE: i32 = 1;

/// Subcommand of the relay binary that delivers the notice
pub const NOTIFY_SUBCOMMAND: &str = "notify-shutdown";

/// Fires the exit notice at most once per process
pub struct ShutdownNotifier {
    status: Arc<WorkerStatus>,
    state_dir: PathBuf,
    kind: ClientKind,
    script_exit_delay: Duration,
    helper: Option<PathBuf>,
    fired: AtomicBool,
}

impl ShutdownNotifier {
    pub fn new(config: &Config, status: Arc<WorkerStatus>) -> Self {
        Self {
            status,
            state_dir: config.store.state_dir.clone(),
            kind: config.client.kind,
            script_exit_delay: config.client.script_exit_delay,
            helper: None,
            fired: AtomicBool::new(false),
        }
    }

    /// Use a specific helper executable instead of the current one
    pub fn with_helper(mut self, helper: impl Into<PathBuf>) -> Self {
        self.helper = Some(helper.into());
        self
    }

    pub fn reason(&self) -> ShutdownReason {
        self.kind.shutdown_reason()
    }

    /// Arguments passed to the helper process
    pub fn helper_args(&self) -> Vec<String> {
        let delay = match self.kind {
            ClientKind::Interactive => Duration::ZERO,
            ClientKind::Script => self.script_exit_delay,
        };

        vec![
            NOTIFY_SUBCOMMAND.to_string(),
            "--state-dir".to_string(),
            self.state_dir.display().to_string(),
            "--reason".to_string(),
            self.reason().as_str().to_string(),
            "--delay-ms".to_string(),
            delay.as_millis().to_string(),
        ]
    }

    /// Spawn the helper, best effort.
    ///
    /// Does nothing if no worker was ever confirmed running or the notice was
    /// already sent. Returns whether a helper was started.
    pub fn notify(&self) -> bool {
        if !self.status.was_ever_confirmed() {
            debug!("No plot worker was used, skipping shutdown notice");
            return false;
        }
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        let helper = match self.helper.clone().or_else(|| std::env::current_exe().ok()) {
            Some(helper) => helper,
            None => {
                debug!("No helper executable for shutdown notice");
                return false;
            }
        };

        let mut command = Command::new(&helper);
        command
            .args(self.helper_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        match command.spawn() {
            Ok(child) => {
                info!(pid = child.id(), reason = %self.reason(), "Sent shutdown notice helper");
                true
            }
            Err(e) => {
                debug!("Shutdown notice helper not started: {}", e);
                false
            }
        }
    }
}

/// Runs the notifier when dropped
pub struct ShutdownGuard {
    notifier: Arc<ShutdownNotifier>,
}

impl ShutdownGuard {
    pub fn new(notifier: Arc<ShutdownNotifier>) -> Self {
        Self { notifier }
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.notifier.notify();
    }
}

/// Deliver a shutdown reason over a fresh short-lived connection
///
/// This is the body of the helper process.
pub async fn send_shutdown_notice(
    store: &dyn EndpointStore,
    reason: ShutdownReason,
    delay: Duration,
    connect_timeout: Duration,
) -> Result<()> {
    if !delay.is_zero() {
        sleep(delay).await;
    }

    let handle = store.load_handle()?.ok_or(RelayError::EndpointNotFound)?;
    let endpoint = handle.endpoint.ok_or(RelayError::EndpointNotFound)?;
    let mut connection = WsConnector::open(&endpoint, connect_timeout).await?;
    connection
        .send_text(WireMessage::Shutdown(reason).encode()?)
        .await?;
    connection.close().await;

    info!(pid = handle.pid, %endpoint, %reason, "Delivered shutdown notice");
    Ok(())
}

/// Like [`send_shutdown_notice`], but failures are only logged
pub async fn send_shutdown_notice_best_effort(
    store: &dyn EndpointStore,
    reason: ShutdownReason,
    delay: Duration,
    connect_timeout: Duration,
) {
    if let Err(e) = send_shutdown_notice(store, reason, delay, connect_timeout).await {
        warn!("Shutdown notice not delivered: {}", e);
    }
}
