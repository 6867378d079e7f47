//! Caller-facing relay
//!
//! Enqueues render payloads and dashboard references and keeps exactly one
//! session alive in the background to deliver them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::connection::{Connector, WsConnector};
use super::queue::OutboundQueues;
use super::session::Session;
use super::shutdown::{ShutdownGuard, ShutdownNotifier};
use crate::config::Config;
use crate::error::{Result, RelayError};
use crate::models::RenderPayload;
use crate::repository::{EndpointStore, FileEndpointStore};
use crate::worker::{
    CommandLauncher, ProcessTable, Resolver, Supervisor, SystemProcessTable, WorkerLauncher,
    WorkerStatus,
};

/// How long `shutdown` waits for the session task to finish
const SESSION_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

struct ActiveSession {
    handle: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
}

impl ActiveSession {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.handle.is_finished()
    }
}

/// Entry point for callers; construct once and share
pub struct RelayFacade {
    config: Config,
    store: Arc<dyn EndpointStore>,
    supervisor: Arc<Supervisor>,
    connector: Arc<dyn Connector>,
    status: Arc<WorkerStatus>,
    queues: Arc<OutboundQueues>,
    notifier: Arc<ShutdownNotifier>,
    runtime: Handle,
    active: Mutex<Option<ActiveSession>>,
    closed: AtomicBool,
    sessions_started: AtomicU64,
}

impl RelayFacade {
    /// Relay using the configured worker executable and state directory
    pub fn new(config: Config, runtime: Handle) -> Self {
        let store: Arc<dyn EndpointStore> =
            Arc::new(FileEndpointStore::new(config.store.state_dir.clone()));
        let processes: Arc<dyn ProcessTable> = Arc::new(SystemProcessTable::new());
        let launcher: Arc<dyn WorkerLauncher> = Arc::new(CommandLauncher::new(
            config.worker.clone(),
            config.store.state_dir.clone(),
        ));
        let status = Arc::new(WorkerStatus::new());
        let notifier = Arc::new(ShutdownNotifier::new(&config, status.clone()));

        Self::from_parts(
            config,
            store,
            processes,
            launcher,
            Arc::new(WsConnector),
            status,
            notifier,
            runtime,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: Config,
        store: Arc<dyn EndpointStore>,
        processes: Arc<dyn ProcessTable>,
        launcher: Arc<dyn WorkerLauncher>,
        connector: Arc<dyn Connector>,
        status: Arc<WorkerStatus>,
        notifier: Arc<ShutdownNotifier>,
        runtime: Handle,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(
            store.clone(),
            processes,
            launcher,
            status.clone(),
            config.worker.executable.clone(),
        ));

        Self {
            config,
            store,
            supervisor,
            connector,
            status,
            queues: Arc::new(OutboundQueues::new()),
            notifier,
            runtime,
            active: Mutex::new(None),
            closed: AtomicBool::new(false),
            sessions_started: AtomicU64::new(0),
        }
    }

    /// Queue a render payload for delivery.
    ///
    /// Never blocks on the worker. Fails only if the relay is unavailable.
    pub fn enqueue_render(&self, payload: RenderPayload) -> Result<()> {
        self.ensure_session()?;
        self.queues.push_render(payload);
        Ok(())
    }

    /// Queue a dashboard reference for delivery
    pub fn enqueue_dashboard(&self, reference: impl Into<String>) -> Result<()> {
        self.ensure_session()?;
        self.queues.push_dashboard(reference.into());
        Ok(())
    }

    /// Wait until everything enqueued so far was delivered or dropped
    pub async fn flush(&self, limit: Duration) -> Result<()> {
        let poll = self.config.session.poll_interval.max(Duration::from_millis(1));

        let wait = async {
            loop {
                if self.queues.is_settled() {
                    return Ok(());
                }
                if let Some(reason) = self.status.fatal() {
                    return Err(RelayError::RelayUnavailable { reason });
                }
                sleep(poll).await;
            }
        };

        match timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    renders = self.queues.queued_renders(),
                    dashboards = self.queues.queued_dashboards(),
                    "Flush timed out with traffic still queued"
                );
                Err(RelayError::Timeout)
            }
        }
    }

    /// Stop the session and send the exit notice.
    ///
    /// After this every enqueue fails with `RelayUnavailable`.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let active = self.active.lock().take();
        if let Some(active) = active {
            let _ = active.shutdown_tx.send(true);
            match timeout(SESSION_JOIN_TIMEOUT, active.handle).await {
                Ok(_) => debug!("Plot relay session stopped"),
                Err(_) => warn!("Plot relay session did not stop in time"),
            }
        }

        self.notifier.notify();
    }

    /// Drop guard that sends the exit notice at scope end
    pub fn shutdown_guard(&self) -> ShutdownGuard {
        ShutdownGuard::new(self.notifier.clone())
    }

    /// Whether a fatal error ended the relay
    pub fn is_failed(&self) -> bool {
        self.status.fatal().is_some()
    }

    pub fn is_session_alive(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(ActiveSession::is_alive)
    }

    pub fn sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::SeqCst)
    }

    fn unavailable(&self) -> Option<RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Some(RelayError::RelayUnavailable {
                reason: "relay was shut down".to_string(),
            });
        }
        self.status
            .fatal()
            .map(|reason| RelayError::RelayUnavailable { reason })
    }

    fn ensure_session(&self) -> Result<()> {
        let mut active = self.active.lock();

        if let Some(err) = self.unavailable() {
            return Err(err);
        }
        if active.as_ref().is_some_and(ActiveSession::is_alive) {
            return Ok(());
        }

        if active.is_some() {
            info!("Plot relay session is gone, starting a new one");
        }
        *active = Some(self.start_session());
        Ok(())
    }

    fn start_session(&self) -> ActiveSession {
        let resolver = Resolver::new(
            self.store.clone(),
            self.supervisor.clone(),
            self.status.clone(),
            self.config.resolver.clone(),
        );
        let session = Session::new(
            self.supervisor.clone(),
            resolver,
            self.connector.clone(),
            self.queues.clone(),
            self.status.clone(),
            self.config.session.clone(),
        );
        let session_id = session.id();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alive = Arc::new(AtomicBool::new(true));
        let status = self.status.clone();
        let alive_flag = alive.clone();

        let handle = self.runtime.spawn(async move {
            if let Err(e) = session.run(shutdown_rx).await {
                error!(%session_id, "Plot relay unavailable: {}", e);
                status.mark_fatal(e.to_string());
            }
            alive_flag.store(false, Ordering::SeqCst);
        });

        self.sessions_started.fetch_add(1, Ordering::SeqCst);
        debug!(%session_id, "Started plot relay session");

        ActiveSession {
            handle,
            alive,
            shutdown_tx,
        }
    }
}
