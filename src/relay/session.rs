//! Connection session
//!
//! Owns the single connection to the worker: ensures the worker runs,
//! resolves its endpoint, sends the one-time init message and then drains the
//! outbound queues until shut down. Failures reconnect with backoff until the
//! retry budget runs out.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::connection::{Connector, WorkerConnection};
use super::queue::OutboundQueues;
use crate::config::SessionConfig;
use crate::error::{Result, RelayError};
use crate::models::{RenderPayload, WireMessage};
use crate::worker::{Resolver, Supervisor, WorkerStatus};

/// Allowed connect/send failures for one session; never increases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    failures: u32,
}

impl RetryBudget {
    pub fn new(budget: u32) -> Self {
        Self {
            remaining: budget,
            failures: 0,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Charge one failure and return what is left
    pub fn consume(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.failures += 1;
        self.remaining
    }
}

/// Message to send first on the next successful connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingInit {
    /// Engine warm-up; resent on reconnect until a render payload is attempted
    Init,
    /// Render payload whose send was attempted last
    Payload(RenderPayload),
    Empty,
}

impl PendingInit {
    pub fn message(&self) -> Option<WireMessage> {
        match self {
            PendingInit::Init => Some(WireMessage::Init),
            PendingInit::Payload(payload) => Some(WireMessage::Render(payload.clone())),
            PendingInit::Empty => None,
        }
    }
}

/// Lifecycle of a session, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Initializing,
    Draining,
    Reconnecting,
    Closed,
    Failed,
}

pub struct Session {
    id: Uuid,
    supervisor: Arc<Supervisor>,
    resolver: Resolver,
    connector: Arc<dyn Connector>,
    queues: Arc<OutboundQueues>,
    status: Arc<WorkerStatus>,
    config: SessionConfig,
    budget: RetryBudget,
    pending: PendingInit,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(
        supervisor: Arc<Supervisor>,
        resolver: Resolver,
        connector: Arc<dyn Connector>,
        queues: Arc<OutboundQueues>,
        status: Arc<WorkerStatus>,
        config: SessionConfig,
    ) -> Self {
        let budget = RetryBudget::new(config.retry_budget);
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            id: Uuid::new_v4(),
            supervisor,
            resolver,
            connector,
            queues,
            status,
            config,
            budget,
            pending: PendingInit::Init,
            state_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` flips to true (Ok) or the session fails (Err).
    ///
    /// Only fatal errors are returned; everything else is retried.
    #[instrument(skip_all, fields(session_id = %self.id))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(budget = self.budget.remaining(), "Starting plot relay session");

        if self.budget.is_exhausted() {
            self.set_state(SessionState::Failed);
            error!("Retry budget is empty, not connecting");
            return Err(RelayError::RetryBudgetExhausted { attempts: 0 });
        }

        let mut force_refresh = false;
        loop {
            let err = match self.connect_and_drain(force_refresh, &mut shutdown).await {
                Ok(()) => {
                    self.set_state(SessionState::Closed);
                    info!("Plot relay session closed");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    self.set_state(SessionState::Failed);
                    self.status.set_running(false);
                    error!("Plot relay session failed: {}", e);
                    return Err(e);
                }
                Err(e) => e,
            };

            self.status.set_running(false);
            let remaining = self.budget.consume();
            if remaining == 0 {
                self.set_state(SessionState::Failed);
                error!(
                    "Connection to plot worker failed: {}. Giving up after {} attempts",
                    err,
                    self.budget.failures()
                );
                return Err(RelayError::RetryBudgetExhausted {
                    attempts: self.budget.failures(),
                });
            }

            self.set_state(SessionState::Reconnecting);
            let delay = backoff_delay(&self.config, self.budget.failures());
            warn!(
                "Connection to plot worker failed: {}. Retrying in {:?} ({} attempts left)",
                err, delay, remaining
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    self.set_state(SessionState::Closed);
                    return Ok(());
                }
            }

            // The worker may have restarted on a new endpoint
            force_refresh = true;
        }
    }

    async fn connect_and_drain(
        &mut self,
        force_refresh: bool,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        self.set_state(SessionState::Connecting);
        self.supervisor.ensure_running().await?;
        let endpoint = self.resolver.resolve_endpoint(force_refresh).await?;

        let mut connection = self
            .connector
            .connect(&endpoint, self.config.connect_timeout)
            .await?;
        self.status.set_running(true);
        info!(%endpoint, "Connected to plot worker");

        self.set_state(SessionState::Initializing);
        if let Some(message) = self.pending.message() {
            self.send(connection.as_mut(), &message).await?;
            // Init stays pending until a render payload replaces it
            if matches!(self.pending, PendingInit::Payload(_)) {
                self.queues.mark_settled();
                self.pending = PendingInit::Empty;
            }
        }

        self.set_state(SessionState::Draining);
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let mut worked = false;

            if let Some(payload) = self.queues.pop_render() {
                // Kept until delivered so a reconnect can resend it
                self.pending = PendingInit::Payload(payload.clone());
                self.send(connection.as_mut(), &WireMessage::Render(payload))
                    .await?;
                self.pending = PendingInit::Empty;
                self.queues.mark_settled();
                worked = true;
            }

            if let Some(reference) = self.queues.pop_dashboard() {
                let sent = self
                    .send(connection.as_mut(), &WireMessage::Dashboard(reference))
                    .await;
                // Dashboards are not retained across reconnects
                self.queues.mark_settled();
                sent?;
                worked = true;
            }

            if worked {
                continue;
            }

            tokio::select! {
                _ = sleep(self.config.poll_interval) => {}
                event = connection.next_event() => event?,
                _ = shutdown.wait_for(|stop| *stop) => return Ok(()),
            }
        }
    }

    async fn send(&self, connection: &mut dyn WorkerConnection, message: &WireMessage) -> Result<()> {
        let text = message.encode()?;
        timeout(self.config.op_timeout, connection.send_text(text))
            .await
            .map_err(|_| RelayError::Timeout)??;
        debug!(kind = message.kind(), "Sent message to plot worker");
        Ok(())
    }

    fn set_state(&self, state: SessionState) {
        self.state_tx.send_replace(state);
    }
}

/// Exponential backoff with up to 25% jitter, capped at `backoff_max`
fn backoff_delay(config: &SessionConfig, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    let delay = config
        .backoff_base
        .saturating_mul(1u32 << exponent)
        .min(config.backoff_max);
    let factor = rand::thread_rng().gen_range(0.75..=1.0);
    delay.mul_f64(factor)
}
