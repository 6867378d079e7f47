//! Worker endpoint resolution

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use super::status::WorkerStatus;
use super::supervisor::Supervisor;
use crate::config::ResolverConfig;
use crate::error::{Result, RelayError};
use crate::models::Endpoint;
use crate::repository::EndpointStore;

/// Finds the endpoint of the running worker, respawning it when needed
pub struct Resolver {
    store: Arc<dyn EndpointStore>,
    supervisor: Arc<Supervisor>,
    status: Arc<WorkerStatus>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        store: Arc<dyn EndpointStore>,
        supervisor: Arc<Supervisor>,
        status: Arc<WorkerStatus>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            supervisor,
            status,
            config,
        }
    }

    /// Resolve the worker endpoint.
    ///
    /// With `force_refresh` the persisted endpoint is not trusted on the first
    /// attempt; the worker is re-checked after the grace period instead.
    #[instrument(skip(self))]
    pub async fn resolve_endpoint(&self, force_refresh: bool) -> Result<Endpoint> {
        let mut respawned = false;

        for attempt in 1..=self.config.max_attempts {
            if !(force_refresh && attempt == 1) {
                if let Some(endpoint) = self.store.load_endpoint()? {
                    debug!(%endpoint, attempt, "Resolved worker endpoint");
                    return Ok(endpoint);
                }
            }

            // Give a just-spawned worker time to publish its endpoint
            sleep(self.config.grace_period).await;

            match self.store.load_pid()?.map(|record| record.pid) {
                Some(pid) if self.supervisor.is_worker_alive(pid) => {}
                Some(pid) if respawned && !self.supervisor.process_exists(pid) => {
                    warn!(pid, "Respawned worker is gone");
                    return Err(RelayError::WorkerVanished { pid });
                }
                recorded => {
                    info!(pid = ?recorded, attempt, "Worker not running, respawning");
                    self.status.set_running(false);
                    self.supervisor.ensure_running().await?;
                    respawned = true;
                }
            }

            if let Some(endpoint) = self.store.load_endpoint()? {
                debug!(%endpoint, attempt, "Resolved worker endpoint");
                return Ok(endpoint);
            }
            debug!(attempt, "Worker endpoint not published yet");
        }

        Err(RelayError::EndpointUnresolved {
            attempts: self.config.max_attempts,
        })
    }
}
