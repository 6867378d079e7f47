use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

/// Address at which the worker accepts WebSocket connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Local endpoint on the loopback interface
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// WebSocket URL for this endpoint
    pub fn ws_url(&self) -> Result<Url> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let url = Url::parse(&format!("ws://{}:{}", host, self.port))?;
        Ok(url)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Persisted worker process identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidRecord {
    pub pid: u32,
    pub recorded_at: DateTime<Utc>,
}

impl PidRecord {
    pub fn now(pid: u32) -> Self {
        Self {
            pid,
            recorded_at: Utc::now(),
        }
    }
}

/// Last known worker location, as read back from the endpoint store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub pid: u32,
    pub endpoint: Option<Endpoint>,
}
