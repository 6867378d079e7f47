use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Endpoint, PidRecord, WorkerHandle};

/// Record names shared with the worker
pub mod keys {
    pub const WORKER_PID: &str = "worker_pid";
    pub const WORKER_ENDPOINT: &str = "worker_endpoint";
}

/// Durable location of the rendering worker
///
/// A missing record is the normal "worker not yet known" state and is
/// reported as `Ok(None)`.
pub trait EndpointStore: Send + Sync {
    fn save_pid(&self, record: &PidRecord) -> Result<()>;

    fn load_pid(&self) -> Result<Option<PidRecord>>;

    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    fn load_endpoint(&self) -> Result<Option<Endpoint>>;

    /// Forget the published endpoint (before a new worker is spawned)
    fn clear_endpoint(&self) -> Result<()>;

    /// Both records together; `None` until a pid has been recorded
    fn load_handle(&self) -> Result<Option<WorkerHandle>> {
        let Some(record) = self.load_pid()? else {
            return Ok(None);
        };
        Ok(Some(WorkerHandle {
            pid: record.pid,
            endpoint: self.load_endpoint()?,
        }))
    }
}

/// Store keeping one JSON file per record in a state directory
#[derive(Debug, Clone)]
pub struct FileEndpointStore {
    dir: PathBuf,
}

impl FileEndpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// Write to a temp file in the same directory, then rename into place
    fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let mut file = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut file, value)?;
        file.flush()?;
        file.persist(self.record_path(key))
            .map_err(|e| e.error)?;
        debug!("Saved {} record", key);
        Ok(())
    }

    fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let path = self.record_path(key);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Ignoring unreadable {} record at {}: {}", key, path.display(), e);
                Ok(None)
            }
        }
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.record_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl EndpointStore for FileEndpointStore {
    fn save_pid(&self, record: &PidRecord) -> Result<()> {
        self.save(keys::WORKER_PID, record)
    }

    fn load_pid(&self) -> Result<Option<PidRecord>> {
        self.load(keys::WORKER_PID)
    }

    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        self.save(keys::WORKER_ENDPOINT, endpoint)
    }

    fn load_endpoint(&self) -> Result<Option<Endpoint>> {
        self.load(keys::WORKER_ENDPOINT)
    }

    fn clear_endpoint(&self) -> Result<()> {
        self.remove(keys::WORKER_ENDPOINT)
    }
}

/// In-process store for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryEndpointStore {
    pid: Mutex<Option<PidRecord>>,
    endpoint: Mutex<Option<Endpoint>>,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointStore for MemoryEndpointStore {
    fn save_pid(&self, record: &PidRecord) -> Result<()> {
        *self.pid.lock() = Some(record.clone());
        Ok(())
    }

    fn load_pid(&self) -> Result<Option<PidRecord>> {
        Ok(self.pid.lock().clone())
    }

    fn save_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        *self.endpoint.lock() = Some(endpoint.clone());
        Ok(())
    }

    fn load_endpoint(&self) -> Result<Option<Endpoint>> {
        Ok(self.endpoint.lock().clone())
    }

    fn clear_endpoint(&self) -> Result<()> {
        *self.endpoint.lock() = None;
        Ok(())
    }
}
