//! Process table inspection and worker launching

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, System, UpdateKind};
use tokio::process::{ChildStdin, Command};
use tracing::{debug, instrument};

use crate::config::{WorkerConfig, STATE_DIR_ENV};
use crate::error::{Result, RelayError};

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

/// Snapshot of one process table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub cmd: Vec<String>,
    /// False for zombie or dead entries
    pub alive: bool,
}

/// Read access to the live process table
pub trait ProcessTable: Send + Sync {
    /// Look up a process by id; `None` if no such process exists
    fn lookup(&self, pid: u32) -> Option<ProcessInfo>;

    /// Kill a process; returns whether the signal was delivered
    fn kill(&self, pid: u32) -> bool;
}

/// Process table backed by the operating system
pub struct SystemProcessTable {
    system: Mutex<System>,
}

impl SystemProcessTable {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for SystemProcessTable {
    fn lookup(&self, pid: u32) -> Option<ProcessInfo> {
        let mut system = self.system.lock();
        let sys_pid = Pid::from_u32(pid);

        // The command line is needed to tell our worker from a reused pid
        let refresh = ProcessRefreshKind::new().with_cmd(UpdateKind::Always);
        if !system.refresh_process_specifics(sys_pid, refresh) {
            return None;
        }

        let process = system.process(sys_pid)?;
        let alive = !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead);

        Some(ProcessInfo {
            pid,
            cmd: process.cmd().to_vec(),
            alive,
        })
    }

    fn kill(&self, pid: u32) -> bool {
        let mut system = self.system.lock();
        let sys_pid = Pid::from_u32(pid);

        if !system.refresh_process_specifics(sys_pid, ProcessRefreshKind::new()) {
            return false;
        }
        system.process(sys_pid).is_some_and(|process| process.kill())
    }
}

/// A freshly started worker process
#[derive(Debug)]
pub struct LaunchedWorker {
    pub pid: u32,
    /// Piped stdin, kept open for later instructions
    pub stdin: Option<ChildStdin>,
}

/// Starts worker processes
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self) -> Result<LaunchedWorker>;
}

/// Launches the configured worker executable, detached from our process group
///
/// The worker learns where to publish its endpoint from `PLOT_RELAY_STATE_DIR`.
pub struct CommandLauncher {
    config: WorkerConfig,
    state_dir: PathBuf,
}

impl CommandLauncher {
    pub fn new(config: WorkerConfig, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            state_dir: state_dir.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.executable);
        command
            .args(&self.config.args)
            .env(STATE_DIR_ENV, &self.state_dir);

        if self.config.debug {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        } else {
            command
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        }

        // Terminal signals sent to our foreground group must not reach the worker
        #[cfg(unix)]
        command.process_group(0);
        #[cfg(windows)]
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);

        command.kill_on_drop(false);
        command
    }
}

#[async_trait]
impl WorkerLauncher for CommandLauncher {
    #[instrument(skip(self), fields(executable = %self.config.executable.display()))]
    async fn launch(&self) -> Result<LaunchedWorker> {
        let mut child = self.command().spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => RelayError::WorkerExecutableMissing(self.config.executable.clone()),
            _ => RelayError::SpawnFailed(e.to_string()),
        })?;

        let pid = child
            .id()
            .ok_or_else(|| RelayError::SpawnFailed("worker exited immediately".to_string()))?;
        let stdin = child.stdin.take();

        debug!(pid, debug = self.config.debug, "Worker process launched");
        Ok(LaunchedWorker { pid, stdin })
    }
}
