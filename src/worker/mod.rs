//! Rendering worker lifecycle
//!
//! This module provides:
//! - Process table inspection and worker launching
//! - The supervisor that keeps one worker alive
//! - Endpoint resolution with bounded respawn attempts

pub mod process;
pub mod resolver;
pub mod status;
pub mod supervisor;

pub use process::{
    CommandLauncher, LaunchedWorker, ProcessInfo, ProcessTable, SystemProcessTable,
    WorkerLauncher,
};
pub use resolver::Resolver;
pub use status::WorkerStatus;
pub use supervisor::Supervisor;
