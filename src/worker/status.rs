//! Shared worker/session state token

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// State shared by the facade, supervisor and session
#[derive(Debug, Default)]
pub struct WorkerStatus {
    running: AtomicBool,
    ever_confirmed: AtomicBool,
    fatal: Mutex<Option<String>>,
}

impl WorkerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether the worker is currently confirmed running
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            self.ever_confirmed.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a worker was confirmed running at any point in this process
    pub fn was_ever_confirmed(&self) -> bool {
        self.ever_confirmed.load(Ordering::SeqCst)
    }

    /// Record a fatal session failure; the first reason wins
    pub fn mark_fatal(&self, reason: impl Into<String>) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            *fatal = Some(reason.into());
        }
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal.lock().clone()
    }
}
