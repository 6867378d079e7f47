//! Plot Relay - out-of-process plot rendering client
//!
//! Hands plot render requests from a client process to a long-lived rendering
//! worker over a local WebSocket.
//!
//! ## Features
//!
//! - Spawns the worker on demand and reuses it across client processes
//! - Discovers the worker's endpoint from a shared state directory
//! - Ordered, non-blocking delivery of render payloads and dashboards
//! - Reconnects with backoff under a bounded retry budget
//! - Tells the worker when its client exits

pub mod config;
pub mod error;
pub mod models;
pub mod relay;
pub mod repository;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{RelayError, Result};
pub use relay::RelayFacade;
