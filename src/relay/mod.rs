//! Plot relay
//!
//! This module provides:
//! - Outbound render/dashboard queues
//! - The connection session that drains them onto the worker connection
//! - The facade callers enqueue through
//! - The client-exit notice sent to the worker

pub mod connection;
pub mod facade;
pub mod queue;
pub mod session;
pub mod shutdown;

pub use connection::{Connector, WorkerConnection, WsConnection, WsConnector};
pub use facade::RelayFacade;
pub use queue::OutboundQueues;
pub use session::{PendingInit, RetryBudget, Session, SessionState};
pub use shutdown::{
    send_shutdown_notice, send_shutdown_notice_best_effort, ShutdownGuard, ShutdownNotifier,
    NOTIFY_EXIT_CODE, NOTIFY_SUBCOMMAND,
};
