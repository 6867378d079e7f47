use serde::Serialize;
use std::path::Path;

use crate::error::Result;

/// Opaque, already-serialized chart payload
///
/// The relay never inspects the contents; the serialized form is sent to the
/// worker as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderPayload(String);

impl RenderPayload {
    /// Wrap a payload that is already serialized
    pub fn from_json(json: impl Into<String>) -> Self {
        Self(json.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Reason tag sent to the worker when a client goes away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The interactive front-end exited
    InteractiveExit,
    /// A script client exited
    ScriptExit,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::InteractiveExit => "isterminal",
            ShutdownReason::ScriptExit => "isatty",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "isterminal" => Some(ShutdownReason::InteractiveExit),
            "isatty" => Some(ShutdownReason::ScriptExit),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of process using the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Interactive,
    Script,
}

impl ClientKind {
    /// Interactive when argv[0]'s file stem is the front-end's name
    pub fn detect(argv0: &str, frontend: &str) -> Self {
        let stem = Path::new(argv0)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        if !frontend.is_empty() && stem == frontend {
            ClientKind::Interactive
        } else {
            ClientKind::Script
        }
    }

    pub fn shutdown_reason(&self) -> ShutdownReason {
        match self {
            ClientKind::Interactive => ShutdownReason::InteractiveExit,
            ClientKind::Script => ShutdownReason::ScriptExit,
        }
    }
}

#[derive(Serialize)]
struct DashboardEnvelope<'a> {
    dashboard: &'a str,
}

/// Frames sent to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// One-time engine warm-up
    Init,
    Render(RenderPayload),
    Dashboard(String),
    Shutdown(ShutdownReason),
}

impl WireMessage {
    pub const INIT: &'static str = "init";

    /// Text frame for this message
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            WireMessage::Init => Self::INIT.to_string(),
            WireMessage::Render(payload) => payload.as_str().to_string(),
            WireMessage::Dashboard(reference) => serde_json::to_string(&DashboardEnvelope {
                dashboard: reference,
            })?,
            WireMessage::Shutdown(reason) => reason.as_str().to_string(),
        };
        Ok(text)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WireMessage::Init => "init",
            WireMessage::Render(_) => "render",
            WireMessage::Dashboard(_) => "dashboard",
            WireMessage::Shutdown(_) => "shutdown",
        }
    }
}
