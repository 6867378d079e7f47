use crate::error::{Result, RelayError};
use crate::models::ClientKind;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Directory holding the worker records; also exported to spawned workers
pub const STATE_DIR_ENV: &str = "PLOT_RELAY_STATE_DIR";

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker process configuration
    pub worker: WorkerConfig,
    /// Connection session configuration
    pub session: SessionConfig,
    /// Endpoint resolver configuration
    pub resolver: ResolverConfig,
    /// Endpoint store configuration
    pub store: StoreConfig,
    /// Client identity and shutdown behaviour
    pub client: ClientConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker executable; its path is also the signature looked for in the
    /// process table
    pub executable: PathBuf,
    /// Extra arguments passed to the worker
    pub args: Vec<String>,
    /// Leave the worker's standard streams inherited (DEBUG)
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Allowed consecutive connect/send failures per session
    pub retry_budget: u32,
    /// Timeout for opening the WebSocket connection
    pub connect_timeout: Duration,
    /// Idle timeout for a single send
    pub op_timeout: Duration,
    /// Sleep between drain iterations that found no work
    pub poll_interval: Duration,
    /// First reconnect delay
    pub backoff_base: Duration,
    /// Upper bound for the reconnect delay
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Time given to a freshly spawned worker to publish its endpoint
    pub grace_period: Duration,
    /// Maximum resolve attempts before giving up
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the pid and endpoint records
    pub state_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interactive front-end or script client
    pub kind: ClientKind,
    /// Delay before a script client's shutdown notice is delivered
    pub script_exit_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            connect_timeout: Duration::from_secs(6),
            op_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(100),
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            max_attempts: 10,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = SessionConfig::default();
        let resolver_defaults = ResolverConfig::default();

        Ok(Config {
            worker: WorkerConfig {
                executable: PathBuf::from(get_env_or("PLOT_WORKER_EXECUTABLE", "plot-worker")),
                args: get_env_or("PLOT_WORKER_ARGS", "")
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                debug: is_truthy(&get_env_or("DEBUG", "")),
            },
            session: SessionConfig {
                retry_budget: parse_env("PLOT_RELAY_RETRY_BUDGET", defaults.retry_budget)?,
                connect_timeout: parse_millis(
                    "PLOT_RELAY_CONNECT_TIMEOUT_MS",
                    defaults.connect_timeout,
                )?,
                op_timeout: parse_millis("PLOT_RELAY_OP_TIMEOUT_MS", defaults.op_timeout)?,
                poll_interval: parse_millis(
                    "PLOT_RELAY_POLL_INTERVAL_MS",
                    defaults.poll_interval,
                )?,
                backoff_base: parse_millis("PLOT_RELAY_BACKOFF_BASE_MS", defaults.backoff_base)?,
                backoff_max: parse_millis("PLOT_RELAY_BACKOFF_MAX_MS", defaults.backoff_max)?,
            },
            resolver: ResolverConfig {
                grace_period: parse_millis(
                    "PLOT_RELAY_GRACE_PERIOD_MS",
                    resolver_defaults.grace_period,
                )?,
                max_attempts: parse_env(
                    "PLOT_RELAY_RESOLVE_ATTEMPTS",
                    resolver_defaults.max_attempts,
                )?
                .max(1),
            },
            store: StoreConfig {
                state_dir: match env::var(STATE_DIR_ENV) {
                    Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
                    _ => default_state_dir(),
                },
            },
            client: ClientConfig {
                kind: parse_client_kind()?,
                script_exit_delay: parse_millis(
                    "PLOT_RELAY_SCRIPT_EXIT_DELAY_MS",
                    Duration::from_secs(2),
                )?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }
}

fn parse_client_kind() -> Result<ClientKind> {
    let raw = get_env_or("PLOT_RELAY_CLIENT", "");
    match raw.trim().to_lowercase().as_str() {
        "" | "auto" => {
            let frontend = get_env_or("PLOT_RELAY_FRONTEND", "terminal");
            let argv0 = env::args().next().unwrap_or_default();
            Ok(ClientKind::detect(&argv0, &frontend))
        }
        "interactive" | "terminal" => Ok(ClientKind::Interactive),
        "script" => Ok(ClientKind::Script),
        other => Err(RelayError::InvalidConfig(format!(
            "PLOT_RELAY_CLIENT must be interactive, script or auto, got {}",
            other
        ))),
    }
}

fn default_state_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("plot-relay")
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| RelayError::InvalidConfig(format!("{} must be a valid number", key))),
        _ => Ok(default),
    }
}

fn parse_millis(key: &str, default: Duration) -> Result<Duration> {
    let millis = parse_env(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Boolean-like environment values: 1, true, yes, on
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
