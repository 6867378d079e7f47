//! Plot Relay - Entry Point
//!
//! Sends figure files or dashboard references to the rendering worker, and
//! hosts the helper that delivers the client-exit notice.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tokio::runtime::Handle;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plot_relay::models::{RenderPayload, ShutdownReason};
use plot_relay::relay::{send_shutdown_notice_best_effort, NOTIFY_EXIT_CODE};
use plot_relay::repository::FileEndpointStore;
use plot_relay::{Config, RelayFacade};

#[derive(Parser)]
#[command(name = "plot-relay", version, about = "Send plots to the rendering worker")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render figure JSON files
    Render {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// How long to wait for delivery before giving up
        #[arg(long, default_value_t = 30_000)]
        flush_timeout_ms: u64,
    },
    /// Open dashboards by reference
    Dashboard {
        #[arg(required = true)]
        references: Vec<String>,
        #[arg(long, default_value_t = 30_000)]
        flush_timeout_ms: u64,
    },
    /// Deliver a client-exit notice to the worker
    #[command(name = "notify-shutdown", hide = true)]
    NotifyShutdown {
        #[arg(long)]
        state_dir: PathBuf,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    match cli.command {
        Command::Render {
            files,
            flush_timeout_ms,
        } => {
            let mut payloads = Vec::with_capacity(files.len());
            for file in &files {
                let json = tokio::fs::read_to_string(file)
                    .await
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                // Checked here, forwarded byte for byte
                serde_json::from_str::<serde::de::IgnoredAny>(&json)
                    .with_context(|| format!("{} is not valid JSON", file.display()))?;
                payloads.push(RenderPayload::from_json(json));
            }

            let facade = RelayFacade::new(config, Handle::current());
            for payload in payloads {
                facade.enqueue_render(payload)?;
            }
            deliver(&facade, Duration::from_millis(flush_timeout_ms)).await
        }
        Command::Dashboard {
            references,
            flush_timeout_ms,
        } => {
            let facade = RelayFacade::new(config, Handle::current());
            for reference in references {
                facade.enqueue_dashboard(reference)?;
            }
            deliver(&facade, Duration::from_millis(flush_timeout_ms)).await
        }
        Command::NotifyShutdown {
            state_dir,
            reason,
            delay_ms,
        } => {
            let reason = ShutdownReason::from_str(&reason)
                .ok_or_else(|| anyhow!("Unknown shutdown reason: {}", reason))?;
            let store = FileEndpointStore::new(state_dir);
            send_shutdown_notice_best_effort(
                &store,
                reason,
                Duration::from_millis(delay_ms),
                config.session.connect_timeout,
            )
            .await;
            std::process::exit(NOTIFY_EXIT_CODE);
        }
    }
}

/// Flush the facade, then stop it; Ctrl+C or SIGTERM cuts the wait short
async fn deliver(facade: &RelayFacade, limit: Duration) -> anyhow::Result<()> {
    let _guard = facade.shutdown_guard();

    let flushed = tokio::select! {
        result = facade.flush(limit) => result,
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            Ok(())
        }
    };

    facade.shutdown().await;
    if let Err(e) = &flushed {
        warn!("Not everything was delivered: {}", e);
    }
    flushed.context("Plot delivery failed")
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("plot_relay={}", config.log.level).into());

    // Logs go to stderr so stdout stays free for the worker in debug mode
    if config.log.format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
