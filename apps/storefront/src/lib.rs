//! # rifa-storefront
//!
//! Process plumbing shared by the `storefront` and `sale-hub` binaries:
//! logging setup, signal handling and config path resolution.

use std::path::{Path, PathBuf};

use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use rifa_sync::RaffleEvent;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,rifa=debug,sqlx=warn";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "RIFA_CONFIG";

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=rifa_sync=trace` - Trace the sync layer only (includes every event)
/// - Default: [`DEFAULT_LOG_FILTER`]
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .with_target(true)
        .init();
}

/// Config file from the first CLI argument, then `RIFA_CONFIG`.
///
/// `None` means the platform default location.
pub fn config_path(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    args.into_iter()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

/// Creates the directory that will hold the database file.
pub fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(?e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(?e, "Failed to install SIGTERM handler");
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

    info!("Shutdown signal received, starting graceful shutdown...");
}

/// One-line description of an event for the daemon log.
pub fn describe_event(event: &RaffleEvent) -> String {
    match event {
        RaffleEvent::SaleAdded { sale } => format!(
            "sale {}-{} {} ({})",
            sale.turma,
            sale.numero,
            sale.status,
            if sale.synced { "synced" } else { "local" }
        ),
        RaffleEvent::DataRefreshed { total, pending } => {
            format!("cache reloaded: {total} sales, {pending} pending")
        }
        RaffleEvent::RemoteSnapshotApplied { version, total } => {
            format!("snapshot v{version} merged: {total} sales")
        }
        RaffleEvent::SaleStatusUpdated {
            turma,
            numero,
            from,
            to,
            ..
        } => format!("{turma}-{numero}: {from} -> {to}"),
        RaffleEvent::SaleRemoved { turma, numero, .. } => format!("{turma}-{numero} removed"),
        RaffleEvent::NumberSold {
            turma,
            numero,
            status,
        } => format!("{turma}-{numero} is now {status}"),
        RaffleEvent::SaleRejected { sale, reason } => {
            format!("{}-{} rejected: {reason}", sale.turma, sale.numero)
        }
        RaffleEvent::ConnectionChanged { status } => format!("sale store {status:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rifa_core::{ConnectionStatus, SaleStatus};

    #[test]
    fn test_config_path_prefers_argument() {
        let args = vec!["storefront".to_string(), "/etc/rifa.toml".to_string()];
        assert_eq!(config_path(args), Some(PathBuf::from("/etc/rifa.toml")));
    }

    #[test]
    fn test_config_path_ignores_blank_argument() {
        let args = vec!["storefront".to_string(), "  ".to_string()];
        assert_eq!(config_path(args), None);
    }

    #[test]
    fn test_describe_event() {
        let sold = RaffleEvent::NumberSold {
            turma: "3A".into(),
            numero: 42,
            status: SaleStatus::Pago,
        };
        assert_eq!(describe_event(&sold), "3A-42 is now pago");

        let link = RaffleEvent::ConnectionChanged {
            status: ConnectionStatus::Offline,
        };
        assert_eq!(describe_event(&link), "sale store Offline");
    }
}
