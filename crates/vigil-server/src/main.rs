//! # vigil
//!
//! Gateway binary: loads settings, opens the telemetry store and serves
//! observers until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use vigil_core::logging::init_subscriber;
use vigil_server::server::{VigilServer, open_store};
use vigil_settings::{VigilSettings, load_settings_from_path, settings_path};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Real-time telemetry streaming gateway.
#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Real-time telemetry streaming gateway")]
struct Cli {
    /// Settings file (defaults to `~/.vigil/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the `SQLite` telemetry database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Do not write events to the telemetry database.
    #[arg(long)]
    no_persistence: bool,

    /// Log filter, e.g. `info` or `vigil_stream=debug`.
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds to wait for background tasks on shutdown.
    #[arg(long, default_value = "10")]
    shutdown_timeout: u64,
}

impl Cli {
    /// Flags override the settings file and environment.
    fn apply(&self, settings: &mut VigilSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(path) = &self.db_path {
            settings.persistence.db_path = path.to_string_lossy().into_owned();
        }
        if self.no_persistence {
            settings.persistence.enabled = false;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        let _ = settings.validate();
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(settings = %path.display(), "starting vigil");

    let metrics_handle =
        vigil_server::metrics::install_recorder().context("Failed to install metrics recorder")?;

    if settings.persistence.enabled {
        ensure_parent_dir(Path::new(&settings.persistence.db_path))?;
    }
    let store = open_store(&settings.persistence).context("Failed to open telemetry store")?;

    let server = VigilServer::new(settings, store, Some(metrics_handle));
    let running = server.listen().await.context("Failed to start server")?;
    tracing::info!(addr = %running.local_addr(), "ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown requested");
    running
        .stop(Some(Duration::from_secs(cli.shutdown_timeout)))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_settings() {
        let cli = Cli::parse_from([
            "vigil",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--db-path",
            "/tmp/v.db",
            "--log-level",
            "debug",
        ]);
        let mut settings = VigilSettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.persistence.db_path, "/tmp/v.db");
        assert!(settings.persistence.enabled);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn no_persistence_flag_disables_store() {
        let cli = Cli::parse_from(["vigil", "--no-persistence"]);
        let mut settings = VigilSettings::default();
        cli.apply(&mut settings);
        assert!(!settings.persistence.enabled);
        assert_eq!(cli.shutdown_timeout, 10);
    }

    #[test]
    fn absent_flags_keep_settings() {
        let cli = Cli::parse_from(["vigil"]);
        let mut settings = VigilSettings::default();
        let before = settings.clone();
        cli.apply(&mut settings);
        assert_eq!(settings, before);
    }

    #[test]
    fn parent_dir_created() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("vigil.db");
        ensure_parent_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
        ensure_parent_dir(Path::new("vigil.db")).unwrap();
    }
}
