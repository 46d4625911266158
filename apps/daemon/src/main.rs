mod config;

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use ftpwatch_engine::Engine;
use ftpwatch_file_log::FileLog;
use ftpwatch_transfer::{FtpSettings, FtpTransfer, Transfer};

use config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ftpwatch=debug")),
        )
        .init();

    let cfg = DaemonConfig::load().unwrap_or_default();
    if cfg.host.is_empty() || cfg.monitored_folder.as_os_str().is_empty() {
        anyhow::bail!(
            "config incomplete: set host and monitored_folder in {}",
            cfg.path().display()
        );
    }

    let log = Arc::new(FileLog::open(config::file_log_path()?));
    let mut transfer = FtpTransfer::open(FtpSettings {
        host: cfg.host.clone(),
        port: cfg.port,
        username: cfg.username.clone(),
        password: cfg.password.clone(),
    });
    if !transfer.connect() {
        warn!("initial FTP connection failed, uploads will reconnect on demand");
    }

    let mut engine = Engine::start(log, transfer, cfg.monitored_folder.clone(), None)
        .context("starting sync engine")?;

    if let Some(mut progress) = engine.take_progress() {
        tokio::spawn(async move {
            while let Some(event) = progress.recv().await {
                debug!(
                    file = %event.filename,
                    sent = event.bytes_sent,
                    total = event.total_bytes,
                    "upload progress"
                );
            }
        });
    }

    info!(
        folder = %cfg.monitored_folder.display(),
        host = %cfg.host,
        port = cfg.port,
        "ftpwatch running, Ctrl-C to stop"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    engine.stop().await;
    Ok(())
}
