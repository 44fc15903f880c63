use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use rtmirror_logging::{ConsoleTarget, MirrorSubscriberBuilder};
use rtmirror_server::app::{MirrorApp, remote_source, shutdown_signal};
use rtmirror_server::cli::{Cli, Command};
use rtmirror_server::config::MirrorConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command();

    let mut config = MirrorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = &cli.log_level {
        config.logging.default_level = level.clone();
    }
    match &command {
        Command::Serve { port, host } => {
            if let Some(port) = port {
                config.server.port = *port;
            }
            if let Some(host) = host {
                config.server.host = host.clone();
            }
        }
        // stdout carries the command's own report
        Command::Backfill | Command::Verify => {
            config.logging.console.target = ConsoleTarget::Stderr;
        }
    }

    let _log_guard = MirrorSubscriberBuilder::new()
        .with_config(config.logging.clone())
        .init();

    let app = MirrorApp::open(config.clone())
        .await
        .context("failed to open local storage")?;

    match command {
        Command::Serve { .. } => {
            let source = remote_source(&config)?;
            let addr = config.server.bind_addr();
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("failed to bind {addr}"))?;

            info!(
                addr = %addr,
                log = %config.storage.log_path.display(),
                path = %config.source.path,
                "Starting sensor mirror"
            );
            app.serve(source, listener, shutdown_signal()).await?;
        }

        Command::Backfill => {
            let source = remote_source(&config)?;
            let report = app.backfill_once(source).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_failure() {
                anyhow::bail!(
                    "backfill stopped early: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Command::Verify => {
            let report = app.verify().await.context("failed to scan log")?;
            println!("records:      {}", report.stats.records);
            println!("corrupt:      {}", report.stats.corrupt);
            println!("duplicates:   {}", report.stats.duplicates);
            println!("out of order: {}", report.stats.out_of_order);
            println!("last id:      {}", report.stats.last_id.as_deref().unwrap_or("-"));
            println!("cursor:       {}", report.cursor.as_deref().unwrap_or("-"));
            if !report.is_healthy() {
                warn!(?report, "Log and cursor disagree");
                anyhow::bail!("verification found problems");
            }
        }
    }

    Ok(())
}
