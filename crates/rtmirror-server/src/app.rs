//! Process bootstrap
//!
//! Wires configuration, storage, the remote source, replication and the
//! HTTP API together for each subcommand.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use rtmirror_core::RemoteSource;
use rtmirror_storage::{AppendLog, CursorStore, DedupIndex, LogStats, StorageError};
use rtmirror_sync::{BackfillReport, Replicator};
use rtmirror_transport::FirebaseSource;

use crate::api::{AppState, build_router};
use crate::config::MirrorConfig;
use crate::query::QueryService;

/// Outcome of `verify`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub stats: LogStats,
    /// Persisted cursor, if any
    pub cursor: Option<String>,
}

impl VerifyReport {
    /// The log is well-formed and the cursor names its last record
    pub fn is_healthy(&self) -> bool {
        self.stats.corrupt == 0
            && self.stats.duplicates == 0
            && self.stats.out_of_order == 0
            && self.cursor == self.stats.last_id
    }
}

/// Opened local state shared by every subcommand
pub struct MirrorApp {
    config: MirrorConfig,
    log: Arc<AppendLog>,
    cursor: Arc<CursorStore>,
}

impl MirrorApp {
    /// Open the log and cursor described by `config`
    pub async fn open(config: MirrorConfig) -> Result<Self, StorageError> {
        let dedup = Arc::new(DedupIndex::with_limits(
            config.sync.dedup_ceiling,
            config.sync.dedup_target,
        ));
        let log = AppendLog::open(config.storage.append_log(), config.schema.clone(), dedup).await?;
        let cursor = CursorStore::new(config.storage.cursor_path.clone());

        Ok(Self {
            config,
            log: Arc::new(log),
            cursor: Arc::new(cursor),
        })
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<AppendLog> {
        &self.log
    }

    /// HTTP router over this state
    pub fn router(&self) -> Router {
        let query = Arc::new(QueryService::new(self.log.clone()));
        build_router(AppState::new(query), &self.config.server)
    }

    /// Replicator feeding this state from `source`
    pub fn replicator(&self, source: Arc<dyn RemoteSource>) -> Replicator {
        Replicator::new(
            source,
            self.log.clone(),
            self.cursor.clone(),
            self.config.sync.clone(),
        )
    }

    /// Warm the dedup index and run a single backfill pass
    pub async fn backfill_once(&self, source: Arc<dyn RemoteSource>) -> BackfillReport {
        let replicator = self.replicator(source);
        replicator.warm().await;
        replicator.backfill().await
    }

    /// Scan the whole log and read the cursor
    pub async fn verify(&self) -> Result<VerifyReport, StorageError> {
        let stats = self.log.scan().await?;
        let cursor = self.cursor.try_load().await?;
        Ok(VerifyReport { stats, cursor })
    }

    /// Serve HTTP and replicate until `shutdown` resolves
    pub async fn serve(
        self,
        source: Arc<dyn RemoteSource>,
        listener: tokio::net::TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let tasks = self.replicator(source).spawn(&shutdown_tx);

        let router = self.router();
        info!(addr = %listener.local_addr()?, "HTTP API listening");
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .context("server error");

        info!("Stopping replication");
        if shutdown_tx.send(()).is_err() {
            warn!("Replication tasks already stopped");
        }
        tasks.join().await;
        served
    }
}

/// Build the real remote source from configuration
pub fn remote_source(config: &MirrorConfig) -> Result<Arc<dyn RemoteSource>> {
    let source = FirebaseSource::new(config.source.clone())
        .context("remote source (set source.database_url or FIREBASE_DATABASE_URL)")?;
    Ok(Arc::new(source))
}

/// Resolves on Ctrl-C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
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
    info!("Shutdown signal received");
}
