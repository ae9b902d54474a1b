//! Directory node server

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{create_router, ApiState};
use crate::config::ServerConfig;
use crate::directory::{DirectoryLimits, DirectoryService};
use crate::store::SqliteStore;

/// Directory node server
pub struct DirNodeServer {
    config: ServerConfig,
    directory: Arc<DirectoryService>,
    shutdown_tx: watch::Sender<bool>,
}

impl DirNodeServer {
    /// Create new directory node server
    ///
    /// Opens the inbox database; failing to open it is fatal.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let policy = config.advert_policy()?;

        let store = Arc::new(SqliteStore::new(&config.database_path).await?);
        let limits = DirectoryLimits {
            max_payload_size: config.max_payload_size,
            max_fetch_limit: config.max_fetch_limit,
        };
        let directory = Arc::new(DirectoryService::new(store.clone(), store, policy, limits));
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            "Directory database at {} (advert policy {:?})",
            config.database_path.display(),
            policy
        );

        Ok(Self {
            config,
            directory,
            shutdown_tx,
        })
    }

    pub fn directory(&self) -> Arc<DirectoryService> {
        self.directory.clone()
    }

    /// HTTP application with tracing
    pub fn router(&self) -> Router {
        create_router(ApiState {
            directory: self.directory.clone(),
        })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
    }

    /// Run the directory node server until SIGINT, SIGTERM or [`shutdown`](Self::shutdown)
    pub async fn run(&self) -> Result<()> {
        info!("Starting directory node on {}", self.config.listen_addr);

        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("HTTP server listening on {}", listener.local_addr()?);

        let app = self.router();
        let shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;

        info!("Directory node stopped");
        Ok(())
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.wait_for(|stop| *stop) => {
                info!("Shutdown requested");
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
