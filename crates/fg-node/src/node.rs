//! Role dispatch and the pieces the commands share

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use fg_agent::{FileCheckpointStore, HttpDirectoryClient, MessageHandler, PeerAgent};
use fg_crypto::keystore::{self, KEY_SETTLE_DELAY};
use fg_crypto::{FileKeyStore, Identity, IdentityError, KeyPaths};
use fg_dirnode::{DirNodeServer, ServerConfig};
use fg_proto::v1::MessageV1;

use crate::config::{NodeConfig, Role};
use crate::output::OutputFormatter;

/// Keys location for inbox and whoami actions when none is configured
pub const DEFAULT_KEYS_PATH: &str = "/etc/fieldgrid/";

/// How often `--wait` looks for the private key
pub const KEY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Keys directory from config, falling back to [`DEFAULT_KEYS_PATH`] when allowed
pub fn keys_dir(config: &NodeConfig, use_default: bool) -> Result<PathBuf> {
    match &config.node.keys_path {
        Some(path) => Ok(path.clone()),
        None if use_default => Ok(PathBuf::from(DEFAULT_KEYS_PATH)),
        None => Err(crate::config::ConfigError::ValidationError(
            "no keys path specified (use --keys or [node] keys_path)".to_string(),
        )
        .into()),
    }
}

/// Load the unit identity, first waiting for the keys to appear if asked to
pub async fn load_identity(
    keys: &Path,
    wait: bool,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Identity, IdentityError> {
    let store = FileKeyStore::new();
    let paths = KeyPaths::new(keys);
    if wait {
        keystore::wait_until_present(&store, &paths, KEY_POLL_INTERVAL, KEY_SETTLE_DELAY, shutdown)
            .await?;
    }
    keystore::load(&store, &paths)
}

/// Receiver that flips to `true` on SIGINT or SIGTERM
pub fn shutdown_channel() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = tx.send(true);
    });
    rx
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, stopping"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, stopping"),
                }
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received SIGINT, stopping");
    }
}

/// Peer agent for `identity` against the configured directory
pub fn peer_agent(config: &NodeConfig, identity: Identity) -> Result<PeerAgent> {
    let client = HttpDirectoryClient::new(config.node.endpoint.clone())
        .context("building directory client")?;
    Ok(PeerAgent::new(identity, Arc::new(client))
        .with_capabilities(config.peer.advert_capabilities()))
}

/// Prints each inbox batch as it arrives
pub struct PrintHandler {
    formatter: OutputFormatter,
    delivered: usize,
}

impl PrintHandler {
    pub fn new(formatter: OutputFormatter) -> Self {
        Self {
            formatter,
            delivered: 0,
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

#[async_trait]
impl MessageHandler for PrintHandler {
    async fn handle(&mut self, batch: &[MessageV1]) -> anyhow::Result<()> {
        let output = self.formatter.format_messages(batch, "inbox --loop");
        if !output.is_empty() {
            println!("{output}");
        }
        self.delivered += batch.len();
        Ok(())
    }
}

/// Start the configured role and run until a signal arrives
pub async fn run(config: &NodeConfig, wait: bool, formatter: OutputFormatter) -> Result<()> {
    info!("fieldgrid v{} starting in {} mode ...", env!("CARGO_PKG_VERSION"), config.node.role);
    match config.node.role {
        Role::Server => run_server(config).await,
        Role::Peer => run_peer(config, wait, formatter).await,
    }
}

async fn run_server(config: &NodeConfig) -> Result<()> {
    let server_config = ServerConfig::load(config.server.clone())?;
    let server = DirNodeServer::new(server_config)
        .await
        .context("starting directory server")?;
    server.run().await
}

/// Advertise, then poll the inbox until shutdown
async fn run_peer(config: &NodeConfig, wait: bool, formatter: OutputFormatter) -> Result<()> {
    let mut shutdown = shutdown_channel();
    let keys = keys_dir(config, false)?;
    let identity = load_identity(&keys, wait, &mut shutdown)
        .await
        .with_context(|| format!("loading keys from {}", keys.display()))?;

    let agent = peer_agent(config, identity)?;
    let checkpoints = FileCheckpointStore::new(config.checkpoint_path(&keys));
    let mut handler = PrintHandler::new(formatter);
    agent
        .serve(&mut handler, &checkpoints, poll_interval(config), shutdown)
        .await?;
    info!("Delivered {} message(s) this run", handler.delivered());
    Ok(())
}

/// Continuous inbox polling with a durable checkpoint
pub async fn inbox_loop(
    config: &NodeConfig,
    agent: &PeerAgent,
    keys: &Path,
    formatter: OutputFormatter,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let checkpoints = FileCheckpointStore::new(config.checkpoint_path(keys));
    let mut handler = PrintHandler::new(formatter);
    agent
        .run_loop(&mut handler, &checkpoints, poll_interval(config), shutdown)
        .await?;
    info!("Delivered {} message(s) this run", handler.delivered());
    Ok(())
}

fn poll_interval(config: &NodeConfig) -> Duration {
    Duration::from_secs(config.peer.poll_interval_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use fg_crypto::keystore::DEFAULT_KEY_BITS;
    use fg_proto::v1::Fingerprint;
    use tempfile::TempDir;

    #[test]
    fn test_keys_dir_fallback() {
        let mut config = NodeConfig::default();
        assert_eq!(keys_dir(&config, true).unwrap(), PathBuf::from(DEFAULT_KEYS_PATH));
        assert!(keys_dir(&config, false).is_err());

        config.node.keys_path = Some(PathBuf::from("/srv/keys"));
        assert_eq!(keys_dir(&config, false).unwrap(), PathBuf::from("/srv/keys"));
        assert_eq!(keys_dir(&config, true).unwrap(), PathBuf::from("/srv/keys"));
    }

    #[tokio::test]
    async fn test_load_identity_without_wait() {
        let temp_dir = TempDir::new().unwrap();
        let (_tx, mut rx) = watch::channel(false);

        assert!(matches!(
            load_identity(temp_dir.path(), false, &mut rx).await,
            Err(IdentityError::NotFound(_))
        ));

        let generated = keystore::generate(
            &FileKeyStore::new(),
            &KeyPaths::new(temp_dir.path()),
            DEFAULT_KEY_BITS,
        )
        .unwrap();
        let loaded = load_identity(temp_dir.path(), false, &mut rx).await.unwrap();
        assert_eq!(loaded.fingerprint(), generated.fingerprint());
    }

    #[tokio::test]
    async fn test_wait_is_cancelled_by_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert!(matches!(
            load_identity(temp_dir.path(), true, &mut rx).await,
            Err(IdentityError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_print_handler_counts() {
        let mut handler = PrintHandler::new(OutputFormatter::new(OutputFormat::Quiet, false));
        let batch = vec![MessageV1 {
            id: 1,
            sender: Fingerprint::from([1u8; 32]),
            receiver: None,
            payload: b"hi".to_vec(),
            received_at: 0,
        }];
        handler.handle(&batch).await.unwrap();
        handler.handle(&batch).await.unwrap();
        assert_eq!(handler.delivered(), 2);
    }
}
