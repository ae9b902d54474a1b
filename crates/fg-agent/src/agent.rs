//! Peer agent: advertise, send and poll against a directory
//!
//! Delivery is at-least-once. The checkpoint only advances after the handler
//! has accepted a whole batch, so a failing or crashing handler sees the same
//! messages again on the next tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use fg_crypto::{sign, Identity, IdentityError};
use fg_proto::v1::{
    AdvertPayloadV1, AdvertisementV1, CheckpointV1, Fingerprint, MessageV1, DEFAULT_FETCH_LIMIT,
};

use crate::checkpoint::{CheckpointError, CheckpointStore};
use crate::retry::RetryConfig;
use crate::transport::{DirectoryTransport, TransportError};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),
    #[error("advertisement rejected: {0}")]
    Rejected(TransportError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("checkpoint belongs to {0}, not this unit")]
    ForeignCheckpoint(Fingerprint),
}

/// Consumer of inbox batches in loop mode
#[async_trait]
pub trait MessageHandler: Send {
    /// Process one batch, ascending by id. An error leaves the batch unacknowledged.
    async fn handle(&mut self, batch: &[MessageV1]) -> anyhow::Result<()>;
}

/// Peer agent
pub struct PeerAgent {
    identity: Identity,
    transport: Arc<dyn DirectoryTransport>,
    retry: RetryConfig,
    capabilities: serde_json::Map<String, serde_json::Value>,
    page_size: u32,
}

impl PeerAgent {
    pub fn new(identity: Identity, transport: Arc<dyn DirectoryTransport>) -> Self {
        Self {
            identity,
            transport,
            retry: RetryConfig::default(),
            capabilities: serde_json::Map::new(),
            page_size: DEFAULT_FETCH_LIMIT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_capabilities(mut self, capabilities: serde_json::Map<String, serde_json::Value>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.identity.fingerprint()
    }

    /// Sign and publish this unit's advertisement.
    ///
    /// Transport failures are retried with backoff; a rejection is final.
    pub async fn advertise_self(&self) -> Result<Fingerprint, AgentError> {
        let mut attempt = 0;
        loop {
            match self.advertise_once().await {
                Ok(fingerprint) => {
                    info!("Advertised as {}", fingerprint);
                    return Ok(fingerprint);
                }
                Err(AgentError::Transport(e)) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!("Advertise failed (attempt {}), retrying in {:?}: {}", attempt + 1, delay, e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One signed advertisement, freshly timestamped
    async fn advertise_once(&self) -> Result<Fingerprint, AgentError> {
        let payload = AdvertPayloadV1 {
            capabilities: self.capabilities.clone(),
            timestamp: unix_now(),
        };
        let envelope = sign(&self.identity, &serde_json::to_vec(&payload)?);

        match self.transport.advertise(&envelope).await {
            Ok(fingerprint) => Ok(fingerprint),
            Err(e @ TransportError::Rejected { .. }) => {
                warn!("Advertisement rejected: {}", e);
                Err(AgentError::Rejected(e))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Sign `payload` and submit it once. `None` broadcasts.
    pub async fn send_message(
        &self,
        receiver: Option<&Fingerprint>,
        payload: &[u8],
    ) -> Result<u64, AgentError> {
        let envelope = sign(&self.identity, payload);
        let id = self.transport.submit(&envelope, receiver).await?;
        debug!("Message {} submitted", id);
        Ok(id)
    }

    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Result<AdvertisementV1, AgentError> {
        Ok(self.transport.lookup(fingerprint).await?)
    }

    /// One message from this unit's inbox
    pub async fn fetch_message(&self, id: u64) -> Result<MessageV1, AgentError> {
        Ok(self.transport.fetch_by_id(&self.fingerprint(), id).await?)
    }

    /// Every message from `sender` in this unit's inbox
    pub async fn fetch_from(&self, sender: &Fingerprint) -> Result<Vec<MessageV1>, AgentError> {
        Ok(self.transport.fetch_from_sender(&self.fingerprint(), sender).await?)
    }

    /// Fetch the next page after `checkpoint`.
    ///
    /// The returned checkpoint covers the page; the caller decides when to persist it.
    pub async fn poll_once(
        &self,
        checkpoint: &CheckpointV1,
    ) -> Result<(Vec<MessageV1>, CheckpointV1), AgentError> {
        let me = self.fingerprint();
        if checkpoint.reader != me {
            return Err(AgentError::ForeignCheckpoint(checkpoint.reader.clone()));
        }

        let batch = self
            .transport
            .fetch_since(&me, checkpoint.last_id_seen, self.page_size)
            .await?;
        let next = checkpoint.advanced_by(&batch);
        Ok((batch, next))
    }

    /// Poll until `shutdown` fires, handing each batch to `handler`.
    ///
    /// Transport errors are logged and retried with backoff; checkpoint and
    /// identity errors end the loop.
    pub async fn run_loop(
        &self,
        handler: &mut dyn MessageHandler,
        checkpoints: &dyn CheckpointStore,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        self.poll_loop(handler, checkpoints, poll_interval, shutdown, false)
            .await
    }

    /// Advertise, then poll like [`run_loop`](Self::run_loop).
    ///
    /// A directory that cannot be reached does not stop the unit: the
    /// advertisement is attempted again on every tick until it lands. Only a
    /// rejection of the advertisement ends the loop early.
    pub async fn serve(
        &self,
        handler: &mut dyn MessageHandler,
        checkpoints: &dyn CheckpointStore,
        poll_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        self.poll_loop(handler, checkpoints, poll_interval, shutdown, true)
            .await
    }

    async fn poll_loop(
        &self,
        handler: &mut dyn MessageHandler,
        checkpoints: &dyn CheckpointStore,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut advert_pending: bool,
    ) -> Result<(), AgentError> {
        let me = self.fingerprint();
        let mut checkpoint = checkpoints
            .load(&me)?
            .unwrap_or_else(|| CheckpointV1::new(me.clone()));
        info!("Polling inbox of {} from message {}", me, checkpoint.last_id_seen);

        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            if advert_pending {
                match self.advertise_once().await {
                    Ok(fingerprint) => {
                        info!("Advertised as {}", fingerprint);
                        advert_pending = false;
                    }
                    Err(e @ AgentError::Rejected(_)) => return Err(e),
                    Err(e) => warn!("Advertise failed, trying again next tick: {}", e),
                }
            }

            let delay = match self.poll_once(&checkpoint).await {
                Ok((batch, next)) => {
                    failures = 0;
                    if batch.is_empty() {
                        debug!("Inbox empty after {}", checkpoint.last_id_seen);
                        poll_interval
                    } else {
                        let full_page = batch.len() as u32 >= self.page_size;
                        match handler.handle(&batch).await {
                            Ok(()) => {
                                checkpoints.save(&next)?;
                                debug!("Checkpoint advanced to {}", next.last_id_seen);
                                checkpoint = next;
                                // Drain a backlog without waiting
                                if full_page {
                                    Duration::ZERO
                                } else {
                                    poll_interval
                                }
                            }
                            Err(e) => {
                                warn!(
                                    "Handler failed on {} message(s), will redeliver: {:#}",
                                    batch.len(),
                                    e
                                );
                                poll_interval
                            }
                        }
                    }
                }
                Err(AgentError::Transport(e)) => {
                    let delay = self.retry.backoff_delay(failures).max(poll_interval);
                    failures = failures.saturating_add(1);
                    warn!("Poll failed, retrying in {:?}: {}", delay, e);
                    delay
                }
                Err(e) => return Err(e),
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }

        info!("Inbox loop stopped at message {}", checkpoint.last_id_seen);
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
