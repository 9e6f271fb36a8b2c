//! Background job queue for reconciliation and provisioning
//!
//! Callers hand work to a [`JobDispatcher`] and return immediately; a single
//! worker drains the queue in order, so persistence and reconcile work never
//! runs on the caller's task and never runs two at a time.

use anyhow::Result;
use futures::StreamExt;
use tokio::sync::watch::Receiver as WatchReceiver;

use crate::cache::LocalCache;
use crate::cursor::CursorStore;
use crate::directory::RemoteDirectory;
use crate::model::RemoteIdentity;
use crate::provision::KeyProvisioningService;
use crate::reconcile::ReconcileError;
use crate::secret_store::SecretStore;

/// Background jobs that can be dispatched to the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Pull remote changes into the local cache
    Reconcile,
    /// Make sure an identity key exists for this remote identity
    Provision(RemoteIdentity),
}

/// Job dispatcher that can be cloned and shared across tasks
#[derive(Debug, Clone)]
pub struct JobDispatcher {
    tx: flume::Sender<Job>,
}

impl JobDispatcher {
    /// Create an unbounded dispatcher and receiver pair
    ///
    /// The receiver should be given to the worker task.
    pub fn new() -> (Self, JobReceiver) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, JobReceiver { rx })
    }

    /// Create a dispatcher that holds at most `size` pending jobs
    pub fn bounded(size: usize) -> (Self, JobReceiver) {
        tracing::info!("creating bounded job queue with size {}", size);
        let (tx, rx) = flume::bounded(size);
        (Self { tx }, JobReceiver { rx })
    }

    /// Queue a job for the background worker
    ///
    /// Fails if the queue is full or the worker has stopped.
    pub fn dispatch(&self, job: Job) -> Result<()> {
        tracing::debug!("dispatching job: {:?}", job);
        self.tx.try_send(job).map_err(|e| match e {
            flume::TrySendError::Full(_) => anyhow::anyhow!("job queue is full"),
            flume::TrySendError::Disconnected(_) => {
                anyhow::anyhow!("job worker has been stopped")
            }
        })
    }

    pub fn dispatch_reconcile(&self) -> Result<()> {
        self.dispatch(Job::Reconcile)
    }

    pub fn dispatch_provision(&self, remote: RemoteIdentity) -> Result<()> {
        self.dispatch(Job::Provision(remote))
    }

    /// Jobs waiting to be picked up
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

/// Job receiver for the background worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: flume::Receiver<Job>,
}

impl JobReceiver {
    pub fn into_async(self) -> flume::r#async::RecvStream<'static, Job> {
        self.rx.into_stream()
    }
}

/// Drain `receiver` until every dispatcher is dropped or shutdown fires
///
/// A job that has started always runs to completion, except that a
/// reconcile stops between transactions once shutdown is signalled.
pub async fn run_worker<D, C, K, S>(
    provisioner: KeyProvisioningService<D, C, K, S>,
    receiver: JobReceiver,
    mut shutdown_rx: WatchReceiver<()>,
) where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
    S: SecretStore,
{
    let mut stream = receiver.into_async();
    tracing::info!("job worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                tracing::info!("job worker received shutdown signal");
                break;
            }
            job = stream.next() => match job {
                Some(job) => job,
                None => break,
            },
        };

        match job {
            Job::Reconcile => {
                match provisioner.reconciler().reconcile_until(&shutdown_rx).await {
                    Ok(outcome) => tracing::debug!(
                        "reconcile job applied {} transactions, cursor {}",
                        outcome.applied,
                        outcome.cursor
                    ),
                    Err(ReconcileError::Cancelled) => {
                        tracing::info!("reconcile job cancelled by shutdown");
                        break;
                    }
                    Err(e) => tracing::error!("reconcile job failed: {}", e),
                }
            }
            Job::Provision(remote) => match provisioner.fetch_or_create(&remote).await {
                Ok(provisioned) => tracing::info!(
                    "provision job ready for {} (key record {})",
                    remote.record_id,
                    provisioned.public_key.id
                ),
                Err(e) => tracing::error!("provision job for {} failed: {}", remote.record_id, e),
            },
        }
    }

    tracing::info!("job worker stopped");
}
