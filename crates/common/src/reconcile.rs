//! Incremental reconciliation of the local cache against the remote directory
//!
//! A reconcile pulls every transaction after the persisted cursor, applies
//! them in the order the directory returned them, and only then persists
//! the highest cursor it applied. A failure anywhere before that leaves
//! the durable cursor where it was; the next call re-fetches from there and
//! the idempotent merges in [`LocalCache::apply`] absorb the replay.

use tokio::sync::{watch, Mutex};

use crate::cache::{CacheError, LocalCache};
use crate::cursor::{ChangeCursor, CursorError, CursorStore};
use crate::directory::{DirectoryError, RemoteDirectory};

/// Transactions requested per `changes_since` page
pub const DEFAULT_FETCH_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Fetching from the directory failed; the cursor is untouched
    #[error("remote directory unavailable: {0}")]
    RemoteUnavailable(String),
    /// Writing a transaction into the cache failed; the cursor is untouched
    #[error("failed to apply change {cursor}: {reason}")]
    ApplyFailure { cursor: ChangeCursor, reason: String },
    /// The persisted cursor cannot be read back
    #[error("persisted change cursor is corrupt: {0}")]
    CursorCorrupt(String),
    #[error("failed to persist change cursor: {0}")]
    CursorStorage(String),
    #[error("reconciliation cancelled")]
    Cancelled,
    #[error("failed to reset local cache: {0}")]
    ResetFailed(String),
}

impl From<DirectoryError> for ReconcileError {
    fn from(err: DirectoryError) -> Self {
        ReconcileError::RemoteUnavailable(err.to_string())
    }
}

impl From<CursorError> for ReconcileError {
    fn from(err: CursorError) -> Self {
        match err {
            CursorError::Corrupt(reason) => ReconcileError::CursorCorrupt(reason),
            CursorError::Storage(reason) => ReconcileError::CursorStorage(reason),
        }
    }
}

/// What a successful reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Transactions merged into the cache during this call
    pub applied: usize,
    /// Durable cursor after the call
    pub cursor: ChangeCursor,
}

/// Applies remote change transactions to a [`LocalCache`]
///
/// Calls are serialized: the cursor has a single writer at a time.
#[derive(Debug)]
pub struct ChangeReconciler<D, C, K> {
    directory: D,
    cache: C,
    cursor_store: K,
    fetch_limit: usize,
    lock: Mutex<()>,
}

impl<D, C, K> ChangeReconciler<D, C, K>
where
    D: RemoteDirectory,
    C: LocalCache,
    K: CursorStore,
{
    pub fn new(directory: D, cache: C, cursor_store: K) -> Self {
        Self {
            directory,
            cache,
            cursor_store,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            lock: Mutex::new(()),
        }
    }

    pub fn with_fetch_limit(mut self, fetch_limit: usize) -> Self {
        self.fetch_limit = fetch_limit.max(1);
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn cursor_store(&self) -> &K {
        &self.cursor_store
    }

    /// Bring the cache up to date with the directory
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ReconcileError> {
        self.run(None).await
    }

    /// Like [`Self::reconcile`], but stop between transactions once
    /// `cancel` fires
    ///
    /// A transaction that has started applying always finishes. On
    /// cancellation the cursor is left at its previous durable value. A
    /// dropped sender counts as cancelled.
    pub async fn reconcile_until(
        &self,
        cancel: &watch::Receiver<()>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.run(Some(cancel)).await
    }

    /// Forget everything applied so far: the cursor, then the cache
    ///
    /// Clearing the cursor first means a failure halfway leaves a cache
    /// that the next reconcile simply replays over.
    pub async fn reset(&self) -> Result<(), ReconcileError> {
        let _guard = self.lock.lock().await;
        self.cursor_store.clear().await?;
        self.cache
            .clear_all()
            .await
            .map_err(|e| ReconcileError::ResetFailed(e.to_string()))?;
        tracing::info!("reset change cursor and local cache");
        Ok(())
    }

    async fn run(
        &self,
        cancel: Option<&watch::Receiver<()>>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let _guard = self.lock.lock().await;

        let start = self.cursor_store.load().await?.unwrap_or_default();
        let mut current = start;
        let mut applied = 0;

        loop {
            let page = self
                .directory
                .changes_since(current, self.fetch_limit)
                .await?;
            let page_len = page.len();
            let page_start = current;

            for transaction in page {
                if is_cancelled(cancel) {
                    tracing::info!("reconcile cancelled after {} transactions", applied);
                    return Err(ReconcileError::Cancelled);
                }
                // already covered, nothing to merge
                if transaction.cursor <= current {
                    continue;
                }

                self.cache.apply(&transaction).await.map_err(|e| {
                    tracing::warn!("failed to apply change {}: {}", transaction.cursor, e);
                    apply_failure(transaction.cursor, e)
                })?;
                tracing::debug!(
                    "applied change {} ({} records)",
                    transaction.cursor,
                    transaction.changes.len()
                );
                current = transaction.cursor;
                applied += 1;
            }

            // a full page that moved nothing forward would loop forever
            if page_len < self.fetch_limit || current == page_start {
                break;
            }
        }

        if current > start {
            self.cursor_store.store(current).await?;
            tracing::info!(
                "reconciled {} transactions, cursor {} -> {}",
                applied,
                start,
                current
            );
        }

        Ok(ReconcileOutcome {
            applied,
            cursor: current,
        })
    }
}

fn is_cancelled(cancel: Option<&watch::Receiver<()>>) -> bool {
    cancel
        .map(|rx| rx.has_changed().unwrap_or(true))
        .unwrap_or(false)
}

fn apply_failure(cursor: ChangeCursor, err: CacheError) -> ReconcileError {
    ReconcileError::ApplyFailure {
        cursor,
        reason: err.to_string(),
    }
}
