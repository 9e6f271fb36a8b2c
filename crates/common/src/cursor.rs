//! Persisted bookmark into the remote change history
//!
//! The cursor is stored on its own, separate from the cache, so it can be
//! advanced only once a merge has fully committed. A missing cursor means
//! "beginning of history".

use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// File name of the cursor blob inside the application data directory
pub const CURSOR_FILE_NAME: &str = "change_cursor.bin";

const CURSOR_FORMAT_VERSION: u8 = 1;

/// Opaque, totally ordered position in the remote change history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeCursor(u64);

impl ChangeCursor {
    /// Sentinel for "nothing applied yet"
    pub const BEGINNING: ChangeCursor = ChangeCursor(0);

    pub fn new(position: u64) -> Self {
        Self(position)
    }

    pub fn position(&self) -> u64 {
        self.0
    }

    pub fn is_beginning(&self) -> bool {
        *self == Self::BEGINNING
    }
}

impl Default for ChangeCursor {
    fn default() -> Self {
        Self::BEGINNING
    }
}

impl std::fmt::Display for ChangeCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CursorBlob {
    version: u8,
    cursor: ChangeCursor,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// The persisted cursor exists but cannot be read back
    #[error("persisted change cursor is corrupt: {0}")]
    Corrupt(String),
    #[error("cursor storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for CursorError {
    fn from(err: std::io::Error) -> Self {
        CursorError::Storage(err.to_string())
    }
}

/// Durable storage for a single [`ChangeCursor`]
#[async_trait]
pub trait CursorStore: Send + Sync + Debug + Clone + 'static {
    /// Load the persisted cursor
    ///
    /// # Returns
    /// * `Ok(None)` - Nothing persisted yet (first run)
    /// * `Err(CursorError::Corrupt)` - A cursor exists but cannot be parsed
    async fn load(&self) -> Result<Option<ChangeCursor>, CursorError>;

    /// Durably replace the persisted cursor
    async fn store(&self, cursor: ChangeCursor) -> Result<(), CursorError>;

    /// Forget the persisted cursor (full reset)
    async fn clear(&self) -> Result<(), CursorError>;
}

/// Cursor kept in a single bincode blob at a fixed path
///
/// Writes go to a temp file in the same directory followed by an atomic
/// rename, so a crash leaves either the old or the new cursor on disk.
#[derive(Debug, Clone)]
pub struct FileCursorStore {
    path: PathBuf,
}

impl FileCursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cursor store at the standard location inside `data_dir`
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(CURSOR_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_sync(path: &Path) -> Result<Option<ChangeCursor>, CursorError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let blob: CursorBlob =
            bincode::deserialize(&bytes).map_err(|e| CursorError::Corrupt(e.to_string()))?;
        if blob.version != CURSOR_FORMAT_VERSION {
            return Err(CursorError::Corrupt(format!(
                "unknown cursor format version {}",
                blob.version
            )));
        }
        Ok(Some(blob.cursor))
    }

    fn store_sync(path: &Path, cursor: ChangeCursor) -> Result<(), CursorError> {
        let dir = path
            .parent()
            .ok_or_else(|| CursorError::Storage("cursor path has no parent".to_string()))?;
        std::fs::create_dir_all(dir)?;

        let blob = CursorBlob {
            version: CURSOR_FORMAT_VERSION,
            cursor,
        };
        let bytes = bincode::serialize(&blob).map_err(|e| CursorError::Storage(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| CursorError::from(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self) -> Result<Option<ChangeCursor>, CursorError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::load_sync(&path))
            .await
            .map_err(|e| CursorError::Storage(e.to_string()))?
    }

    async fn store(&self, cursor: ChangeCursor) -> Result<(), CursorError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::store_sync(&path, cursor))
            .await
            .map_err(|e| CursorError::Storage(e.to_string()))?
    }

    async fn clear(&self) -> Result<(), CursorError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory cursor for tests
#[derive(Debug, Clone, Default)]
pub struct MemoryCursorStore {
    inner: Arc<RwLock<Option<ChangeCursor>>>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peek at the current value without going through the trait
    pub fn current(&self) -> Option<ChangeCursor> {
        *self.inner.read()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<ChangeCursor>, CursorError> {
        Ok(*self.inner.read())
    }

    async fn store(&self, cursor: ChangeCursor) -> Result<(), CursorError> {
        *self.inner.write() = Some(cursor);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CursorError> {
        *self.inner.write() = None;
        Ok(())
    }
}
