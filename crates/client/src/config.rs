use std::path::PathBuf;

use common::reconcile::DEFAULT_FETCH_LIMIT;

pub const KEYS_DIR_NAME: &str = "keys";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of the on-disk state; the cursor blob and the
    ///  key store live under it
    pub data_dir: PathBuf,

    // data store configuration
    /// a path to a sqlite database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,

    // sync
    /// Transactions requested per directory page
    pub fetch_limit: usize,

    // logging
    pub log_level: tracing::Level,
    /// Directory for log files (optional, logs to stdout only if not set)
    pub log_dir: Option<PathBuf>,
}

impl ServiceConfig {
    /// Defaults rooted at `data_dir`, with an in-memory database
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            sqlite_path: None,
            fetch_limit: DEFAULT_FETCH_LIMIT,
            log_level: tracing::Level::INFO,
            log_dir: None,
        }
    }

    /// Where the file secret store keeps its entries
    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join(KEYS_DIR_NAME)
    }
}
