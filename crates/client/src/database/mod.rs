mod cache;

use std::ops::Deref;
use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// SQLite-backed local cache
#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    /// Open the database at `path`, or a private in-memory one when `None`
    ///
    /// Migrations are applied before the handle is returned.
    pub async fn connect(path: Option<&Path>) -> Result<Self, DatabaseSetupError> {
        let pool = match path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .foreign_keys(true)
                    .journal_mode(SqliteJournalMode::Wal);
                SqlitePoolOptions::new()
                    .max_connections(5)
                    .connect_with(options)
                    .await
                    .map_err(DatabaseSetupError::Unavailable)?
            }
            None => {
                // every connection would get its own empty database, so keep
                // exactly one alive for the lifetime of the pool
                let options = SqliteConnectOptions::new()
                    .filename(":memory:")
                    .foreign_keys(true);
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await
                    .map_err(DatabaseSetupError::Unavailable)?
            }
        };

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DatabaseSetupError::MigrationFailed)?;

        tracing::debug!(
            "database ready at {}",
            path.map(|p| p.display().to_string())
                .unwrap_or_else(|| ":memory:".to_string())
        );
        Ok(Database::new(pool))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(sqlx::Error),

    #[error("unable to create the database directory: {0}")]
    Io(#[from] std::io::Error),
}
