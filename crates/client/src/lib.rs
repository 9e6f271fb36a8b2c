/**
 * The wired-up client an application talks to.
 */
mod client;
/**
 * In-process runtime configuration.
 */
pub mod config;
/**
 * SQLite-backed local cache.
 */
pub mod database;
/**
 * Logging setup and the background worker lifecycle.
 */
pub mod process;
/**
 * On-disk application directory and its TOML config.
 */
pub mod state;

pub use client::{Client, ClientError, ClientProvisioner};
pub use config::ServiceConfig;
pub use database::{Database, DatabaseSetupError};
pub use process::{init_logging, ShutdownHandle};
pub use state::{AppConfig, AppState, StateError};
