//! Shared test utilities for client integration tests
#![allow(dead_code)]

use std::path::Path;

use client::{Client, ServiceConfig};
use common::directory::MemoryDirectory;
use common::model::RemoteIdentity;
use tempfile::TempDir;

/// Service config rooted in `dir` with an on-disk database
pub fn config_in(dir: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::new(dir);
    config.sqlite_path = Some(dir.join("db.sqlite"));
    config.fetch_limit = 10;
    config
}

/// Open a client for `user` on the shared `backend`, in a fresh temp dir
pub async fn open_client(
    backend: &MemoryDirectory,
    user: RemoteIdentity,
) -> (Client<MemoryDirectory>, TempDir) {
    let temp = TempDir::new().unwrap();
    let client = Client::open(config_in(temp.path()), backend.connect(user))
        .await
        .unwrap();
    (client, temp)
}
