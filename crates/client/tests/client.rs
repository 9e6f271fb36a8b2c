//! End-to-end tests for the wired-up client
//!
//! Each client gets its own data directory (SQLite cache, key files,
//! cursor blob); they only meet through a shared in-memory directory.

mod common;

use std::time::Duration;

use ::common::crypto::PRIVATE_KEY_SIZE;
use ::common::directory::MemoryDirectory;
use ::common::model::RemoteIdentity;
use ::common::provision::ProvisionState;
use client::{Client, ClientError};
use tempfile::TempDir;

use common::{config_in, open_client};

fn alice() -> RemoteIdentity {
    RemoteIdentity::new("alice").with_name(Some("Alice"), Some("Liddell"))
}

fn bob() -> RemoteIdentity {
    RemoteIdentity::new("bob").with_name(None, Some("Builder"))
}

#[tokio::test]
async fn alice_sends_bob_hi() {
    let backend = MemoryDirectory::new();
    let (alice_client, _alice_dir) = open_client(&backend, alice()).await;
    let (bob_client, _bob_dir) = open_client(&backend, bob()).await;

    let alice_id = alice_client.identity().await.unwrap();
    let bob_id = bob_client.identity().await.unwrap();
    assert_eq!(alice_id.identity.display_name, "Alice Liddell");
    assert_eq!(bob_id.identity.display_name, "Builder");

    let message = alice_client.seal(&bob_id.identity.id, b"hi").await.unwrap();
    assert_eq!(message.recipient_identity_ref, bob_id.identity.id);

    // bob learns alice's public key record from the directory
    bob_client.reconcile().await.unwrap();
    let plaintext = bob_client.open_message(&message).await.unwrap();
    assert_eq!(plaintext, b"hi");

    alice_client.shutdown().await;
    bob_client.shutdown().await;
}

#[tokio::test]
async fn tampered_message_cannot_be_opened() {
    let backend = MemoryDirectory::new();
    let (alice_client, _alice_dir) = open_client(&backend, alice()).await;
    let (bob_client, _bob_dir) = open_client(&backend, bob()).await;
    let bob_id = bob_client.identity().await.unwrap();
    alice_client.identity().await.unwrap();

    let mut message = alice_client.seal(&bob_id.identity.id, b"hi").await.unwrap();
    let last = message.ciphertext.len() - 1;
    message.ciphertext[last] ^= 0x01;

    bob_client.reconcile().await.unwrap();
    let err = bob_client.open_message(&message).await.unwrap_err();
    assert!(matches!(err, ClientError::Mailbox(_)));
}

#[tokio::test]
async fn identity_survives_reopen() {
    let backend = MemoryDirectory::new();
    let temp = TempDir::new().unwrap();

    let first = Client::open(config_in(temp.path()), backend.connect(alice()))
        .await
        .unwrap();
    let before = first.identity().await.unwrap();
    first.shutdown().await;

    let second = Client::open(config_in(temp.path()), backend.connect(alice()))
        .await
        .unwrap();
    let after = second.identity().await.unwrap();

    assert_eq!(before, after);
    assert_eq!(backend.publications(), 1);
    assert!(temp.path().join("change_cursor.bin").exists());
    second.shutdown().await;
}

#[tokio::test]
async fn reset_then_identity_restores_published_key() {
    let backend = MemoryDirectory::new();
    let (client, temp) = open_client(&backend, alice()).await;

    let before = client.identity().await.unwrap();
    client.reset().await.unwrap();

    let keys_dir = temp.path().join("keys");
    assert_eq!(std::fs::read_dir(&keys_dir).unwrap().count(), 0);
    assert!(!temp.path().join("change_cursor.bin").exists());

    let after = client.identity().await.unwrap();
    assert_eq!(after.private_key, before.private_key);
    assert_eq!(after.private_key.to_bytes().len(), PRIVATE_KEY_SIZE);
    assert_eq!(backend.publications(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn background_provision_job_completes() {
    let backend = MemoryDirectory::new();
    let (client, _temp) = open_client(&backend, alice()).await;

    client.dispatcher().dispatch_provision(alice()).unwrap();

    let record_id = alice().record_id;
    tokio::time::timeout(Duration::from_secs(10), async {
        while client.provisioner().state(&record_id) != ProvisionState::Ready {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(backend.publications(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn offline_directory_is_retryable() {
    let backend = MemoryDirectory::new();
    let (client, _temp) = open_client(&backend, alice()).await;

    backend.set_available(false);
    match client.identity().await {
        Err(ClientError::Provision(e)) => assert!(e.is_retryable()),
        other => panic!("expected a provisioning error, got {:?}", other),
    }

    backend.set_available(true);
    client.identity().await.unwrap();
    client.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn key_directory_is_private_to_the_user() {
    use std::os::unix::fs::PermissionsExt;

    let backend = MemoryDirectory::new();
    let (client, temp) = open_client(&backend, alice()).await;

    let mode = std::fs::metadata(temp.path().join("keys"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o700);
    client.shutdown().await;
}
