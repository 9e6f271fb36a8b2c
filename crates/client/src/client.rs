use std::sync::Arc;

use common::cursor::FileCursorStore;
use common::directory::RemoteDirectory;
use common::identity_keys::IdentityKeyStore;
use common::jobs::JobDispatcher;
use common::mailbox::{Mailbox, MailboxError};
use common::model::{Message, RemoteId};
use common::provision::{KeyProvisioningService, ProvisionError, Provisioned};
use common::reconcile::{ChangeReconciler, ReconcileError, ReconcileOutcome};
use common::secret_store::{FileSecretStore, SecretStoreError};

use crate::config::ServiceConfig;
use crate::database::{Database, DatabaseSetupError};
use crate::process::{spawn_worker, ShutdownHandle};

pub type ClientProvisioner<D> =
    KeyProvisioningService<D, Database, FileCursorStore, FileSecretStore>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("database setup failed: {0}")]
    Database(#[from] DatabaseSetupError),
    #[error(transparent)]
    SecretStore(#[from] SecretStoreError),
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error(transparent)]
    Mailbox(#[from] MailboxError),
    #[error("client error: {0}")]
    Default(#[from] anyhow::Error),
}

/// A running client: SQLite cache, file key store and a background worker
/// wired to one remote directory
#[derive(Debug)]
pub struct Client<D>
where
    D: RemoteDirectory,
{
    config: ServiceConfig,
    database: Database,
    provisioner: ClientProvisioner<D>,
    mailbox: Mailbox<D, Database>,
    dispatcher: JobDispatcher,
    shutdown: ShutdownHandle,
}

impl<D> Client<D>
where
    D: RemoteDirectory,
{
    /// Open the on-disk state described by `config` and start the worker
    ///
    /// Logging is left to the caller (see [`crate::process::init_logging`]).
    pub async fn open(config: ServiceConfig, directory: D) -> Result<Self, ClientError> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .map_err(anyhow::Error::from)?;

        let database = Database::connect(config.sqlite_path.as_deref()).await?;
        let keys_dir = config.keys_dir();
        let secrets = tokio::task::spawn_blocking(move || FileSecretStore::open(keys_dir))
            .await
            .map_err(anyhow::Error::from)??;
        let cursors = FileCursorStore::in_dir(&config.data_dir);

        let reconciler = ChangeReconciler::new(directory.clone(), database.clone(), cursors)
            .with_fetch_limit(config.fetch_limit);
        let provisioner =
            KeyProvisioningService::new(Arc::new(reconciler), IdentityKeyStore::new(secrets));
        let mailbox = Mailbox::new(directory, database.clone());

        let (dispatcher, receiver) = JobDispatcher::new();
        let shutdown = spawn_worker(provisioner.clone(), receiver);

        tracing::info!("client opened at {}", config.data_dir.display());
        Ok(Self {
            config,
            database,
            provisioner,
            mailbox,
            dispatcher,
            shutdown,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn provisioner(&self) -> &ClientProvisioner<D> {
        &self.provisioner
    }

    /// Queue background work without waiting for it
    pub fn dispatcher(&self) -> &JobDispatcher {
        &self.dispatcher
    }

    /// This device's identity key for the signed-in user, created on first use
    pub async fn identity(&self) -> Result<Provisioned, ClientError> {
        Ok(self.provisioner.fetch_or_create_current().await?)
    }

    /// Pull remote changes into the local cache now
    pub async fn reconcile(&self) -> Result<ReconcileOutcome, ClientError> {
        Ok(self.provisioner.reconciler().reconcile().await?)
    }

    /// Encrypt `plaintext` for `recipient` as the signed-in user
    pub async fn seal(&self, recipient: &RemoteId, plaintext: &[u8]) -> Result<Message, ClientError> {
        let sender = self.identity().await?;
        let recipient = self.mailbox.recipient(recipient).await?;
        Ok(self.mailbox.seal(&sender, &recipient, plaintext)?)
    }

    /// Decrypt a message addressed to the signed-in user
    pub async fn open_message(&self, message: &Message) -> Result<Vec<u8>, ClientError> {
        let own = self.identity().await?;
        Ok(self.mailbox.open(message, &own.private_key).await?)
    }

    /// Messages in the cache addressed to the signed-in user
    pub async fn inbox(&self) -> Result<Vec<Message>, ClientError> {
        let own = self.identity().await?;
        Ok(self.mailbox.inbox(&own.identity.id).await?)
    }

    /// Wipe the identity key, the cache and the cursor
    pub async fn reset(&self) -> Result<(), ClientError> {
        tracing::warn!("resetting all local client state");
        Ok(self.provisioner.reset().await?)
    }

    /// Stop the worker, letting its current job finish
    pub async fn shutdown(self) {
        self.shutdown.wait().await;
        self.database.close().await;
    }
}
