use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use common::cache::{CacheError, LocalCache, ProvisionedRecords};
use common::crypto::{PublicKey, PRIVATE_KEY_SIZE};
use common::directory::{ChangeTransaction, RecordChange};
use common::model::{Identity, Message, PrivateKeyRecord, PublicKeyRecord, RemoteId};

use super::Database;

fn decode_err(what: &str, detail: impl std::fmt::Display) -> CacheError {
    anyhow::anyhow!("invalid {} in database: {}", what, detail).into()
}

fn parse_uuid(value: &str) -> Result<Uuid, CacheError> {
    Uuid::parse_str(value).map_err(|e| decode_err("uuid", e))
}

fn parse_millis(millis: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| decode_err("timestamp", millis))
}

fn identity_from_row(row: &SqliteRow) -> Result<Identity, CacheError> {
    let public_key: Vec<u8> = row.try_get("public_key").map_err(anyhow::Error::from)?;
    Ok(Identity {
        id: RemoteId::new(row.try_get::<String, _>("id").map_err(anyhow::Error::from)?),
        display_name: row.try_get("display_name").map_err(anyhow::Error::from)?,
        public_key: PublicKey::try_from(&public_key[..])
            .map_err(|e| decode_err("identity public key", e))?,
        created_at: parse_millis(row.try_get("created_at").map_err(anyhow::Error::from)?)?,
    })
}

fn public_key_from_row(row: &SqliteRow) -> Result<PublicKeyRecord, CacheError> {
    let id: String = row.try_get("id").map_err(anyhow::Error::from)?;
    let key: Vec<u8> = row.try_get("key").map_err(anyhow::Error::from)?;
    Ok(PublicKeyRecord {
        id: parse_uuid(&id)?,
        key: PublicKey::try_from(&key[..]).map_err(|e| decode_err("public key", e))?,
        owner_identity_id: RemoteId::new(
            row.try_get::<String, _>("owner_identity_id")
                .map_err(anyhow::Error::from)?,
        ),
    })
}

fn message_from_row(row: &SqliteRow) -> Result<Message, CacheError> {
    let id: String = row.try_get("id").map_err(anyhow::Error::from)?;
    let sender: String = row
        .try_get("sender_public_key_ref")
        .map_err(anyhow::Error::from)?;
    Ok(Message {
        id: parse_uuid(&id)?,
        sender_public_key_ref: parse_uuid(&sender)?,
        recipient_identity_ref: RemoteId::new(
            row.try_get::<String, _>("recipient_identity_ref")
                .map_err(anyhow::Error::from)?,
        ),
        ciphertext: row.try_get("ciphertext").map_err(anyhow::Error::from)?,
        sent_at: parse_millis(row.try_get("sent_at").map_err(anyhow::Error::from)?)?,
    })
}

async fn upsert_identity(conn: &mut SqliteConnection, identity: &Identity) -> Result<(), sqlx::Error> {
    let existing: Option<Vec<u8>> = sqlx::query_scalar("SELECT public_key FROM identities WHERE id = ?")
        .bind(identity.id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(existing) = existing {
        if existing.as_slice() != identity.public_key.as_bytes().as_slice() {
            tracing::warn!(
                "ignoring public key change on immutable identity {}",
                identity.id
            );
        }
    }

    sqlx::query(
        r#"
        INSERT INTO identities (id, display_name, public_key, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            display_name = excluded.display_name
        "#,
    )
    .bind(identity.id.as_str())
    .bind(&identity.display_name)
    .bind(identity.public_key.as_bytes().as_slice())
    .bind(identity.created_at.timestamp_millis())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_public_key(
    conn: &mut SqliteConnection,
    record: &PublicKeyRecord,
) -> Result<(), sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO public_keys (id, key, owner_identity_id)
        VALUES (?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.key.as_bytes().as_slice())
    .bind(record.owner_identity_id.as_str())
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let existing: Vec<u8> = sqlx::query_scalar("SELECT key FROM public_keys WHERE id = ?")
            .bind(record.id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        if existing.as_slice() != record.key.as_bytes().as_slice() {
            tracing::warn!("ignoring rewrite of public key record {}", record.id);
        }
    }
    Ok(())
}

/// Returns false if the owner already had a private key record
async fn insert_private_key(
    conn: &mut SqliteConnection,
    record: &PrivateKeyRecord,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO private_keys (owner_id, key_bytes)
        VALUES (?, ?)
        ON CONFLICT(owner_id) DO NOTHING
        "#,
    )
    .bind(record.owner_id.as_str())
    .bind(&record.key_bytes[..])
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn merge_change(conn: &mut SqliteConnection, change: &RecordChange) -> Result<(), sqlx::Error> {
    match change {
        RecordChange::UpsertIdentity(identity) => upsert_identity(conn, identity).await?,
        RecordChange::UpsertPublicKey(record) => insert_public_key(conn, record).await?,
        RecordChange::UpsertPrivateKey(record) => {
            if !insert_private_key(conn, record).await? {
                tracing::debug!("keeping existing private key for {}", record.owner_id);
            }
        }
        RecordChange::AppendMessage(message) => {
            sqlx::query(
                r#"
                INSERT INTO messages
                    (id, sender_public_key_ref, recipient_identity_ref, ciphertext, sent_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(message.id.to_string())
            .bind(message.sender_public_key_ref.to_string())
            .bind(message.recipient_identity_ref.as_str())
            .bind(&message.ciphertext)
            .bind(message.sent_at.timestamp_millis())
            .execute(&mut *conn)
            .await?;
        }
        RecordChange::DeleteIdentity(id) => {
            sqlx::query("DELETE FROM identities WHERE id = ?")
                .bind(id.as_str())
                .execute(&mut *conn)
                .await?;
        }
        RecordChange::DeletePublicKey(id) => {
            sqlx::query("DELETE FROM public_keys WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;
        }
        RecordChange::DeleteMessage(id) => {
            sqlx::query("DELETE FROM messages WHERE id = ?")
                .bind(id.to_string())
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl LocalCache for Database {
    async fn identity(&self, id: &RemoteId) -> Result<Option<Identity>, CacheError> {
        let row = sqlx::query(
            "SELECT id, display_name, public_key, created_at FROM identities WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&**self)
        .await
        .map_err(anyhow::Error::from)?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn public_key(&self, id: Uuid) -> Result<Option<PublicKeyRecord>, CacheError> {
        let row = sqlx::query("SELECT id, key, owner_identity_id FROM public_keys WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&**self)
            .await
            .map_err(anyhow::Error::from)?;
        row.as_ref().map(public_key_from_row).transpose()
    }

    async fn public_keys_for(
        &self,
        identity: &RemoteId,
    ) -> Result<Vec<PublicKeyRecord>, CacheError> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, owner_identity_id
            FROM public_keys
            WHERE owner_identity_id = ?
            ORDER BY rowid ASC
            "#,
        )
        .bind(identity.as_str())
        .fetch_all(&**self)
        .await
        .map_err(anyhow::Error::from)?;
        rows.iter().map(public_key_from_row).collect()
    }

    async fn private_key(&self, owner: &RemoteId) -> Result<Option<PrivateKeyRecord>, CacheError> {
        let bytes: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT key_bytes FROM private_keys WHERE owner_id = ?")
                .bind(owner.as_str())
                .fetch_optional(&**self)
                .await
                .map_err(anyhow::Error::from)?;

        bytes
            .map(|bytes| {
                let key_bytes: [u8; PRIVATE_KEY_SIZE] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| decode_err("private key length", bytes.len()))?;
                Ok(PrivateKeyRecord {
                    owner_id: owner.clone(),
                    key_bytes,
                })
            })
            .transpose()
    }

    async fn messages_for(&self, recipient: &RemoteId) -> Result<Vec<Message>, CacheError> {
        let rows = sqlx::query(
            r#"
            SELECT id, sender_public_key_ref, recipient_identity_ref, ciphertext, sent_at
            FROM messages
            WHERE recipient_identity_ref = ?
            ORDER BY sent_at ASC, id ASC
            "#,
        )
        .bind(recipient.as_str())
        .fetch_all(&**self)
        .await
        .map_err(anyhow::Error::from)?;
        rows.iter().map(message_from_row).collect()
    }

    async fn commit_provisioned(&self, records: ProvisionedRecords) -> Result<(), CacheError> {
        let mut tx = self.begin().await.map_err(anyhow::Error::from)?;

        // dropping `tx` without commit rolls everything back
        if !insert_private_key(&mut tx, &records.private_key)
            .await
            .map_err(anyhow::Error::from)?
        {
            return Err(CacheError::SaveConflict(records.private_key.owner_id));
        }
        upsert_identity(&mut tx, &records.identity)
            .await
            .map_err(anyhow::Error::from)?;
        insert_public_key(&mut tx, &records.public_key)
            .await
            .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn apply(&self, transaction: &ChangeTransaction) -> Result<(), CacheError> {
        let mut tx = self.begin().await.map_err(anyhow::Error::from)?;
        for change in &transaction.changes {
            merge_change(&mut tx, change)
                .await
                .map_err(anyhow::Error::from)?;
        }
        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        let mut tx = self.begin().await.map_err(anyhow::Error::from)?;
        for table in ["messages", "public_keys", "identities", "private_keys"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await
                .map_err(anyhow::Error::from)?;
        }
        tx.commit().await.map_err(anyhow::Error::from)?;
        tracing::info!("cleared local cache");
        Ok(())
    }
}
