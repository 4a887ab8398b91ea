//! Persistent record of every cooker that has ever connected.
//!
//! The table is intentionally small: identity, a hashed secret and an
//! optional owning user. The live state lives in the manager; this store
//! only has to survive restarts so pairing and bearer auth keep working.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, params};
use rust_embed::Embed;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::task;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cooker::Manager;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRecord {
    pub id: Uuid,
    pub id_card: String,
    pub user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Embed)]
#[folder = "./migrations/duckdb"]
struct Migrations;

fn hash_secret(secret_key: &str) -> String {
    let digest = Sha256::digest(secret_key.as_bytes());
    format!("{digest:x}")
}

fn record_from_row(row: &duckdb::Row<'_>) -> Result<DeviceRecord, duckdb::Error> {
    Ok(DeviceRecord {
        id: row.get("id")?,
        id_card: row.get("id_card")?,
        user_id: row.get("user_id")?,
        created_at: row.get("created_at")?,
    })
}

impl Store {
    pub async fn open(file: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = file.as_ref().to_path_buf();
        let conn = task::spawn_blocking(move || -> anyhow::Result<Arc<Mutex<Connection>>> {
            let conn = Connection::open(file)?;

            conn.execute_batch(
                r#"
                    SET timezone='UTC';
                "#,
            )?;

            for migration in Migrations::iter() {
                tracing::info!("Executing migration {}", migration);
                let file = Migrations::get(&migration).expect("migration file");
                conn.execute_batch(std::str::from_utf8(&file.data)?)?;
            }

            Ok(Arc::new(Mutex::new(conn)))
        })
        .await??;

        Ok(Self { conn })
    }

    /// Insert-or-fetch keyed on `id_card`. The secret is stored as a SHA-256
    /// digest; a cooker that already has a row keeps its original secret.
    pub async fn register_device(
        &self,
        id_card: &str,
        secret_key: &str,
    ) -> anyhow::Result<DeviceRecord> {
        let conn = self.conn.clone();
        let id_card = id_card.to_string();
        let hashed = hash_secret(secret_key);
        task::spawn_blocking(move || {
            let conn = conn.lock().expect("poisoned mutex in db::Store::register_device");
            let mut insert = conn.prepare_cached(
                r#"
                    INSERT INTO devices (id, id_card, secret_key)
                    VALUES (?, ?, ?)
                    ON CONFLICT (id_card) DO NOTHING
                "#,
            )?;
            insert.execute(params![Uuid::new_v4(), id_card, hashed])?;

            let mut select = conn.prepare_cached(
                r#"
                    SELECT id, id_card, user_id, created_at
                    FROM devices
                    WHERE id_card = ?
                "#,
            )?;
            Ok(select.query_one(params![id_card], record_from_row)?)
        })
        .await?
    }

    pub async fn device_by_id_card(&self, id_card: &str) -> anyhow::Result<Option<DeviceRecord>> {
        let conn = self.conn.clone();
        let id_card = id_card.to_string();
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                r#"
                    SELECT id, id_card, user_id, created_at
                    FROM devices
                    WHERE id_card = ?
                "#,
            )?;
            Ok(stmt
                .query_one(params![id_card], record_from_row)
                .optional()?)
        })
        .await?
    }

    /// Compares a presented secret against the stored digest.
    pub async fn verify_secret(&self, id_card: &str, secret_key: &str) -> anyhow::Result<bool> {
        let conn = self.conn.clone();
        let id_card = id_card.to_string();
        let hashed = hash_secret(secret_key);
        task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                r#"
                    SELECT secret_key
                    FROM devices
                    WHERE id_card = ?
                "#,
            )?;
            let stored: Option<String> = stmt
                .query_one(params![id_card], |row| row.get(0))
                .optional()?;
            Ok(stored.is_some_and(|stored| stored == hashed))
        })
        .await?
    }

    /// Registers every connecting cooker in the background, off the
    /// manager's callback path.
    pub fn watch_connections(&self, manager: &Manager) {
        let store = self.clone();
        manager.on_device_connected(move |device| {
            let store = store.clone();
            let id_card = device.id_card().to_string();
            let secret_key = device.secret_key().to_string();
            tokio::spawn(async move {
                match store.register_device(&id_card, &secret_key).await {
                    Ok(record) => {
                        debug!(device = %id_card, record_id = %record.id, "device registered")
                    }
                    Err(err) => {
                        error!(device = %id_card, %err, "failed to register device")
                    }
                }
            });
        });
        info!("device store watching for connections");
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn setup_test_db() -> anyhow::Result<(TempDir, Store)> {
        let tmp_dir = TempDir::new()?;
        let db_file = tmp_dir.path().join("test.db");
        let store = Store::open(&db_file).await?;
        Ok((tmp_dir, store))
    }

    #[tokio::test]
    async fn register_is_insert_or_fetch() -> anyhow::Result<()> {
        let (_dbf, store) = setup_test_db().await?;

        let first = store.register_device("A1B2C3", "secret-1").await?;
        assert_eq!(first.id_card, "A1B2C3");
        assert!(first.user_id.is_none());

        // Registering again keeps the original row and secret.
        let second = store.register_device("A1B2C3", "secret-2").await?;
        assert_eq!(second.id, first.id);
        assert!(store.verify_secret("A1B2C3", "secret-1").await?);
        assert!(!store.verify_secret("A1B2C3", "secret-2").await?);
        Ok(())
    }

    #[tokio::test]
    async fn lookup_missing_device_returns_none() -> anyhow::Result<()> {
        let (_dbf, store) = setup_test_db().await?;
        assert!(store.device_by_id_card("nope").await?.is_none());
        assert!(!store.verify_secret("nope", "whatever").await?);
        Ok(())
    }

    #[tokio::test]
    async fn secrets_are_stored_hashed() -> anyhow::Result<()> {
        let (_dbf, store) = setup_test_db().await?;
        store.register_device("X", "plaintext").await?;

        let conn = store.conn.lock().unwrap();
        let stored: String = conn.query_row(
            "SELECT secret_key FROM devices WHERE id_card = ?",
            params!["X"],
            |row| row.get(0),
        )?;
        assert_ne!(stored, "plaintext");
        assert_eq!(stored, hash_secret("plaintext"));
        Ok(())
    }
}
