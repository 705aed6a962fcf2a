use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;

use super::messages::parse_timestamp;
use super::MemoryStore;

/// A deployed binding of a bot to an owner. Turns are serialized per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: i64,
    pub bot_codename: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// A conversation thread, loaded together with its owning instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dialog {
    pub id: i64,
    pub instance: Instance,
    pub created_at: DateTime<Utc>,
}

impl MemoryStore {
    /// Insert an instance, or update its bot and username if it already exists.
    pub async fn upsert_instance(
        &self,
        id: i64,
        bot_codename: &str,
        username: &str,
    ) -> Result<Instance> {
        let created_at = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO instances (id, bot_codename, username, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                bot_codename = excluded.bot_codename,
                username = excluded.username",
            rusqlite::params![id, bot_codename, username, created_at.to_rfc3339()],
        )
        .with_context(|| format!("Failed to upsert instance {}", id))?;

        let (bot_codename, username, created_at): (String, String, String) = conn
            .query_row(
                "SELECT bot_codename, username, created_at FROM instances WHERE id = ?1",
                rusqlite::params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read back instance")?;

        Ok(Instance {
            id,
            bot_codename,
            username,
            created_at: parse_timestamp(&created_at)?,
        })
    }

    /// Start a new dialog for an instance. Returns `None` if the instance does
    /// not exist.
    pub async fn create_dialog(&self, instance_id: i64) -> Result<Option<Dialog>> {
        let created_at = Utc::now();
        let dialog_id = {
            let conn = self.conn.lock().await;
            let exists: bool = conn
                .query_row(
                    "SELECT count(*) > 0 FROM instances WHERE id = ?1",
                    rusqlite::params![instance_id],
                    |row| row.get(0),
                )
                .context("Failed to look up instance")?;
            if !exists {
                return Ok(None);
            }

            conn.execute(
                "INSERT INTO dialogs (instance_id, created_at) VALUES (?1, ?2)",
                rusqlite::params![instance_id, created_at.to_rfc3339()],
            )
            .context("Failed to create dialog")?;
            conn.last_insert_rowid()
        };

        self.load_dialog(dialog_id).await
    }

    /// Load a dialog together with its instance.
    pub async fn load_dialog(&self, dialog_id: i64) -> Result<Option<Dialog>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT d.created_at, i.id, i.bot_codename, i.username, i.created_at
                 FROM dialogs d
                 JOIN instances i ON i.id = d.instance_id
                 WHERE d.id = ?1",
                rusqlite::params![dialog_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("Failed to load dialog {}", dialog_id))?;

        let Some((dialog_created, instance_id, bot_codename, username, instance_created)) = row
        else {
            return Ok(None);
        };

        Ok(Some(Dialog {
            id: dialog_id,
            instance: Instance {
                id: instance_id,
                bot_codename,
                username,
                created_at: parse_timestamp(&instance_created)?,
            },
            created_at: parse_timestamp(&dialog_created)?,
        }))
    }
}
