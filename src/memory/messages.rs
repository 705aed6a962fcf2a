use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::MemoryStore;
use crate::domain::Photo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => anyhow::bail!("Unknown message role: {}", other),
        }
    }
}

/// A persisted turn record. Never edited once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub sequence_id: i64,
    pub dialog_id: i64,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<Photo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: Role,
    pub content: String,
    pub photo: Option<Photo>,
}

impl NewMessage {
    pub fn user(content: impl Into<String>, photo: Option<Photo>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            photo,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            photo: None,
        }
    }
}

struct MessageRow {
    sequence_id: i64,
    dialog_id: i64,
    role: String,
    content: String,
    photo: Option<String>,
    created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let photo = row
            .photo
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .context("Corrupt photo column")?;
        Ok(Message {
            sequence_id: row.sequence_id,
            dialog_id: row.dialog_id,
            role: row.role.parse()?,
            content: row.content,
            photo,
            created_at: parse_timestamp(&row.created_at)?,
        })
    }
}

const MESSAGE_COLUMNS: &str = "sequence_id, dialog_id, role, content, photo, created_at";

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        sequence_id: row.get(0)?,
        dialog_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        photo: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", value))
}

impl MemoryStore {
    /// Number of messages persisted for a dialog.
    pub async fn count_messages(&self, dialog_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn
            .query_row(
                "SELECT count(*) FROM messages WHERE dialog_id = ?1",
                rusqlite::params![dialog_id],
                |row| row.get(0),
            )
            .context("Failed to count messages")?;
        Ok(count)
    }

    /// Append a message at the end of a dialog.
    ///
    /// The sequence id is the message count at insertion time, so callers
    /// must hold the dialog's instance lock for ids to stay gap-free.
    pub async fn append_message(&self, dialog_id: i64, message: NewMessage) -> Result<Message> {
        let created_at = Utc::now();
        let photo_json = message
            .photo
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to encode photo")?;

        let conn = self.conn.lock().await;
        let sequence_id: i64 = conn
            .query_row(
                "SELECT count(*) FROM messages WHERE dialog_id = ?1",
                rusqlite::params![dialog_id],
                |row| row.get(0),
            )
            .context("Failed to count messages")?;

        conn.execute(
            "INSERT INTO messages (dialog_id, sequence_id, role, content, photo, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                dialog_id,
                sequence_id,
                message.role.as_str(),
                &message.content,
                &photo_json,
                created_at.to_rfc3339(),
            ],
        )
        .with_context(|| {
            format!(
                "Failed to append {} message to dialog {}",
                message.role, dialog_id
            )
        })?;

        Ok(Message {
            sequence_id,
            dialog_id,
            role: message.role,
            content: message.content,
            photo: message.photo,
            created_at,
        })
    }

    /// Most recent message of the given role in a dialog.
    pub async fn latest_message(&self, dialog_id: i64, role: Role) -> Result<Option<Message>> {
        let row = {
            let conn = self.conn.lock().await;
            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM messages
                         WHERE dialog_id = ?1 AND role = ?2
                         ORDER BY sequence_id DESC LIMIT 1",
                        MESSAGE_COLUMNS
                    ),
                    rusqlite::params![dialog_id, role.as_str()],
                    read_row,
                )
                .optional()
                .context("Failed to load latest message")?;
            row
        };
        row.map(Message::try_from).transpose()
    }

    /// All messages of a dialog in sequence order.
    pub async fn list_messages(&self, dialog_id: i64) -> Result<Vec<Message>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE dialog_id = ?1 ORDER BY sequence_id ASC",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![dialog_id], read_row)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to load messages")?;
            rows
        };
        rows.into_iter().map(Message::try_from).collect()
    }
}
