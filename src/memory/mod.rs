pub mod dialogs;
pub mod messages;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub use dialogs::{Dialog, Instance};
pub use messages::{Message, NewMessage, Role};

/// Thread-safe SQLite store for instances, dialogs and their messages.
///
/// The connection mutex serializes single statements. It does not make a
/// read-then-append sequence atomic; turn ordering comes from the
/// per-instance lock held by the orchestrator.
#[derive(Clone)]
pub struct MemoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl MemoryStore {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        // Migrate before wrapping in the async Mutex so this stays callable
        // from a plain thread.
        Self::run_migrations(&conn)?;

        info!("Memory store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS instances (
                id INTEGER PRIMARY KEY,
                bot_codename TEXT NOT NULL,
                username TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS dialogs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                instance_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (instance_id) REFERENCES instances(id)
            );

            CREATE INDEX IF NOT EXISTS idx_dialogs_instance
                ON dialogs(instance_id);

            -- sequence_id is unique per dialog so a second writer fails
            -- instead of silently duplicating a position.
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                dialog_id INTEGER NOT NULL,
                sequence_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                photo TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (dialog_id) REFERENCES dialogs(id),
                UNIQUE (dialog_id, sequence_id)
            );
            ",
        )
        .context("Failed to run migrations")?;
        Ok(())
    }
}
