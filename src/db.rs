use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{FeedError, Result};
use crate::models::{Flag, StoryFlags};

/// Durable per-story flags, keyed by story id.
///
/// Reads and writes are synchronous. Ids that were never written read as
/// all-false. Entries are never expired.
pub trait FlagStore: Send + Sync {
    fn flag(&self, id: &str, flag: Flag) -> Result<bool>;

    fn set_flag(&self, id: &str, flag: Flag, value: bool) -> Result<()>;

    fn flags(&self, id: &str) -> Result<StoryFlags> {
        Ok(StoryFlags {
            visited: self.flag(id, Flag::Visited)?,
            upvoted: self.flag(id, Flag::Upvoted)?,
            replied: self.flag(id, Flag::Replied)?,
        })
    }
}

#[derive(Default)]
pub struct MemoryFlagStore {
    entries: Mutex<HashMap<String, StoryFlags>>,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlagStore for MemoryFlagStore {
    fn flag(&self, id: &str, flag: Flag) -> Result<bool> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| FeedError::Storage("Failed to lock flag store".to_string()))?;
        let flags = entries.get(id).copied().unwrap_or_default();
        Ok(match flag {
            Flag::Visited => flags.visited,
            Flag::Upvoted => flags.upvoted,
            Flag::Replied => flags.replied,
        })
    }

    fn set_flag(&self, id: &str, flag: Flag, value: bool) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| FeedError::Storage("Failed to lock flag store".to_string()))?;
        let flags = entries.entry(id.to_string()).or_default();
        match flag {
            Flag::Visited => flags.visited = value,
            Flag::Upvoted => flags.upvoted = value,
            Flag::Replied => flags.replied = value,
        }
        Ok(())
    }
}

/// SQLite-backed store for story flags and the saved access token.
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (creating if needed) `flags.db` inside `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir)
                .map_err(|e| FeedError::Storage(format!("Could not create {}: {e}", data_dir.display())))?;
        }
        Self::open(&data_dir.join("flags.db"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS story_flags (
                id TEXT PRIMARY KEY,
                visited INTEGER NOT NULL DEFAULT 0,
                upvoted INTEGER NOT NULL DEFAULT 0,
                replied INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS session (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FeedError::Storage("Failed to lock database connection".to_string()))
    }

    pub fn access_token(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        let token = conn
            .query_row(
                "SELECT value FROM session WHERE key = 'access_token'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(token)
    }

    pub fn set_access_token(&self, token: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        match token {
            Some(token) => conn.execute(
                "INSERT OR REPLACE INTO session (key, value) VALUES ('access_token', ?1)",
                params![token],
            )?,
            None => conn.execute("DELETE FROM session WHERE key = 'access_token'", [])?,
        };
        Ok(())
    }
}

impl FlagStore for Database {
    fn flag(&self, id: &str, flag: Flag) -> Result<bool> {
        let conn = self.lock()?;
        // Column names come from `Flag::column`, never from input.
        let sql = format!("SELECT {} FROM story_flags WHERE id = ?1", flag.column());
        let value: Option<i32> = conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?;
        Ok(value.unwrap_or(0) != 0)
    }

    fn set_flag(&self, id: &str, flag: Flag, value: bool) -> Result<()> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO story_flags (id, {col}, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET {col} = excluded.{col}, updated_at = excluded.updated_at",
            col = flag.column()
        );
        conn.execute(&sql, params![id, value as i32, Utc::now().to_rfc3339()])?;
        Ok(())
    }

    fn flags(&self, id: &str) -> Result<StoryFlags> {
        let conn = self.lock()?;
        let flags = conn
            .query_row(
                "SELECT visited, upvoted, replied FROM story_flags WHERE id = ?1",
                params![id],
                |row| {
                    Ok(StoryFlags {
                        visited: row.get::<_, i32>(0)? != 0,
                        upvoted: row.get::<_, i32>(1)? != 0,
                        replied: row.get::<_, i32>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(flags.unwrap_or_default())
    }
}
