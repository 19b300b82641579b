//! SQLite-backed short-term conversation memory.
//!
//! Holds the rolling per-channel chat history (trimmed to a bounded number of
//! turns), the bot-level ban list, and per-user naming preferences. All
//! access is serialized through one connection.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One remembered conversation turn.
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

#[derive(Debug)]
/// Bounded per-channel conversation memory plus moderation tables.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    max_messages: usize,
}

impl MemoryStore {
    /// Opens (creating if needed) the store at `path`. History is trimmed to
    /// `max_history_turns` user/assistant pairs per channel.
    pub fn open(path: impl AsRef<Path>, max_history_turns: usize) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open memory store {}", path.display()))?;
        conn.busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS chat_memory (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS bot_banned_users (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                banned_by INTEGER,
                reason TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (guild_id, user_id)
            );

            CREATE TABLE IF NOT EXISTS user_call_preferences (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                user_calls_bot TEXT,
                bot_calls_user TEXT,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (guild_id, user_id)
            );

            CREATE INDEX IF NOT EXISTS idx_chat_memory_channel_id_id
                ON chat_memory (channel_id, id);
            "#,
        )
        .context("failed to initialize memory store schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            max_messages: max_history_turns.saturating_mul(2).max(2),
        })
    }

    /// Appends one turn and trims the channel to the retention bound.
    pub fn append_message(&self, channel_id: u64, role: &str, content: &str) -> Result<()> {
        if role != "user" && role != "assistant" {
            bail!("invalid chat memory role: {role}");
        }

        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO chat_memory (channel_id, role, content) VALUES (?1, ?2, ?3)",
            params![channel_id, role, content],
        )
        .context("failed to append chat memory row")?;
        self.trim_channel(&conn, channel_id)?;
        Ok(())
    }

    /// Returns the retained turns for `channel_id` in chronological order.
    pub fn history(&self, channel_id: u64) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock_conn();
        let mut statement = conn
            .prepare(
                "SELECT role, content FROM chat_memory
                 WHERE channel_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .context("failed to prepare history query")?;
        let mut rows = statement
            .query_map(params![channel_id, self.max_messages], |row| {
                Ok(HistoryEntry {
                    role: row.get(0)?,
                    content: row.get(1)?,
                })
            })
            .context("failed to query chat history")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read chat history rows")?;
        rows.reverse();
        Ok(rows)
    }

    pub fn clear_channel(&self, channel_id: u64) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM chat_memory WHERE channel_id = ?1",
            params![channel_id],
        )
        .context("failed to clear channel history")?;
        Ok(())
    }

    /// Upserts a ban row. Returns true when the user was not already banned.
    pub fn ban_user(
        &self,
        guild_id: u64,
        user_id: u64,
        banned_by: Option<u64>,
        reason: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock_conn();
        let existed = conn
            .query_row(
                "SELECT 1 FROM bot_banned_users WHERE guild_id = ?1 AND user_id = ?2 LIMIT 1",
                params![guild_id, user_id],
                |_| Ok(()),
            )
            .optional()
            .context("failed to probe ban row")?
            .is_some();

        conn.execute(
            "INSERT INTO bot_banned_users (guild_id, user_id, banned_by, reason)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(guild_id, user_id) DO UPDATE SET
                 banned_by = excluded.banned_by,
                 reason = excluded.reason,
                 updated_at = CURRENT_TIMESTAMP",
            params![guild_id, user_id, banned_by, reason],
        )
        .context("failed to upsert ban row")?;
        Ok(!existed)
    }

    /// Removes a ban row. Returns true when a row was actually deleted.
    pub fn unban_user(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let conn = self.lock_conn();
        let affected = conn
            .execute(
                "DELETE FROM bot_banned_users WHERE guild_id = ?1 AND user_id = ?2",
                params![guild_id, user_id],
            )
            .context("failed to delete ban row")?;
        Ok(affected > 0)
    }

    pub fn is_user_banned(&self, guild_id: u64, user_id: u64) -> Result<bool> {
        let conn = self.lock_conn();
        let banned = conn
            .query_row(
                "SELECT 1 FROM bot_banned_users WHERE guild_id = ?1 AND user_id = ?2 LIMIT 1",
                params![guild_id, user_id],
                |_| Ok(()),
            )
            .optional()
            .context("failed to probe ban row")?
            .is_some();
        Ok(banned)
    }

    /// Stores how the user addresses the bot.
    pub fn set_user_calls_bot(&self, guild_id: u64, user_id: u64, call_name: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO user_call_preferences (guild_id, user_id, user_calls_bot)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, user_id) DO UPDATE SET
                 user_calls_bot = excluded.user_calls_bot,
                 updated_at = CURRENT_TIMESTAMP",
            params![guild_id, user_id, call_name],
        )
        .context("failed to upsert user call preference")?;
        Ok(())
    }

    /// Stores how the bot addresses the user.
    pub fn set_bot_calls_user(&self, guild_id: u64, user_id: u64, call_name: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT INTO user_call_preferences (guild_id, user_id, bot_calls_user)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(guild_id, user_id) DO UPDATE SET
                 bot_calls_user = excluded.bot_calls_user,
                 updated_at = CURRENT_TIMESTAMP",
            params![guild_id, user_id, call_name],
        )
        .context("failed to upsert bot call preference")?;
        Ok(())
    }

    /// Returns `(user_calls_bot, bot_calls_user)` for the pair, if stored.
    pub fn call_preferences(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<(Option<String>, Option<String>)> {
        let conn = self.lock_conn();
        let row = conn
            .query_row(
                "SELECT user_calls_bot, bot_calls_user FROM user_call_preferences
                 WHERE guild_id = ?1 AND user_id = ?2 LIMIT 1",
                params![guild_id, user_id],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()
            .context("failed to read call preferences")?;
        Ok(row.unwrap_or((None, None)))
    }

    /// Drops history for channels whose newest row is older than `idle`.
    pub fn prune_inactive_channels(&self, idle: Duration) -> Result<()> {
        let idle_seconds = idle.as_secs();
        if idle_seconds == 0 {
            return Ok(());
        }

        let conn = self.lock_conn();
        conn.execute(
            "DELETE FROM chat_memory
             WHERE channel_id IN (
                 SELECT channel_id FROM chat_memory
                 GROUP BY channel_id
                 HAVING MAX(created_at) < datetime('now', ?1)
             )",
            params![format!("-{idle_seconds} seconds")],
        )
        .context("failed to prune inactive channels")?;
        Ok(())
    }

    fn trim_channel(&self, conn: &Connection, channel_id: u64) -> Result<()> {
        let cutoff_id = conn
            .query_row(
                "SELECT id FROM chat_memory
                 WHERE channel_id = ?1 ORDER BY id DESC LIMIT 1 OFFSET ?2",
                params![channel_id, self.max_messages - 1],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("failed to locate trim cutoff")?;

        if let Some(cutoff_id) = cutoff_id {
            conn.execute(
                "DELETE FROM chat_memory WHERE channel_id = ?1 AND id < ?2",
                params![channel_id, cutoff_id],
            )
            .context("failed to trim channel history")?;
        }
        Ok(())
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("memory store lock poisoned")
    }
}
