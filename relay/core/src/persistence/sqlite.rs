//! SQLite-backed persistence
//!
//! One database file holds users, the chat log, system prompts, global
//! settings and the active chat contexts. The connection sits behind a
//! mutex and every call runs on the blocking thread pool.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{PersistenceError, PromptFilter, SessionPersistence, StoredSettings, SystemPrompt};
use crate::session::{ChatMessage, ConversationKey, MessageRole, Session};
use crate::settings::GlobalSettings;
use crate::store::SessionMap;

/// Temperature for rows written before the column existed
const LEGACY_TEMPERATURE: f32 = 0.7;

const SCHEMA: &str = r"
    PRAGMA foreign_keys = ON;

    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        name TEXT
    );

    CREATE TABLE IF NOT EXISTS chats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER REFERENCES users(id),
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS system_prompts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER,
        prompt TEXT NOT NULL,
        is_global BOOLEAN NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS global_settings (
        id INTEGER PRIMARY KEY,
        modelname TEXT,
        selected_prompt_id INTEGER,
        temperature REAL
    );

    CREATE TABLE IF NOT EXISTS active_chat_contexts (
        chat_key TEXT PRIMARY KEY,
        modelname TEXT NOT NULL,
        selected_prompt_id INTEGER,
        messages_json TEXT,
        stream BOOLEAN NOT NULL,
        temperature REAL
    );
";

/// SQLite storage
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").field("path", &self.path).finish()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        let target = path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, PersistenceError> {
            let conn = Connection::open(&target)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))??;

        tracing::info!(path = %path.display(), "Opened SQLite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    /// Create an in-memory database
    ///
    /// # Errors
    ///
    /// Fails if the schema cannot be created.
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Database file, `None` for in-memory stores
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<F, R>(&self, f: F) -> Result<R, PersistenceError>
    where
        F: FnOnce(&mut Connection) -> Result<R, PersistenceError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| PersistenceError::Unavailable("connection lock poisoned".into()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))?
    }
}

fn encode_messages(messages: &[ChatMessage]) -> Result<Option<String>, PersistenceError> {
    if messages.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(messages)?))
}

fn decode_messages(json: Option<&str>) -> Result<Vec<ChatMessage>, PersistenceError> {
    match json {
        Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(json)?),
        _ => Ok(Vec::new()),
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or_else(|_| {
            tracing::warn!(value = raw, "Unparseable timestamp in database");
            DateTime::<Utc>::default()
        })
}

/// SQLite REAL columns hold f64; temperatures are stored from f32
#[allow(clippy::cast_possible_truncation)]
fn narrow(value: f64) -> f32 {
    value as f32
}

fn insert_session(
    conn: &Connection,
    key: &ConversationKey,
    session: &Session,
) -> Result<(), PersistenceError> {
    conn.execute(
        "REPLACE INTO active_chat_contexts
            (chat_key, modelname, selected_prompt_id, messages_json, stream, temperature)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            key.as_str(),
            session.model,
            session.selected_prompt_id,
            encode_messages(&session.messages)?,
            session.stream,
            f64::from(session.temperature),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl SessionPersistence for SqliteStore {
    async fn load_all_sessions(&self) -> Result<SessionMap, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_key, modelname, selected_prompt_id, messages_json, stream, temperature
                 FROM active_chat_contexts",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, Option<f64>>(5)?,
                ))
            })?;

            let mut sessions = SessionMap::new();
            for row in rows {
                let (key, model, selected_prompt_id, messages_json, stream, temperature) = row?;
                let temperature = temperature.map_or(LEGACY_TEMPERATURE, narrow);
                let session = Session {
                    model,
                    messages: decode_messages(messages_json.as_deref())?,
                    stream,
                    temperature,
                    selected_prompt_id,
                };
                sessions.insert(ConversationKey(key), session);
            }
            Ok(sessions)
        })
        .await
    }

    async fn save_all_sessions(&self, sessions: &SessionMap) -> Result<(), PersistenceError> {
        let sessions = sessions.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM active_chat_contexts", [])?;
            for (key, session) in &sessions {
                insert_session(&tx, key, session)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn save_session(
        &self,
        key: &ConversationKey,
        session: &Session,
    ) -> Result<(), PersistenceError> {
        let key = key.clone();
        let session = session.clone();
        self.with_conn(move |conn| insert_session(conn, &key, &session))
            .await
    }

    async fn delete_session(&self, key: &ConversationKey) -> Result<(), PersistenceError> {
        let key = key.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM active_chat_contexts WHERE chat_key = ?1",
                params![key.as_str()],
            )?;
            Ok(())
        })
        .await
    }

    async fn load_global_settings(&self) -> Result<Option<StoredSettings>, PersistenceError> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT modelname, selected_prompt_id, temperature
                     FROM global_settings ORDER BY id LIMIT 1",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, Option<String>>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                            row.get::<_, Option<f64>>(2)?,
                        ))
                    },
                )
                .optional()?;

            Ok(row.map(|(model, selected_prompt_id, temperature)| StoredSettings {
                model,
                selected_prompt_id,
                default_temperature: temperature.map(narrow),
            }))
        })
        .await
    }

    async fn save_global_settings(
        &self,
        settings: &GlobalSettings,
    ) -> Result<(), PersistenceError> {
        let settings = settings.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO global_settings (id, modelname, selected_prompt_id, temperature)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                    modelname = excluded.modelname,
                    selected_prompt_id = excluded.selected_prompt_id,
                    temperature = excluded.temperature",
                params![
                    settings.model,
                    settings.selected_prompt_id,
                    f64::from(settings.default_temperature),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn system_prompts(
        &self,
        filter: PromptFilter,
    ) -> Result<Vec<SystemPrompt>, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, prompt, is_global, created_at
                 FROM system_prompts
                 WHERE (?1 IS NULL OR user_id = ?1 OR user_id IS NULL OR is_global = 1)
                   AND (?2 IS NULL OR is_global = ?2)
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![filter.user_id, filter.is_global], |row| {
                Ok(SystemPrompt {
                    id: row.get(0)?,
                    owner_id: row.get(1)?,
                    text: row.get(2)?,
                    is_global: row.get(3)?,
                    created_at: parse_timestamp(&row.get::<_, String>(4)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn system_prompt(&self, id: i64) -> Result<Option<SystemPrompt>, PersistenceError> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, prompt, is_global, created_at
                     FROM system_prompts WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(SystemPrompt {
                            id: row.get(0)?,
                            owner_id: row.get(1)?,
                            text: row.get(2)?,
                            is_global: row.get(3)?,
                            created_at: parse_timestamp(&row.get::<_, String>(4)?),
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn add_system_prompt(
        &self,
        owner_id: Option<i64>,
        text: &str,
        is_global: bool,
    ) -> Result<i64, PersistenceError> {
        let text = text.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO system_prompts (user_id, prompt, is_global, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![owner_id, text, is_global, Utc::now().to_rfc3339()],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn delete_system_prompt(&self, id: i64) -> Result<bool, PersistenceError> {
        self.with_conn(move |conn| {
            let removed = conn.execute("DELETE FROM system_prompts WHERE id = ?1", params![id])?;
            Ok(removed > 0)
        })
        .await
    }

    async fn log_chat_message(
        &self,
        user_id: i64,
        user_name: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<(), PersistenceError> {
        let user_name = user_name.to_string();
        let content = content.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO users (id, name) VALUES (?1, ?2)",
                params![user_id, user_name],
            )?;
            tx.execute(
                "INSERT INTO chats (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![user_id, role.as_str(), content, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }
}
