//! SQLite-backed advertisement and inbox storage

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use fg_proto::v1::{AdvertisementV1, Fingerprint, MessageV1};

use crate::adverts::{AdvertPolicy, AdvertStore};
use crate::inbox::{InboxStore, NewMessage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Storage lock poisoned")]
    Poisoned,
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// In-memory store for tests and throwaway directories.
///
/// Not durable: contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryStore {
    adverts: DashMap<Fingerprint, AdvertisementV1>,
    messages: Mutex<Vec<MessageV1>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvertStore for MemoryStore {
    async fn upsert_advert(
        &self,
        advert: &AdvertisementV1,
        policy: AdvertPolicy,
    ) -> Result<bool, StoreError> {
        match self.adverts.entry(advert.fingerprint.clone()) {
            Entry::Vacant(v) => {
                v.insert(advert.clone());
                Ok(true)
            }
            Entry::Occupied(mut o) => {
                if policy == AdvertPolicy::NewestTimestamp && advert.timestamp < o.get().timestamp {
                    return Ok(false);
                }
                o.insert(advert.clone());
                Ok(true)
            }
        }
    }

    async fn load_advert(&self, fingerprint: &Fingerprint) -> Result<Option<AdvertisementV1>, StoreError> {
        Ok(self.adverts.get(fingerprint).map(|a| a.value().clone()))
    }
}

#[async_trait]
impl InboxStore for MemoryStore {
    async fn append(&self, message: NewMessage) -> Result<u64, StoreError> {
        let mut messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        let id = messages.len() as u64 + 1;
        messages.push(message.with_id(id));
        Ok(id)
    }

    async fn fetch_by_id(&self, id: u64) -> Result<Option<MessageV1>, StoreError> {
        let messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn fetch_since(
        &self,
        receiver: &Fingerprint,
        last_id: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, StoreError> {
        let messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(messages
            .iter()
            .filter(|m| m.id > last_id && m.is_visible_to(receiver))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_from_sender(
        &self,
        receiver: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, StoreError> {
        let messages = self.messages.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(messages
            .iter()
            .filter(|m| &m.sender == sender && m.is_visible_to(receiver))
            .cloned()
            .collect())
    }
}

/// SQLite-based store
///
/// The connection mutex is the single ordering point for message ids;
/// `AUTOINCREMENT` keeps ids strictly increasing and never reused.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn).await
    }

    /// Private in-memory database, for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?).await
    }

    async fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Run `f` against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            // Acknowledged appends must survive a crash
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            conn.pragma_update(None, "synchronous", "FULL")?;

            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS adverts (
                    fingerprint TEXT PRIMARY KEY,
                    public_key BLOB NOT NULL,
                    capabilities TEXT NOT NULL,
                    timestamp INTEGER NOT NULL,
                    received_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS messages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    sender TEXT NOT NULL,
                    receiver TEXT,
                    payload BLOB NOT NULL,
                    received_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_receiver
                ON messages (receiver, id);

                CREATE INDEX IF NOT EXISTS idx_messages_sender
                ON messages (sender, id);
                "#,
            )?;
            Ok(())
        })
        .await
    }

    /// SQLite integers are signed; values past `i64::MAX` saturate
    fn to_sql_int(value: u64) -> i64 {
        i64::try_from(value).unwrap_or(i64::MAX)
    }

    fn fingerprint_column(row: &Row<'_>, idx: usize) -> Result<Fingerprint, rusqlite::Error> {
        let raw: String = row.get(idx)?;
        Fingerprint::try_from(raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn message_from_row(row: &Row<'_>) -> Result<MessageV1, rusqlite::Error> {
        let receiver = match row.get::<_, Option<String>>(2)? {
            Some(raw) => Some(
                Fingerprint::try_from(raw)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
            ),
            None => None,
        };
        Ok(MessageV1 {
            id: row.get::<_, i64>(0)? as u64,
            sender: Self::fingerprint_column(row, 1)?,
            receiver,
            payload: row.get(3)?,
            received_at: row.get::<_, i64>(4)? as u64,
        })
    }
}

#[async_trait]
impl AdvertStore for SqliteStore {
    async fn upsert_advert(
        &self,
        advert: &AdvertisementV1,
        policy: AdvertPolicy,
    ) -> Result<bool, StoreError> {
        let capabilities = serde_json::to_string(&advert.capabilities)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let advert = advert.clone();

        let sql = match policy {
            AdvertPolicy::ArrivalOrder => {
                r#"
                INSERT INTO adverts (fingerprint, public_key, capabilities, timestamp, received_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    public_key = excluded.public_key,
                    capabilities = excluded.capabilities,
                    timestamp = excluded.timestamp,
                    received_at = excluded.received_at
                "#
            }
            AdvertPolicy::NewestTimestamp => {
                r#"
                INSERT INTO adverts (fingerprint, public_key, capabilities, timestamp, received_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    public_key = excluded.public_key,
                    capabilities = excluded.capabilities,
                    timestamp = excluded.timestamp,
                    received_at = excluded.received_at
                WHERE excluded.timestamp >= adverts.timestamp
                "#
            }
        };

        self.with_conn(move |conn| {
            let changed = conn.execute(
                sql,
                params![
                    advert.fingerprint.as_str(),
                    advert.public_key,
                    capabilities,
                    Self::to_sql_int(advert.timestamp),
                    Self::to_sql_int(advert.received_at),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn load_advert(&self, fingerprint: &Fingerprint) -> Result<Option<AdvertisementV1>, StoreError> {
        let key = fingerprint.clone();
        let row = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT public_key, capabilities, timestamp, received_at FROM adverts WHERE fingerprint = ?1",
                )?;
                let row = stmt
                    .query_row(params![key.as_str()], |row| {
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, i64>(2)?,
                            row.get::<_, i64>(3)?,
                        ))
                    })
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((public_key, capabilities, timestamp, received_at)) = row else {
            return Ok(None);
        };
        let capabilities = serde_json::from_str(&capabilities)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Some(AdvertisementV1 {
            fingerprint: fingerprint.clone(),
            public_key,
            capabilities,
            timestamp: timestamp as u64,
            received_at: received_at as u64,
        }))
    }
}

#[async_trait]
impl InboxStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<u64, StoreError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (sender, receiver, payload, received_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    message.sender.as_str(),
                    message.receiver.as_ref().map(|r| r.as_str()),
                    message.payload,
                    Self::to_sql_int(message.received_at),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(id as u64)
        })
        .await
    }

    async fn fetch_by_id(&self, id: u64) -> Result<Option<MessageV1>, StoreError> {
        // No row id can exceed i64::MAX
        let Ok(id) = i64::try_from(id) else {
            return Ok(None);
        };
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender, receiver, payload, received_at FROM messages WHERE id = ?1",
            )?;
            Ok(stmt
                .query_row(params![id], Self::message_from_row)
                .optional()?)
        })
        .await
    }

    async fn fetch_since(
        &self,
        receiver: &Fingerprint,
        last_id: u64,
        limit: u32,
    ) -> Result<Vec<MessageV1>, StoreError> {
        let Ok(last_id) = i64::try_from(last_id) else {
            return Ok(Vec::new());
        };
        let receiver = receiver.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, sender, receiver, payload, received_at FROM messages
                WHERE id > ?1 AND (receiver = ?2 OR receiver IS NULL)
                ORDER BY id ASC
                LIMIT ?3
                "#,
            )?;
            let rows = stmt.query_map(
                params![last_id, receiver.as_str(), i64::from(limit)],
                Self::message_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn fetch_from_sender(
        &self,
        receiver: &Fingerprint,
        sender: &Fingerprint,
    ) -> Result<Vec<MessageV1>, StoreError> {
        let receiver = receiver.clone();
        let sender = sender.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, sender, receiver, payload, received_at FROM messages
                WHERE sender = ?1 AND (receiver = ?2 OR receiver IS NULL)
                ORDER BY id ASC
                "#,
            )?;
            let rows = stmt.query_map(
                params![sender.as_str(), receiver.as_str()],
                Self::message_from_row,
            )?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}
