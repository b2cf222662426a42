//! Database layer: migrations and the SQLite implementation of the core
//! repository traits.
//!
//! Every table keeps the full record as a JSON `body` next to the columns
//! that queries filter or order on. Posting writes are compare-and-set on
//! the `version` column; read-modify-write paths on users and messages are
//! serialised through a process-wide writer lock. A lifecycle transition is
//! committed in one SQLite transaction, so a failure part-way leaves neither
//! the posting nor its side effects behind.

use std::str::FromStr;

use async_trait::async_trait;
use foodbridge_core::storage::{
    EventRepository, MessageRepository, NotificationRepository, PostingRepository, StoreResult,
    TransitionCommit, UserChange, UserRepository,
};
use foodbridge_core::{
    ChatMessage, Notification, Posting, PostingEvent, PostingId, StoreError, User,
};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Executor, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::Result;

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    // An in-memory database exists per connection, so keep exactly one alive.
    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(5)
    }
    .connect_with(options)
    .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Encoding helpers
// ─────────────────────────────────────────────────────────

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn insert_error(id: &str, e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(id.to_string()),
        _ => backend(e),
    }
}

fn encode<T: Serialize>(record: &T) -> StoreResult<String> {
    serde_json::to_string(record).map_err(backend)
}

fn decode<T: DeserializeOwned>(body: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(backend)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<(String,)>) -> StoreResult<Vec<T>> {
    rows.iter().map(|(body,)| decode(body)).collect()
}

/// Conditional write of `stored` over the row still at `expected`.
/// Returns the number of rows touched (0 or 1).
async fn write_if_version<'e, E>(executor: E, stored: &Posting, expected: u64) -> StoreResult<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let body = encode(stored)?;
    let affected = sqlx::query(
        "UPDATE postings SET status = ?1, version = ?2, body = ?3 WHERE id = ?4 AND version = ?5",
    )
    .bind(stored.status.as_str())
    .bind(stored.version as i64)
    .bind(body)
    .bind(&stored.id)
    .bind(expected as i64)
    .execute(executor)
    .await
    .map_err(backend)?
    .rows_affected();
    Ok(affected)
}

// ─────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────

pub struct SqliteStore {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            writer: Mutex::new(()),
        }
    }

    async fn stored_version(&self, id: &str) -> StoreResult<Option<u64>> {
        version_of(&self.pool, id).await
    }
}

async fn version_of<'e, E>(executor: E, id: &str) -> StoreResult<Option<u64>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM postings WHERE id = ?1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(backend)?;
    Ok(row.map(|(v,)| v as u64))
}

fn stale(posting: &Posting, found: Option<u64>) -> StoreError {
    match found {
        None => StoreError::NotFound,
        Some(found) => StoreError::Conflict {
            id: posting.id.clone(),
            expected: posting.version,
            found,
        },
    }
}

#[async_trait]
impl PostingRepository for SqliteStore {
    async fn all_postings(&self) -> StoreResult<Vec<Posting>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM postings ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        decode_all(rows)
    }

    async fn get_posting(&self, id: &str) -> StoreResult<Option<Posting>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM postings WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn insert_posting(&self, posting: &Posting) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO postings (id, status, donor_id, version, body, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&posting.id)
        .bind(posting.status.as_str())
        .bind(&posting.donor_id)
        .bind(posting.version as i64)
        .bind(encode(posting)?)
        .bind(posting.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(&posting.id, e))?;
        Ok(())
    }

    async fn update_posting(&self, posting: &Posting) -> StoreResult<Posting> {
        let mut stored = posting.clone();
        stored.version = posting.version + 1;

        if write_if_version(&self.pool, &stored, posting.version).await? == 1 {
            return Ok(stored);
        }
        Err(stale(posting, self.stored_version(&posting.id).await?))
    }

    async fn update_postings(&self, postings: &[Posting]) -> StoreResult<Vec<PostingId>> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut skipped = Vec::new();
        for posting in postings {
            let mut stored = posting.clone();
            stored.version = posting.version + 1;
            if write_if_version(&mut *tx, &stored, posting.version).await? == 0 {
                skipped.push(posting.id.clone());
            }
        }
        tx.commit().await.map_err(backend)?;
        Ok(skipped)
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> StoreResult<Posting> {
        let _guard = self.writer.lock().await;
        let posting = &commit.posting;
        let mut stored = posting.clone();
        stored.version = posting.version + 1;

        // Dropping `tx` on any early return rolls everything back.
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if write_if_version(&mut *tx, &stored, posting.version).await? == 0 {
            let found = version_of(&mut *tx, &posting.id).await?;
            return Err(stale(posting, found));
        }

        for (user_id, delta) in &commit.user_deltas {
            let row: Option<(String,)> = sqlx::query_as("SELECT body FROM users WHERE id = ?1")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;
            let mut user: User = decode(&row.ok_or(StoreError::NotFound)?.0)?;
            delta.apply(&mut user);
            sqlx::query("UPDATE users SET body = ?1 WHERE id = ?2")
                .bind(encode(&user)?)
                .bind(user_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }

        for n in &commit.notifications {
            sqlx::query(
                "INSERT INTO notifications (id, user_id, is_read, body) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&n.id)
            .bind(&n.user_id)
            .bind(n.is_read)
            .bind(encode(n)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(&n.id, e))?;
        }

        if let Some(event) = &commit.event {
            insert_event(&mut *tx, event).await?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(stored)
    }
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn all_users(&self) -> StoreResult<Vec<User>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM users ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        decode_all(rows)
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT body FROM users WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|(body,)| decode(&body)).transpose()
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        sqlx::query("INSERT INTO users (id, role, body, created_at) VALUES (?1, ?2, ?3, ?4)")
            .bind(&user.id)
            .bind(user.role.as_str())
            .bind(encode(user)?)
            .bind(user.created_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(&user.id, e))?;
        Ok(())
    }

    async fn modify_user(&self, id: &str, change: UserChange<'_>) -> StoreResult<User> {
        let _guard = self.writer.lock().await;
        let mut user = self.get_user(id).await?.ok_or(StoreError::NotFound)?;
        change(&mut user);
        sqlx::query("UPDATE users SET body = ?1 WHERE id = ?2")
            .bind(encode(&user)?)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(user)
    }
}

#[async_trait]
impl NotificationRepository for SqliteStore {
    async fn push_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for n in notifications {
            sqlx::query(
                "INSERT INTO notifications (id, user_id, is_read, body) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&n.id)
            .bind(&n.user_id)
            .bind(n.is_read)
            .bind(encode(n)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error(&n.id, e))?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let rows: Vec<(String, bool)> = sqlx::query_as(
            "SELECT body, is_read FROM notifications WHERE user_id = ?1 ORDER BY seq DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        // The column is authoritative for the read flag.
        rows.into_iter()
            .map(|(body, is_read)| {
                let mut n: Notification = decode(&body)?;
                n.is_read = is_read;
                Ok(n)
            })
            .collect()
    }

    async fn mark_notification_read(&self, id: &str) -> StoreResult<bool> {
        let affected = sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?
            .rows_affected();
        Ok(affected > 0)
    }
}

#[async_trait]
impl MessageRepository for SqliteStore {
    async fn push_message(&self, message: &ChatMessage) -> StoreResult<()> {
        sqlx::query("INSERT INTO messages (id, posting_id, body) VALUES (?1, ?2, ?3)")
            .bind(&message.id)
            .bind(&message.posting_id)
            .bind(encode(message)?)
            .execute(&self.pool)
            .await
            .map_err(|e| insert_error(&message.id, e))?;
        Ok(())
    }

    async fn messages_for(&self, posting_id: &str) -> StoreResult<Vec<ChatMessage>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM messages WHERE posting_id = ?1 ORDER BY seq ASC")
            .bind(posting_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        decode_all(rows)
    }

    async fn mark_messages_read(&self, posting_id: &str, reader_id: &str) -> StoreResult<usize> {
        let _guard = self.writer.lock().await;
        let thread = self.messages_for(posting_id).await?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut marked = 0;
        for mut message in thread {
            if message.sender_id == reader_id || !message.read_by.insert(reader_id.to_string()) {
                continue;
            }
            sqlx::query("UPDATE messages SET body = ?1 WHERE id = ?2")
                .bind(encode(&message)?)
                .bind(&message.id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            marked += 1;
        }
        tx.commit().await.map_err(backend)?;
        Ok(marked)
    }
}

#[async_trait]
impl EventRepository for SqliteStore {
    async fn append_event(&self, event: &PostingEvent) -> StoreResult<()> {
        insert_event(&self.pool, event).await
    }

    async fn events_for(&self, posting_id: &str) -> StoreResult<Vec<PostingEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT body FROM posting_events WHERE posting_id = ?1 ORDER BY seq ASC",
        )
        .bind(posting_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        decode_all(rows)
    }

    async fn all_events(&self) -> StoreResult<Vec<PostingEvent>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT body FROM posting_events ORDER BY seq ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        decode_all(rows)
    }
}

async fn insert_event<'e, E>(executor: E, event: &PostingEvent) -> StoreResult<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO posting_events (id, posting_id, kind, actor_id, body)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(&event.id)
    .bind(&event.posting_id)
    .bind(event.kind.as_str())
    .bind(&event.actor_id)
    .bind(encode(event)?)
    .execute(executor)
    .await
    .map_err(|e| insert_error(&event.id, e))?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
