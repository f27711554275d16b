//! Message store (§3 Message, §4.5). Modeled as a wide-column contract —
//! partitioned by `conversation_id`, clustered and paginated by
//! `message_id` — even though the concrete implementation here talks to
//! Postgres. Swapping the backing store later (Cassandra, ScyllaDB) means
//! implementing this trait again, not reshaping call sites.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub message_id: Uuid,
    pub sequence: i64,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, conversation_id: Uuid, sender_id: Uuid, body: &str) -> AppResult<Message>;

    async fn get(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<Message>;

    /// Page backward from `before` (exclusive) within the `conversation_id`
    /// partition, ordered by descending `sequence` — the clustering key.
    async fn page(
        &self,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;

    async fn edit(&self, conversation_id: Uuid, message_id: Uuid, body: &str) -> AppResult<Message>;

    async fn soft_delete(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<()>;
}

pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    async fn append(&self, conversation_id: Uuid, sender_id: Uuid, body: &str) -> AppResult<Message> {
        // `sequence` comes from a per-conversation monotonic counter
        // (conversation_sequences) rather than a shared auto-increment, so
        // message ordering survives a partition split the way a wide-column
        // clustering key would (§9 Design Notes: message ordering).
        let message = sqlx::query_as::<_, Message>(
            r#"
            WITH next_seq AS (
                INSERT INTO conversation_sequences (conversation_id, last_sequence)
                VALUES ($1, 1)
                ON CONFLICT (conversation_id)
                DO UPDATE SET last_sequence = conversation_sequences.last_sequence + 1
                RETURNING last_sequence
            )
            INSERT INTO messages (id, conversation_id, sender_id, body, sequence, created_at)
            SELECT $2, $1, $3, $4, next_seq.last_sequence, $5 FROM next_seq
            RETURNING id, conversation_id, sender_id, body, sequence, created_at, edited_at, deleted_at
            "#,
        )
        .bind(conversation_id)
        .bind(Uuid::new_v4())
        .bind(sender_id)
        .bind(body)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    async fn get(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<Message> {
        sqlx::query_as::<_, Message>(
            r#"SELECT id, conversation_id, sender_id, body, sequence, created_at, edited_at, deleted_at
               FROM messages WHERE id = $1 AND conversation_id = $2 AND deleted_at IS NULL"#,
        )
        .bind(message_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| crate::error::AppError::NotFound("message not found".into()))
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let rows = match before {
            Some(cursor) => {
                sqlx::query_as::<_, Message>(
                    r#"SELECT id, conversation_id, sender_id, body, sequence, created_at, edited_at, deleted_at
                       FROM messages
                       WHERE conversation_id = $1 AND sequence < $2
                       ORDER BY sequence DESC
                       LIMIT $3"#,
                )
                .bind(conversation_id)
                .bind(cursor.sequence)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Message>(
                    r#"SELECT id, conversation_id, sender_id, body, sequence, created_at, edited_at, deleted_at
                       FROM messages
                       WHERE conversation_id = $1
                       ORDER BY sequence DESC
                       LIMIT $2"#,
                )
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows)
    }

    async fn edit(&self, conversation_id: Uuid, message_id: Uuid, body: &str) -> AppResult<Message> {
        let message = sqlx::query_as::<_, Message>(
            r#"UPDATE messages SET body = $1, edited_at = $2
               WHERE id = $3 AND conversation_id = $4 AND deleted_at IS NULL
               RETURNING id, conversation_id, sender_id, body, sequence, created_at, edited_at, deleted_at"#,
        )
        .bind(body)
        .bind(Utc::now())
        .bind(message_id)
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| crate::error::AppError::NotFound("message not found".into()))?;
        Ok(message)
    }

    async fn soft_delete(&self, conversation_id: Uuid, message_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE messages SET deleted_at = $1 WHERE id = $2 AND conversation_id = $3 AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(message_id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(crate::error::AppError::NotFound("message not found".into()));
        }
        Ok(())
    }
}
