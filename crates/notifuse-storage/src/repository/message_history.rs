//! Message history repository

use crate::db::{db_err, DatabasePool};
use crate::models::{MessageEventUpdate, MessageHistory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifuse_common::Result;

/// Message history repository trait
#[async_trait]
pub trait MessageHistoryRepository: Send + Sync {
    async fn create(&self, workspace_id: &str, message: &MessageHistory) -> Result<()>;

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<MessageHistory>>;

    /// Record each event's timestamp only where none is recorded yet.
    ///
    /// The whole batch is applied atomically; unknown message ids are skipped.
    async fn set_statuses_if_not_set(
        &self,
        workspace_id: &str,
        updates: &[MessageEventUpdate],
    ) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct MessageHistoryRow {
    id: String,
    contact_email: String,
    broadcast_id: Option<String>,
    template_id: Option<String>,
    status_info: Option<String>,
    sent_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    complained_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<MessageHistoryRow> for MessageHistory {
    fn from(row: MessageHistoryRow) -> Self {
        MessageHistory {
            id: row.id,
            contact_email: row.contact_email,
            broadcast_id: row.broadcast_id,
            template_id: row.template_id,
            status_info: row.status_info,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
            bounced_at: row.bounced_at,
            complained_at: row.complained_at,
            updated_at: row.updated_at,
        }
    }
}

/// Database message history repository
pub struct DbMessageHistoryRepository {
    pool: DatabasePool,
}

impl DbMessageHistoryRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageHistoryRepository for DbMessageHistoryRepository {
    async fn create(&self, workspace_id: &str, message: &MessageHistory) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO message_history (
                workspace_id, id, contact_email, broadcast_id, template_id, status_info,
                sent_at, delivered_at, bounced_at, complained_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(workspace_id)
        .bind(&message.id)
        .bind(&message.contact_email)
        .bind(&message.broadcast_id)
        .bind(&message.template_id)
        .bind(&message.status_info)
        .bind(message.sent_at)
        .bind(message.delivered_at)
        .bind(message.bounced_at)
        .bind(message.complained_at)
        .bind(message.updated_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<MessageHistory>> {
        let row = sqlx::query_as::<_, MessageHistoryRow>(
            "SELECT * FROM message_history WHERE workspace_id = $1 AND id = $2",
        )
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(row.map(MessageHistory::from))
    }

    async fn set_statuses_if_not_set(
        &self,
        workspace_id: &str,
        updates: &[MessageEventUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        for update in updates {
            let column = update.event.column();
            let sql = format!(
                "UPDATE message_history SET {column} = $3, \
                 status_info = COALESCE($4, status_info), updated_at = NOW() \
                 WHERE workspace_id = $1 AND id = $2 AND {column} IS NULL"
            );

            sqlx::query(&sql)
                .bind(workspace_id)
                .bind(&update.message_id)
                .bind(update.timestamp)
                .bind(&update.status_info)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
