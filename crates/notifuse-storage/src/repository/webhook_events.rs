//! Webhook event repository

use crate::db::{db_err, DatabasePool};
use crate::models::{EmailEventType, WebhookEvent, WebhookEventListParams};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifuse_common::types::Pagination;
use notifuse_common::{Error, Result};
use sqlx::{Postgres, QueryBuilder};

/// Rows per INSERT statement; keeps bind parameters well under the protocol limit
const INSERT_CHUNK_SIZE: usize = 1000;

/// Webhook event repository trait
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Persist a batch of events in one transaction
    async fn store_events(&self, workspace_id: &str, events: &[WebhookEvent]) -> Result<()>;

    async fn list_events(
        &self,
        workspace_id: &str,
        params: &WebhookEventListParams,
    ) -> Result<WebhookEventPage>;

    async fn get_events_by_type(
        &self,
        workspace_id: &str,
        event_type: EmailEventType,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>>;

    async fn get_events_by_message_id(
        &self,
        workspace_id: &str,
        message_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>>;

    async fn get_events_by_transactional_id(
        &self,
        workspace_id: &str,
        transactional_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>>;

    async fn get_events_by_broadcast_id(
        &self,
        workspace_id: &str,
        broadcast_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>>;

    async fn get_event_count(&self, workspace_id: &str, event_type: EmailEventType)
        -> Result<i64>;
}

/// One page of webhook events
#[derive(Debug, Clone, Default)]
pub struct WebhookEventPage {
    pub events: Vec<WebhookEvent>,
    pub total_count: i64,
}

#[derive(sqlx::FromRow)]
struct WebhookEventRow {
    id: String,
    #[sqlx(rename = "type")]
    event_type: String,
    email_provider_kind: String,
    integration_id: String,
    recipient_email: String,
    message_id: Option<String>,
    transactional_id: Option<String>,
    broadcast_id: Option<String>,
    timestamp: DateTime<Utc>,
    raw_payload: String,
    bounce_type: Option<String>,
    bounce_category: Option<String>,
    bounce_diagnostic: Option<String>,
    complaint_feedback_type: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<WebhookEventRow> for WebhookEvent {
    type Error = Error;

    fn try_from(row: WebhookEventRow) -> Result<Self> {
        Ok(WebhookEvent {
            id: row.id,
            event_type: row.event_type.parse()?,
            email_provider_kind: row.email_provider_kind.parse()?,
            integration_id: row.integration_id,
            recipient_email: row.recipient_email,
            message_id: row.message_id,
            transactional_id: row.transactional_id,
            broadcast_id: row.broadcast_id,
            timestamp: row.timestamp,
            raw_payload: row.raw_payload,
            bounce_type: row.bounce_type,
            bounce_category: row.bounce_category,
            bounce_diagnostic: row.bounce_diagnostic,
            complaint_feedback_type: row.complaint_feedback_type,
            created_at: row.created_at,
        })
    }
}

fn into_events(rows: Vec<WebhookEventRow>) -> Result<Vec<WebhookEvent>> {
    rows.into_iter().map(WebhookEvent::try_from).collect()
}

/// Database webhook event repository
pub struct DbWebhookEventRepository {
    pool: DatabasePool,
}

impl DbWebhookEventRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Events whose `column` equals `value`, newest first
    async fn events_by_column(
        &self,
        workspace_id: &str,
        column: &'static str,
        value: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        let sql = format!(
            "SELECT * FROM webhook_events WHERE workspace_id = $1 AND {} = $2 \
             ORDER BY timestamp DESC LIMIT $3 OFFSET $4",
            column
        );

        let rows = sqlx::query_as::<_, WebhookEventRow>(&sql)
            .bind(workspace_id)
            .bind(value)
            .bind(pagination.limit)
            .bind(pagination.offset)
            .fetch_all(self.pool.pool())
            .await
            .map_err(db_err)?;

        into_events(rows)
    }
}

#[async_trait]
impl WebhookEventRepository for DbWebhookEventRepository {
    async fn store_events(&self, workspace_id: &str, events: &[WebhookEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.pool().begin().await.map_err(db_err)?;

        for chunk in events.chunks(INSERT_CHUNK_SIZE) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO webhook_events (id, workspace_id, type, email_provider_kind, \
                 integration_id, recipient_email, message_id, transactional_id, broadcast_id, \
                 timestamp, raw_payload, bounce_type, bounce_category, bounce_diagnostic, \
                 complaint_feedback_type, created_at) ",
            );

            builder.push_values(chunk, |mut row, event| {
                row.push_bind(&event.id)
                    .push_bind(workspace_id)
                    .push_bind(event.event_type.as_str())
                    .push_bind(event.email_provider_kind.as_str())
                    .push_bind(&event.integration_id)
                    .push_bind(&event.recipient_email)
                    .push_bind(&event.message_id)
                    .push_bind(&event.transactional_id)
                    .push_bind(&event.broadcast_id)
                    .push_bind(event.timestamp)
                    .push_bind(&event.raw_payload)
                    .push_bind(&event.bounce_type)
                    .push_bind(&event.bounce_category)
                    .push_bind(&event.bounce_diagnostic)
                    .push_bind(&event.complaint_feedback_type)
                    .push_bind(event.created_at);
            });
            builder.push(" ON CONFLICT (id) DO NOTHING");

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn list_events(
        &self,
        workspace_id: &str,
        params: &WebhookEventListParams,
    ) -> Result<WebhookEventPage> {
        let pagination = Pagination::normalize(params.limit, params.offset);
        let event_type = params.event_type.map(|t| t.as_str());
        let recipient = params.recipient_email.as_deref();

        let rows = sqlx::query_as::<_, WebhookEventRow>(
            r#"
            SELECT * FROM webhook_events
            WHERE workspace_id = $1
              AND ($2::TEXT IS NULL OR type = $2)
              AND ($3::TEXT IS NULL OR recipient_email = $3)
            ORDER BY timestamp DESC
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(workspace_id)
        .bind(event_type)
        .bind(recipient)
        .bind(pagination.limit)
        .bind(pagination.offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM webhook_events
            WHERE workspace_id = $1
              AND ($2::TEXT IS NULL OR type = $2)
              AND ($3::TEXT IS NULL OR recipient_email = $3)
            "#,
        )
        .bind(workspace_id)
        .bind(event_type)
        .bind(recipient)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(WebhookEventPage {
            events: into_events(rows)?,
            total_count,
        })
    }

    async fn get_events_by_type(
        &self,
        workspace_id: &str,
        event_type: EmailEventType,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        self.events_by_column(workspace_id, "type", event_type.as_str(), pagination)
            .await
    }

    async fn get_events_by_message_id(
        &self,
        workspace_id: &str,
        message_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        self.events_by_column(workspace_id, "message_id", message_id, pagination)
            .await
    }

    async fn get_events_by_transactional_id(
        &self,
        workspace_id: &str,
        transactional_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        self.events_by_column(workspace_id, "transactional_id", transactional_id, pagination)
            .await
    }

    async fn get_events_by_broadcast_id(
        &self,
        workspace_id: &str,
        broadcast_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        self.events_by_column(workspace_id, "broadcast_id", broadcast_id, pagination)
            .await
    }

    async fn get_event_count(
        &self,
        workspace_id: &str,
        event_type: EmailEventType,
    ) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM webhook_events WHERE workspace_id = $1 AND type = $2",
        )
        .bind(workspace_id)
        .bind(event_type.as_str())
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)
    }
}
