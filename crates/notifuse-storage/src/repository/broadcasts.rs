//! Broadcast repository

use crate::db::{db_err, DatabasePool};
use crate::models::{
    AbTestSettings, AudienceSettings, Broadcast, BroadcastStatus, ScheduleSettings, UtmParameters,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifuse_common::types::Pagination;
use notifuse_common::{Error, Result};
use sqlx::types::Json;
use sqlx::PgExecutor;
use std::future::Future;
use std::pin::Pin;
use tracing::warn;

/// Future returned by a unit of transactional work
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 't>>;

/// A unit of work executed against a transaction handle
pub type TxWork =
    Box<dyn for<'t> FnOnce(&'t mut dyn BroadcastTx) -> TxFuture<'t, Broadcast> + Send>;

/// Broadcast repository trait
#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    async fn create_broadcast(&self, broadcast: &Broadcast) -> Result<()>;
    async fn get_broadcast(&self, workspace_id: &str, id: &str) -> Result<Broadcast>;
    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<()>;
    async fn delete_broadcast(&self, workspace_id: &str, id: &str) -> Result<()>;
    async fn list_broadcasts(&self, params: &ListBroadcastsParams) -> Result<BroadcastPage>;

    /// Run `work` inside one transaction; commit on `Ok`, roll back on `Err`
    async fn with_transaction(&self, workspace_id: &str, work: TxWork) -> Result<Broadcast>;
}

/// Reads and writes visible only inside a transaction
#[async_trait]
pub trait BroadcastTx: Send {
    /// Read a broadcast, locking it for the rest of the transaction
    async fn get_broadcast(&mut self, workspace_id: &str, id: &str) -> Result<Broadcast>;
    async fn update_broadcast(&mut self, broadcast: &Broadcast) -> Result<()>;
}

/// Run a closure in a broadcast transaction
///
/// ```ignore
/// let updated = in_transaction(&*repo, &workspace_id, move |tx| {
///     Box::pin(async move {
///         let mut broadcast = tx.get_broadcast(&ws, &id).await?;
///         broadcast.name = "renamed".into();
///         tx.update_broadcast(&broadcast).await?;
///         Ok(broadcast)
///     })
/// })
/// .await?;
/// ```
pub async fn in_transaction<F>(
    repo: &dyn BroadcastRepository,
    workspace_id: &str,
    work: F,
) -> Result<Broadcast>
where
    F: for<'t> FnOnce(&'t mut dyn BroadcastTx) -> TxFuture<'t, Broadcast> + Send + 'static,
{
    repo.with_transaction(workspace_id, Box::new(work)).await
}

/// List filters
#[derive(Debug, Clone)]
pub struct ListBroadcastsParams {
    pub workspace_id: String,
    pub status: Option<BroadcastStatus>,
    pub pagination: Pagination,
}

/// One page of broadcasts
#[derive(Debug, Clone, Default)]
pub struct BroadcastPage {
    pub broadcasts: Vec<Broadcast>,
    pub total_count: i64,
}

#[derive(sqlx::FromRow)]
struct BroadcastRow {
    id: String,
    workspace_id: String,
    name: String,
    status: String,
    audience: Json<AudienceSettings>,
    schedule: Json<ScheduleSettings>,
    test_settings: Json<AbTestSettings>,
    utm_parameters: Option<Json<UtmParameters>>,
    tracking_enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
}

impl TryFrom<BroadcastRow> for Broadcast {
    type Error = Error;

    fn try_from(row: BroadcastRow) -> Result<Self> {
        Ok(Broadcast {
            status: row.status.parse()?,
            id: row.id,
            workspace_id: row.workspace_id,
            name: row.name,
            audience: row.audience.0,
            schedule: row.schedule.0,
            test_settings: row.test_settings.0,
            utm_parameters: row.utm_parameters.map(|u| u.0),
            tracking_enabled: row.tracking_enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            paused_at: row.paused_at,
            cancelled_at: row.cancelled_at,
            sent_at: row.sent_at,
        })
    }
}

const SELECT_BROADCAST: &str = "SELECT * FROM broadcasts WHERE workspace_id = $1 AND id = $2";
const SELECT_BROADCAST_FOR_UPDATE: &str =
    "SELECT * FROM broadcasts WHERE workspace_id = $1 AND id = $2 FOR UPDATE";

async fn fetch_broadcast<'e, E>(
    executor: E,
    workspace_id: &str,
    id: &str,
    for_update: bool,
) -> Result<Broadcast>
where
    E: PgExecutor<'e>,
{
    let sql = if for_update {
        SELECT_BROADCAST_FOR_UPDATE
    } else {
        SELECT_BROADCAST
    };

    let row = sqlx::query_as::<_, BroadcastRow>(sql)
        .bind(workspace_id)
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::BroadcastNotFound(id.to_string()))?;

    row.try_into()
}

async fn write_broadcast<'e, E>(executor: E, broadcast: &Broadcast) -> Result<()>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        UPDATE broadcasts SET
            name = $3,
            status = $4,
            audience = $5,
            schedule = $6,
            test_settings = $7,
            utm_parameters = $8,
            tracking_enabled = $9,
            updated_at = $10,
            started_at = $11,
            paused_at = $12,
            cancelled_at = $13,
            sent_at = $14
        WHERE workspace_id = $1 AND id = $2
        "#,
    )
    .bind(&broadcast.workspace_id)
    .bind(&broadcast.id)
    .bind(&broadcast.name)
    .bind(broadcast.status.as_str())
    .bind(Json(&broadcast.audience))
    .bind(Json(&broadcast.schedule))
    .bind(Json(&broadcast.test_settings))
    .bind(broadcast.utm_parameters.as_ref().map(Json))
    .bind(broadcast.tracking_enabled)
    .bind(broadcast.updated_at)
    .bind(broadcast.started_at)
    .bind(broadcast.paused_at)
    .bind(broadcast.cancelled_at)
    .bind(broadcast.sent_at)
    .execute(executor)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 0 {
        return Err(Error::BroadcastNotFound(broadcast.id.clone()));
    }
    Ok(())
}

/// Database broadcast repository
pub struct DbBroadcastRepository {
    pool: DatabasePool,
}

impl DbBroadcastRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct PgBroadcastTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl BroadcastTx for PgBroadcastTx {
    async fn get_broadcast(&mut self, workspace_id: &str, id: &str) -> Result<Broadcast> {
        fetch_broadcast(&mut *self.tx, workspace_id, id, true).await
    }

    async fn update_broadcast(&mut self, broadcast: &Broadcast) -> Result<()> {
        write_broadcast(&mut *self.tx, broadcast).await
    }
}

#[async_trait]
impl BroadcastRepository for DbBroadcastRepository {
    async fn create_broadcast(&self, broadcast: &Broadcast) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO broadcasts (
                id, workspace_id, name, status, audience, schedule, test_settings,
                utm_parameters, tracking_enabled, created_at, updated_at,
                started_at, paused_at, cancelled_at, sent_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&broadcast.id)
        .bind(&broadcast.workspace_id)
        .bind(&broadcast.name)
        .bind(broadcast.status.as_str())
        .bind(Json(&broadcast.audience))
        .bind(Json(&broadcast.schedule))
        .bind(Json(&broadcast.test_settings))
        .bind(broadcast.utm_parameters.as_ref().map(Json))
        .bind(broadcast.tracking_enabled)
        .bind(broadcast.created_at)
        .bind(broadcast.updated_at)
        .bind(broadcast.started_at)
        .bind(broadcast.paused_at)
        .bind(broadcast.cancelled_at)
        .bind(broadcast.sent_at)
        .execute(self.pool.pool())
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_broadcast(&self, workspace_id: &str, id: &str) -> Result<Broadcast> {
        fetch_broadcast(self.pool.pool(), workspace_id, id, false).await
    }

    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<()> {
        write_broadcast(self.pool.pool(), broadcast).await
    }

    async fn delete_broadcast(&self, workspace_id: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM broadcasts WHERE workspace_id = $1 AND id = $2")
            .bind(workspace_id)
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::BroadcastNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_broadcasts(&self, params: &ListBroadcastsParams) -> Result<BroadcastPage> {
        let status = params.status.map(|s| s.as_str());

        let rows = sqlx::query_as::<_, BroadcastRow>(
            r#"
            SELECT * FROM broadcasts
            WHERE workspace_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&params.workspace_id)
        .bind(status)
        .bind(params.pagination.limit)
        .bind(params.pagination.offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_err)?;

        let total_count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM broadcasts
            WHERE workspace_id = $1 AND ($2::TEXT IS NULL OR status = $2)
            "#,
        )
        .bind(&params.workspace_id)
        .bind(status)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_err)?;

        let broadcasts = rows
            .into_iter()
            .map(Broadcast::try_from)
            .collect::<Result<Vec<_>>>()?;

        Ok(BroadcastPage {
            broadcasts,
            total_count,
        })
    }

    async fn with_transaction(&self, workspace_id: &str, work: TxWork) -> Result<Broadcast> {
        let tx = self.pool.pool().begin().await.map_err(db_err)?;
        let mut handle = PgBroadcastTx { tx };

        match work(&mut handle).await {
            Ok(broadcast) => {
                handle.tx.commit().await.map_err(db_err)?;
                Ok(broadcast)
            }
            Err(e) => {
                if let Err(rollback_err) = handle.tx.rollback().await {
                    warn!(
                        workspace_id = %workspace_id,
                        error = %rollback_err,
                        "Failed to roll back broadcast transaction"
                    );
                }
                Err(e)
            }
        }
    }
}
