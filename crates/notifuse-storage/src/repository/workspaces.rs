//! Workspace repository

use crate::db::{db_err, DatabasePool};
use crate::models::{Integration, Workspace, WorkspaceSettings};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifuse_common::{Error, Result};
use sqlx::types::Json;

/// Workspace repository trait
#[async_trait]
pub trait WorkspaceRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Workspace>;
}

#[derive(sqlx::FromRow)]
struct WorkspaceRow {
    id: String,
    name: String,
    settings: Json<WorkspaceSettings>,
    integrations: Json<Vec<Integration>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Database workspace repository
pub struct DbWorkspaceRepository {
    pool: DatabasePool,
}

impl DbWorkspaceRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceRepository for DbWorkspaceRepository {
    async fn get_by_id(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound(format!("workspace {}", id)))?;

        Ok(Workspace {
            id: row.id,
            name: row.name,
            settings: row.settings.0,
            integrations: row.integrations.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
