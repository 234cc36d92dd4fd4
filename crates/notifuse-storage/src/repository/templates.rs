//! Template repository

use crate::db::{db_err, DatabasePool};
use crate::models::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notifuse_common::{Error, Result};

/// Template repository trait
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    /// Fetch a template; `version` 0 means the latest version
    async fn get_template_by_id(
        &self,
        workspace_id: &str,
        id: &str,
        version: i64,
    ) -> Result<Template>;
}

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    version: i64,
    subject: String,
    html: String,
    text: Option<String>,
    sender_id: Option<String>,
    reply_to: Option<String>,
    updated_at: DateTime<Utc>,
}

/// Database template repository
pub struct DbTemplateRepository {
    pool: DatabasePool,
}

impl DbTemplateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for DbTemplateRepository {
    async fn get_template_by_id(
        &self,
        workspace_id: &str,
        id: &str,
        version: i64,
    ) -> Result<Template> {
        let row = sqlx::query_as::<_, TemplateRow>(
            r#"
            SELECT id, name, version, subject, html, text, sender_id, reply_to, updated_at
            FROM templates
            WHERE workspace_id = $1 AND id = $2 AND ($3 = 0 OR version = $3)
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(workspace_id)
        .bind(id)
        .bind(version)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("template {}", id)))?;

        Ok(Template {
            id: row.id,
            name: row.name,
            version: row.version,
            subject: row.subject,
            html: row.html,
            text: row.text,
            sender_id: row.sender_id,
            reply_to: row.reply_to,
            updated_at: row.updated_at,
        })
    }
}
