//! Contact repository

use crate::db::{db_err, DatabasePool};
use crate::models::Contact;
use async_trait::async_trait;
use notifuse_common::{Error, Result};

/// Contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Fails with `NotFound` when no contact has this address
    async fn get_contact_by_email(&self, workspace_id: &str, email: &str) -> Result<Contact>;
}

#[derive(sqlx::FromRow)]
struct ContactRow {
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    external_id: Option<String>,
    properties: serde_json::Value,
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn get_contact_by_email(&self, workspace_id: &str, email: &str) -> Result<Contact> {
        let row = sqlx::query_as::<_, ContactRow>(
            r#"
            SELECT email, first_name, last_name, external_id, properties
            FROM contacts
            WHERE workspace_id = $1 AND LOWER(email) = LOWER($2)
            "#,
        )
        .bind(workspace_id)
        .bind(email)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_err)?
        .ok_or_else(|| Error::NotFound(format!("contact {}", email)))?;

        Ok(Contact {
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            external_id: row.external_id,
            properties: row.properties,
        })
    }
}
