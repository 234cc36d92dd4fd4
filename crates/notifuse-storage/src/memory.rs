//! In-memory repositories
//!
//! Used by unit tests and local development. Each repository can be told to
//! fail so error paths can be exercised without a database.

use crate::models::{
    Broadcast, Contact, EmailEventType, MessageEventUpdate, MessageHistory, Template,
    WebhookEvent, WebhookEventListParams, Workspace,
};
use crate::repository::{
    BroadcastPage, BroadcastRepository, BroadcastTx, ContactRepository, ListBroadcastsParams,
    MessageHistoryRepository, TemplateRepository, TxWork, WebhookEventPage,
    WebhookEventRepository, WorkspaceRepository,
};
use async_trait::async_trait;
use notifuse_common::types::Pagination;
use notifuse_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// An injectable failure, active until cleared
#[derive(Debug, Default)]
pub struct Failure {
    message: std::sync::Mutex<Option<String>>,
}

impl Failure {
    pub fn set(&self, message: impl Into<String>) {
        if let Ok(mut slot) = self.message.lock() {
            *slot = Some(message.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.message.lock() {
            *slot = None;
        }
    }

    fn check(&self) -> Result<()> {
        match self.message.lock().ok().and_then(|slot| slot.clone()) {
            Some(message) => Err(Error::Database(message)),
            None => Ok(()),
        }
    }
}

type Key = (String, String);

fn key(workspace_id: &str, id: &str) -> Key {
    (workspace_id.to_string(), id.to_string())
}

fn page<T: Clone>(items: &[T], pagination: Pagination) -> Vec<T> {
    items
        .iter()
        .skip(pagination.offset as usize)
        .take(pagination.limit as usize)
        .cloned()
        .collect()
}

/// In-memory broadcast repository
#[derive(Default)]
pub struct InMemoryBroadcastRepository {
    broadcasts: RwLock<HashMap<Key, Broadcast>>,
    tx_lock: Mutex<()>,
    /// Fails `update_broadcast`, inside and outside transactions
    pub fail_update: Failure,
    /// Fails `with_transaction` before any work runs
    pub fail_begin: Failure,
}

impl InMemoryBroadcastRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a broadcast as-is
    pub async fn insert(&self, broadcast: Broadcast) {
        self.broadcasts
            .write()
            .await
            .insert(key(&broadcast.workspace_id, &broadcast.id), broadcast);
    }

    /// Current committed state, bypassing failure injection
    pub async fn snapshot(&self, workspace_id: &str, id: &str) -> Option<Broadcast> {
        self.broadcasts.read().await.get(&key(workspace_id, id)).cloned()
    }
}

struct MemoryBroadcastTx<'a> {
    repo: &'a InMemoryBroadcastRepository,
    pending: HashMap<Key, Broadcast>,
}

#[async_trait]
impl BroadcastTx for MemoryBroadcastTx<'_> {
    async fn get_broadcast(&mut self, workspace_id: &str, id: &str) -> Result<Broadcast> {
        let k = key(workspace_id, id);
        if let Some(pending) = self.pending.get(&k) {
            return Ok(pending.clone());
        }
        self.repo
            .broadcasts
            .read()
            .await
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::BroadcastNotFound(id.to_string()))
    }

    async fn update_broadcast(&mut self, broadcast: &Broadcast) -> Result<()> {
        self.repo.fail_update.check()?;
        let k = key(&broadcast.workspace_id, &broadcast.id);
        if !self.pending.contains_key(&k) && !self.repo.broadcasts.read().await.contains_key(&k) {
            return Err(Error::BroadcastNotFound(broadcast.id.clone()));
        }
        self.pending.insert(k, broadcast.clone());
        Ok(())
    }
}

#[async_trait]
impl BroadcastRepository for InMemoryBroadcastRepository {
    async fn create_broadcast(&self, broadcast: &Broadcast) -> Result<()> {
        let mut broadcasts = self.broadcasts.write().await;
        let k = key(&broadcast.workspace_id, &broadcast.id);
        if broadcasts.contains_key(&k) {
            return Err(Error::Database(format!(
                "duplicate broadcast id {}",
                broadcast.id
            )));
        }
        broadcasts.insert(k, broadcast.clone());
        Ok(())
    }

    async fn get_broadcast(&self, workspace_id: &str, id: &str) -> Result<Broadcast> {
        self.broadcasts
            .read()
            .await
            .get(&key(workspace_id, id))
            .cloned()
            .ok_or_else(|| Error::BroadcastNotFound(id.to_string()))
    }

    async fn update_broadcast(&self, broadcast: &Broadcast) -> Result<()> {
        self.fail_update.check()?;
        let mut broadcasts = self.broadcasts.write().await;
        match broadcasts.get_mut(&key(&broadcast.workspace_id, &broadcast.id)) {
            Some(stored) => {
                *stored = broadcast.clone();
                Ok(())
            }
            None => Err(Error::BroadcastNotFound(broadcast.id.clone())),
        }
    }

    async fn delete_broadcast(&self, workspace_id: &str, id: &str) -> Result<()> {
        self.broadcasts
            .write()
            .await
            .remove(&key(workspace_id, id))
            .map(|_| ())
            .ok_or_else(|| Error::BroadcastNotFound(id.to_string()))
    }

    async fn list_broadcasts(&self, params: &ListBroadcastsParams) -> Result<BroadcastPage> {
        let broadcasts = self.broadcasts.read().await;
        let mut matching: Vec<Broadcast> = broadcasts
            .values()
            .filter(|b| b.workspace_id == params.workspace_id)
            .filter(|b| params.status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(BroadcastPage {
            total_count: matching.len() as i64,
            broadcasts: page(&matching, params.pagination),
        })
    }

    async fn with_transaction(&self, _workspace_id: &str, work: TxWork) -> Result<Broadcast> {
        let _guard = self.tx_lock.lock().await;
        self.fail_begin.check()?;

        let mut tx = MemoryBroadcastTx {
            repo: self,
            pending: HashMap::new(),
        };
        let result = work(&mut tx).await;

        if result.is_ok() {
            let mut broadcasts = self.broadcasts.write().await;
            broadcasts.extend(tx.pending);
        }
        result
    }
}

/// In-memory webhook event repository
#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    events: RwLock<Vec<(String, WebhookEvent)>>,
    pub fail_store: Failure,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event for a workspace, in insertion order
    pub async fn all(&self, workspace_id: &str) -> Vec<WebhookEvent> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(ws, _)| ws == workspace_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    async fn matching<F>(&self, workspace_id: &str, predicate: F) -> Vec<WebhookEvent>
    where
        F: Fn(&WebhookEvent) -> bool,
    {
        let mut events: Vec<WebhookEvent> = self
            .events
            .read()
            .await
            .iter()
            .filter(|(ws, e)| ws == workspace_id && predicate(e))
            .map(|(_, e)| e.clone())
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn store_events(&self, workspace_id: &str, events: &[WebhookEvent]) -> Result<()> {
        self.fail_store.check()?;
        let mut stored = self.events.write().await;
        stored.extend(events.iter().map(|e| (workspace_id.to_string(), e.clone())));
        Ok(())
    }

    async fn list_events(
        &self,
        workspace_id: &str,
        params: &WebhookEventListParams,
    ) -> Result<WebhookEventPage> {
        let pagination = Pagination::normalize(params.limit, params.offset);
        let events = self
            .matching(workspace_id, |e| {
                params.event_type.map_or(true, |t| e.event_type == t)
                    && params
                        .recipient_email
                        .as_deref()
                        .map_or(true, |r| e.recipient_email == r)
            })
            .await;

        Ok(WebhookEventPage {
            total_count: events.len() as i64,
            events: page(&events, pagination),
        })
    }

    async fn get_events_by_type(
        &self,
        workspace_id: &str,
        event_type: EmailEventType,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        let events = self.matching(workspace_id, |e| e.event_type == event_type).await;
        Ok(page(&events, pagination))
    }

    async fn get_events_by_message_id(
        &self,
        workspace_id: &str,
        message_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        let events = self
            .matching(workspace_id, |e| e.message_id.as_deref() == Some(message_id))
            .await;
        Ok(page(&events, pagination))
    }

    async fn get_events_by_transactional_id(
        &self,
        workspace_id: &str,
        transactional_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        let events = self
            .matching(workspace_id, |e| {
                e.transactional_id.as_deref() == Some(transactional_id)
            })
            .await;
        Ok(page(&events, pagination))
    }

    async fn get_events_by_broadcast_id(
        &self,
        workspace_id: &str,
        broadcast_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        let events = self
            .matching(workspace_id, |e| e.broadcast_id.as_deref() == Some(broadcast_id))
            .await;
        Ok(page(&events, pagination))
    }

    async fn get_event_count(
        &self,
        workspace_id: &str,
        event_type: EmailEventType,
    ) -> Result<i64> {
        Ok(self
            .matching(workspace_id, |e| e.event_type == event_type)
            .await
            .len() as i64)
    }
}

/// In-memory message history repository
#[derive(Default)]
pub struct InMemoryMessageHistoryRepository {
    messages: RwLock<HashMap<Key, MessageHistory>>,
    batches: Mutex<Vec<Vec<MessageEventUpdate>>>,
    pub fail_update: Failure,
}

impl InMemoryMessageHistoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every batch passed to `set_statuses_if_not_set`, including failed ones
    pub async fn batches(&self) -> Vec<Vec<MessageEventUpdate>> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl MessageHistoryRepository for InMemoryMessageHistoryRepository {
    async fn create(&self, workspace_id: &str, message: &MessageHistory) -> Result<()> {
        self.messages
            .write()
            .await
            .insert(key(workspace_id, &message.id), message.clone());
        Ok(())
    }

    async fn get(&self, workspace_id: &str, id: &str) -> Result<Option<MessageHistory>> {
        Ok(self.messages.read().await.get(&key(workspace_id, id)).cloned())
    }

    async fn set_statuses_if_not_set(
        &self,
        workspace_id: &str,
        updates: &[MessageEventUpdate],
    ) -> Result<()> {
        self.batches.lock().await.push(updates.to_vec());
        self.fail_update.check()?;

        let mut messages = self.messages.write().await;
        for update in updates {
            if let Some(message) = messages.get_mut(&key(workspace_id, &update.message_id)) {
                message.apply_if_not_set(update);
            }
        }
        Ok(())
    }
}

/// In-memory workspace repository
#[derive(Default)]
pub struct InMemoryWorkspaceRepository {
    workspaces: RwLock<HashMap<String, Workspace>>,
}

impl InMemoryWorkspaceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workspace: Workspace) {
        self.workspaces
            .write()
            .await
            .insert(workspace.id.clone(), workspace);
    }
}

#[async_trait]
impl WorkspaceRepository for InMemoryWorkspaceRepository {
    async fn get_by_id(&self, id: &str) -> Result<Workspace> {
        self.workspaces
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("workspace {}", id)))
    }
}

/// In-memory contact repository
#[derive(Default)]
pub struct InMemoryContactRepository {
    contacts: RwLock<HashMap<Key, Contact>>,
    pub fail_lookup: Failure,
}

impl InMemoryContactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workspace_id: &str, contact: Contact) {
        self.contacts
            .write()
            .await
            .insert(key(workspace_id, &contact.email.to_lowercase()), contact);
    }
}

#[async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn get_contact_by_email(&self, workspace_id: &str, email: &str) -> Result<Contact> {
        self.fail_lookup.check()?;
        self.contacts
            .read()
            .await
            .get(&key(workspace_id, &email.to_lowercase()))
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("contact {}", email)))
    }
}

/// In-memory template repository
#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<Key, Vec<Template>>>,
}

impl InMemoryTemplateRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, workspace_id: &str, template: Template) {
        self.templates
            .write()
            .await
            .entry(key(workspace_id, &template.id))
            .or_default()
            .push(template);
    }
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn get_template_by_id(
        &self,
        workspace_id: &str,
        id: &str,
        version: i64,
    ) -> Result<Template> {
        let templates = self.templates.read().await;
        let versions = templates.get(&key(workspace_id, id));

        let found = match version {
            0 => versions.and_then(|v| v.iter().max_by_key(|t| t.version)),
            wanted => versions.and_then(|v| v.iter().find(|t| t.version == wanted)),
        };

        found
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("template {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AbTestSettings, AudienceSettings, BroadcastStatus, EmailProviderKind, MessageEvent,
        ScheduleSettings,
    };
    use crate::repository::in_transaction;
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn broadcast(id: &str) -> Broadcast {
        let now = Utc::now();
        Broadcast {
            id: id.to_string(),
            workspace_id: "ws".to_string(),
            name: "Spring sale".to_string(),
            status: BroadcastStatus::Draft,
            audience: AudienceSettings::default(),
            schedule: ScheduleSettings::default(),
            test_settings: AbTestSettings::default(),
            utm_parameters: None,
            tracking_enabled: false,
            created_at: now,
            updated_at: now,
            started_at: None,
            paused_at: None,
            cancelled_at: None,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() {
        let repo = InMemoryBroadcastRepository::new();
        repo.insert(broadcast("b1")).await;

        let updated = in_transaction(&repo, "ws", |tx| {
            Box::pin(async move {
                let mut b = tx.get_broadcast("ws", "b1").await?;
                b.status = BroadcastStatus::Paused;
                tx.update_broadcast(&b).await?;
                Ok::<_, Error>(b)
            })
        })
        .await
        .unwrap();

        assert_eq!(updated.status, BroadcastStatus::Paused);
        assert_eq!(
            repo.snapshot("ws", "b1").await.unwrap().status,
            BroadcastStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_err() {
        let repo = InMemoryBroadcastRepository::new();
        repo.insert(broadcast("b1")).await;

        let result = in_transaction(&repo, "ws", |tx| {
            Box::pin(async move {
                let mut b = tx.get_broadcast("ws", "b1").await?;
                b.status = BroadcastStatus::Cancelled;
                tx.update_broadcast(&b).await?;
                Err::<Broadcast, _>(Error::Internal("boom".to_string()))
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            repo.snapshot("ws", "b1").await.unwrap().status,
            BroadcastStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_list_filters_and_counts() {
        let repo = InMemoryBroadcastRepository::new();
        for i in 0..5 {
            let mut b = broadcast(&format!("b{}", i));
            b.created_at = b.created_at + Duration::seconds(i);
            if i % 2 == 0 {
                b.status = BroadcastStatus::Sent;
            }
            repo.insert(b).await;
        }

        let page = repo
            .list_broadcasts(&ListBroadcastsParams {
                workspace_id: "ws".to_string(),
                status: Some(BroadcastStatus::Sent),
                pagination: Pagination::normalize(2, 0),
            })
            .await
            .unwrap();

        assert_eq!(page.total_count, 3);
        assert_eq!(page.broadcasts.len(), 2);
        assert_eq!(page.broadcasts[0].id, "b4");
    }

    #[tokio::test]
    async fn test_set_statuses_skips_unknown_messages() {
        let repo = InMemoryMessageHistoryRepository::new();
        let now = Utc::now();
        repo.create(
            "ws",
            &MessageHistory {
                id: "m1".to_string(),
                contact_email: "a@example.com".to_string(),
                broadcast_id: None,
                template_id: None,
                status_info: None,
                sent_at: now,
                delivered_at: None,
                bounced_at: None,
                complained_at: None,
                updated_at: now,
            },
        )
        .await
        .unwrap();

        let updates = vec![
            MessageEventUpdate {
                message_id: "m1".to_string(),
                event: MessageEvent::Bounced,
                timestamp: now,
                status_info: Some("Permanent".to_string()),
            },
            MessageEventUpdate {
                message_id: "unknown".to_string(),
                event: MessageEvent::Delivered,
                timestamp: now,
                status_info: None,
            },
        ];
        repo.set_statuses_if_not_set("ws", &updates).await.unwrap();

        let stored = repo.get("ws", "m1").await.unwrap().unwrap();
        assert_eq!(stored.bounced_at, Some(now));
        assert_eq!(stored.status_info.as_deref(), Some("Permanent"));
        assert!(repo.get("ws", "unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_webhook_event_queries() {
        let repo = InMemoryWebhookEventRepository::new();
        let now = Utc::now();
        let events = vec![
            WebhookEvent::new(
                EmailEventType::Delivered,
                EmailProviderKind::Postmark,
                "int",
                "a@example.com",
                Some("m1".to_string()),
                now,
                "{}",
            )
            .with_correlation(Some("b1".to_string()), None),
            WebhookEvent::new(
                EmailEventType::Bounce,
                EmailProviderKind::Postmark,
                "int",
                "b@example.com",
                Some("m2".to_string()),
                now + Duration::seconds(1),
                "{}",
            ),
        ];
        repo.store_events("ws", &events).await.unwrap();

        assert_eq!(
            repo.get_event_count("ws", EmailEventType::Bounce).await.unwrap(),
            1
        );
        let by_broadcast = repo
            .get_events_by_broadcast_id("ws", "b1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(by_broadcast.len(), 1);

        let listed = repo
            .list_events(
                "ws",
                &WebhookEventListParams {
                    recipient_email: Some("b@example.com".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.total_count, 1);
        assert_eq!(listed.events[0].message_id.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let repo = InMemoryWebhookEventRepository::new();
        repo.fail_store.set("disk full");
        let err = repo.store_events("ws", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Database error: disk full");

        repo.fail_store.clear();
        assert!(repo.store_events("ws", &[]).await.is_ok());
    }
}
