//! Broadcast Lifecycle Service

use super::lifecycle::{
    apply_cancel, apply_pause, apply_resume, apply_schedule, ensure_deletable, ensure_editable,
};
use super::types::{
    CreateBroadcastRequest, ListBroadcastsRequest, ListBroadcastsResponse,
    ScheduleBroadcastRequest, SendToIndividualRequest, TemplateAttachError,
    UpdateBroadcastRequest,
};
use super::validation::{validate_broadcast, validate_email, validate_schedule_request};
use crate::auth::{authenticate_user, Authenticator};
use crate::events::{
    publish_and_wait, EventBus, EventPayload, BROADCAST_CANCELLED, BROADCAST_PAUSED,
    BROADCAST_RESUMED, BROADCAST_SCHEDULED,
};
use crate::sender::{EmailSender, OutgoingEmail};
use crate::template::{RenderOptions, TemplateRenderer};
use chrono::Utc;
use notifuse_common::types::Pagination;
use notifuse_common::{Context, Error, Result, ResultExt};
use notifuse_storage::models::{Broadcast, BroadcastStatus, Contact, EmailProvider, Workspace};
use notifuse_storage::repository::{
    in_transaction, BroadcastRepository, ContactRepository, ListBroadcastsParams,
    TemplateRepository, WorkspaceRepository,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators of the broadcast service
pub struct BroadcastServiceDeps {
    pub broadcasts: Arc<dyn BroadcastRepository>,
    pub workspaces: Arc<dyn WorkspaceRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub auth: Arc<dyn Authenticator>,
    pub events: Arc<dyn EventBus>,
    pub sender: Arc<dyn EmailSender>,
    pub renderer: Arc<TemplateRenderer>,
}

/// Drives broadcasts through their lifecycle
pub struct BroadcastService {
    broadcasts: Arc<dyn BroadcastRepository>,
    workspaces: Arc<dyn WorkspaceRepository>,
    contacts: Arc<dyn ContactRepository>,
    templates: Arc<dyn TemplateRepository>,
    auth: Arc<dyn Authenticator>,
    events: Arc<dyn EventBus>,
    sender: Arc<dyn EmailSender>,
    renderer: Arc<TemplateRenderer>,
}

/// Prefix storage failures; guard and not-found errors stay as they are
fn storage_err(context: &'static str) -> impl Fn(Error) -> Error {
    move |e| match e {
        Error::Database(_) | Error::Storage(_) | Error::Other(_) => e.wrap(context),
        other => other,
    }
}

impl BroadcastService {
    pub fn new(deps: BroadcastServiceDeps) -> Self {
        Self {
            broadcasts: deps.broadcasts,
            workspaces: deps.workspaces,
            contacts: deps.contacts,
            templates: deps.templates,
            auth: deps.auth,
            events: deps.events,
            sender: deps.sender,
            renderer: deps.renderer,
        }
    }

    async fn authenticate(&self, ctx: &Context, workspace_id: &str) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }
        let user = authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        debug!(workspace_id = %workspace_id, user_id = %user.id, "Authenticated");
        Ok(())
    }

    /// Load, mutate and save one broadcast in a single transaction.
    ///
    /// When `apply` yields an event, it is published after the write and the
    /// transaction only commits once the event is acknowledged. A failed ack
    /// or an ended context rolls the change back.
    async fn transition<F>(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
        action: &'static str,
        apply: F,
    ) -> Result<Broadcast>
    where
        F: FnOnce(&mut Broadcast) -> Result<Option<EventPayload>> + Send + 'static,
    {
        let ws = workspace_id.to_string();
        let id = broadcast_id.to_string();
        let events = self.events.clone();
        let ctx = ctx.clone();

        in_transaction(self.broadcasts.as_ref(), workspace_id, move |tx| {
            Box::pin(async move {
                let mut broadcast = tx.get_broadcast(&ws, &id).await?;
                let event = apply(&mut broadcast)?;
                tx.update_broadcast(&broadcast).await?;
                if let Some(payload) = event {
                    publish_and_wait(events.as_ref(), &ctx, payload, action).await?;
                }
                Ok::<_, Error>(broadcast)
            })
        })
        .await
    }

    async fn marketing_provider(&self, workspace_id: &str) -> Result<(Workspace, EmailProvider)> {
        let workspace = self
            .workspaces
            .get_by_id(workspace_id)
            .await
            .wrap_err("failed to get workspace")?;

        let provider = workspace.email_provider(true)?.cloned().ok_or_else(|| {
            Error::Validation("no marketing email provider configured".to_string())
        })?;

        Ok((workspace, provider))
    }

    pub async fn create_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        request: CreateBroadcastRequest,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;

        let now = Utc::now();
        let broadcast = Broadcast {
            id: Uuid::new_v4().simple().to_string(),
            workspace_id: workspace_id.to_string(),
            name: request.name.trim().to_string(),
            status: BroadcastStatus::Draft,
            audience: request.audience,
            schedule: request.schedule,
            test_settings: request.test_settings,
            utm_parameters: request.utm_parameters,
            tracking_enabled: request.tracking_enabled,
            created_at: now,
            updated_at: now,
            started_at: None,
            paused_at: None,
            cancelled_at: None,
            sent_at: None,
        };
        validate_broadcast(&broadcast)?;

        self.broadcasts
            .create_broadcast(&broadcast)
            .await
            .map_err(storage_err("failed to create broadcast"))?;

        info!(workspace_id = %workspace_id, broadcast_id = %broadcast.id, "Broadcast created");
        Ok(broadcast)
    }

    pub async fn get_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;
        self.broadcasts
            .get_broadcast(workspace_id, broadcast_id)
            .await
            .map_err(storage_err("failed to get broadcast"))
    }

    pub async fn update_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
        request: UpdateBroadcastRequest,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;

        let broadcast = self
            .transition(ctx, workspace_id, broadcast_id, "update", move |b| {
                ensure_editable(b)?;
                b.name = request.name.trim().to_string();
                b.audience = request.audience;
                b.schedule = request.schedule;
                b.test_settings = request.test_settings;
                b.utm_parameters = request.utm_parameters;
                b.tracking_enabled = request.tracking_enabled;
                b.updated_at = Utc::now();
                validate_broadcast(b)?;
                Ok(None)
            })
            .await
            .map_err(storage_err("failed to update broadcast"))?;

        info!(workspace_id = %workspace_id, broadcast_id = %broadcast_id, "Broadcast updated");
        Ok(broadcast)
    }

    /// List broadcasts; a variation whose template cannot be loaded is
    /// returned without it and reported in `template_errors`
    pub async fn list_broadcasts(
        &self,
        ctx: &Context,
        workspace_id: &str,
        request: ListBroadcastsRequest,
    ) -> Result<ListBroadcastsResponse> {
        self.authenticate(ctx, workspace_id).await?;

        let params = ListBroadcastsParams {
            workspace_id: workspace_id.to_string(),
            status: request.status,
            pagination: Pagination::normalize(request.limit, request.offset),
        };
        let mut page = self
            .broadcasts
            .list_broadcasts(&params)
            .await
            .map_err(storage_err("failed to list broadcasts"))?;

        let mut template_errors = Vec::new();
        if request.with_templates {
            for broadcast in &mut page.broadcasts {
                for variation in &mut broadcast.test_settings.variations {
                    match self
                        .templates
                        .get_template_by_id(workspace_id, &variation.template_id, 0)
                        .await
                    {
                        Ok(template) => variation.template = Some(template),
                        Err(e) => {
                            warn!(
                                workspace_id = %workspace_id,
                                broadcast_id = %broadcast.id,
                                variation_id = %variation.id,
                                template_id = %variation.template_id,
                                error = %e,
                                "Failed to attach template"
                            );
                            template_errors.push(TemplateAttachError {
                                broadcast_id: broadcast.id.clone(),
                                variation_id: variation.id.clone(),
                                template_id: variation.template_id.clone(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        Ok(ListBroadcastsResponse {
            broadcasts: page.broadcasts,
            total_count: page.total_count,
            template_errors,
        })
    }

    pub async fn schedule_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
        request: ScheduleBroadcastRequest,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;
        validate_schedule_request(&request)?;
        self.marketing_provider(workspace_id).await?;

        let send_now = request.send_now;
        let payload = EventPayload::new(BROADCAST_SCHEDULED, workspace_id, broadcast_id)
            .with_data("broadcast_id", broadcast_id)
            .with_data("send_now", send_now);
        let broadcast = self
            .transition(ctx, workspace_id, broadcast_id, "schedule", move |b| {
                apply_schedule(b, &request, Utc::now())?;
                Ok(Some(payload))
            })
            .await
            .map_err(storage_err("failed to schedule broadcast"))?;

        info!(
            workspace_id = %workspace_id,
            broadcast_id = %broadcast_id,
            status = %broadcast.status,
            send_now,
            "Broadcast scheduled"
        );
        Ok(broadcast)
    }

    pub async fn pause_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;

        let payload = EventPayload::new(BROADCAST_PAUSED, workspace_id, broadcast_id)
            .with_data("broadcast_id", broadcast_id);
        let broadcast = self
            .transition(ctx, workspace_id, broadcast_id, "pause", move |b| {
                apply_pause(b, Utc::now())?;
                Ok(Some(payload))
            })
            .await
            .map_err(storage_err("failed to pause broadcast"))?;

        info!(workspace_id = %workspace_id, broadcast_id = %broadcast_id, "Broadcast paused");
        Ok(broadcast)
    }

    pub async fn resume_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;

        let payload = EventPayload::new(BROADCAST_RESUMED, workspace_id, broadcast_id)
            .with_data("broadcast_id", broadcast_id);
        let broadcast = self
            .transition(ctx, workspace_id, broadcast_id, "resume", move |b| {
                let start_now = apply_resume(b, Utc::now())?;
                Ok(Some(payload.with_data("start_now", start_now)))
            })
            .await
            .map_err(storage_err("failed to resume broadcast"))?;

        info!(
            workspace_id = %workspace_id,
            broadcast_id = %broadcast_id,
            status = %broadcast.status,
            "Broadcast resumed"
        );
        Ok(broadcast)
    }

    pub async fn cancel_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<Broadcast> {
        self.authenticate(ctx, workspace_id).await?;

        let payload = EventPayload::new(BROADCAST_CANCELLED, workspace_id, broadcast_id)
            .with_data("broadcast_id", broadcast_id);
        let broadcast = self
            .transition(ctx, workspace_id, broadcast_id, "cancel", move |b| {
                apply_cancel(b, Utc::now())?;
                Ok(Some(payload))
            })
            .await
            .map_err(storage_err("failed to cancel broadcast"))?;

        info!(workspace_id = %workspace_id, broadcast_id = %broadcast_id, "Broadcast cancelled");
        Ok(broadcast)
    }

    pub async fn delete_broadcast(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
    ) -> Result<()> {
        self.authenticate(ctx, workspace_id).await?;

        let broadcast = self
            .broadcasts
            .get_broadcast(workspace_id, broadcast_id)
            .await
            .map_err(storage_err("failed to get broadcast"))?;
        ensure_deletable(&broadcast)?;

        self.broadcasts
            .delete_broadcast(workspace_id, broadcast_id)
            .await
            .map_err(storage_err("failed to delete broadcast"))?;

        info!(workspace_id = %workspace_id, broadcast_id = %broadcast_id, "Broadcast deleted");
        Ok(())
    }

    /// Send one variation of a broadcast to a single address; returns the message id
    pub async fn send_to_individual(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
        request: SendToIndividualRequest,
    ) -> Result<String> {
        self.authenticate(ctx, workspace_id).await?;
        validate_email(&request.recipient_email)?;

        let (workspace, provider) = self.marketing_provider(workspace_id).await?;

        let broadcast = self
            .broadcasts
            .get_broadcast(workspace_id, broadcast_id)
            .await
            .map_err(storage_err("failed to get broadcast"))?;

        let variation = broadcast
            .variation(request.variation_id.as_deref())
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "variation {}",
                    request.variation_id.as_deref().unwrap_or("(default)")
                ))
            })?;

        let contact = match self
            .contacts
            .get_contact_by_email(workspace_id, &request.recipient_email)
            .await
        {
            Ok(contact) => contact,
            Err(e) if e.is_not_found() => Contact::from_email(request.recipient_email.trim()),
            Err(e) => return Err(e.wrap("failed to get contact")),
        };

        let template = self
            .templates
            .get_template_by_id(workspace_id, &variation.template_id, 0)
            .await
            .map_err(storage_err("failed to get template"))?;

        let message_id = Uuid::new_v4().to_string();
        let rendered = self.renderer.render(
            &template,
            &contact,
            &RenderOptions {
                workspace_id,
                broadcast_id: Some(broadcast_id),
                message_id: &message_id,
                utm: broadcast.utm_parameters.as_ref(),
                tracking_enabled: broadcast.tracking_enabled
                    && workspace.settings.email_tracking_enabled,
            },
        );

        let sender = provider
            .sender(template.sender_id.as_deref())
            .ok_or_else(|| Error::Validation("no sender configured on the marketing provider".to_string()))?;

        let email = OutgoingEmail {
            message_id: message_id.clone(),
            from_email: sender.email.clone(),
            from_name: sender.name.clone(),
            to: contact.email.clone(),
            reply_to: template.reply_to.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        };

        self.sender
            .send(ctx, &provider, &email)
            .await
            .wrap_err("failed to send email")?;

        info!(
            workspace_id = %workspace_id,
            broadcast_id = %broadcast_id,
            variation_id = %variation.id,
            message_id = %message_id,
            provider = %provider.kind,
            "Test email sent"
        );
        Ok(message_id)
    }
}
