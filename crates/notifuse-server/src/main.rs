//! Notifuse - API server entry point

use anyhow::{Context as _, Result};
use notifuse_api::{create_router, AppState};
use notifuse_common::config::{Config, LoggingConfig};
use notifuse_core::{
    ApiKeyAuthenticator, BroadcastService, BroadcastServiceDeps, InProcessEventBus,
    SmtpEmailSender, SnsSubscriptionConfirmer, TemplateRenderer, WebhookEventService,
    WebhookServiceDeps,
};
use notifuse_storage::{
    DatabasePool, DbBroadcastRepository, DbContactRepository, DbMessageHistoryRepository,
    DbTemplateRepository, DbWebhookEventRepository, DbWorkspaceRepository,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Notifuse API server...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    if config.database.run_migrations {
        db_pool.migrate().await?;
    }

    // Repositories
    let workspaces = Arc::new(DbWorkspaceRepository::new(db_pool.clone()));
    let auth = Arc::new(ApiKeyAuthenticator::new(config.auth.api_keys.clone()));
    info!(api_keys = config.auth.api_keys.len(), "API key authentication configured");

    // Broadcast lifecycle
    let broadcasts = BroadcastService::new(BroadcastServiceDeps {
        broadcasts: Arc::new(DbBroadcastRepository::new(db_pool.clone())),
        workspaces: workspaces.clone(),
        contacts: Arc::new(DbContactRepository::new(db_pool.clone())),
        templates: Arc::new(DbTemplateRepository::new(db_pool.clone())),
        auth: auth.clone(),
        events: Arc::new(InProcessEventBus::new()),
        sender: Arc::new(SmtpEmailSender::default()),
        renderer: Arc::new(TemplateRenderer::new(&config.tracking)?),
    });

    // Webhook ingestion
    let webhooks = WebhookEventService::new(WebhookServiceDeps {
        workspaces,
        events: Arc::new(DbWebhookEventRepository::new(db_pool.clone())),
        message_history: Arc::new(DbMessageHistoryRepository::new(db_pool.clone())),
        confirmer: Arc::new(SnsSubscriptionConfirmer::new(&config.webhooks)?),
        auth,
    });

    let app = create_router(AppState {
        broadcasts: Arc::new(broadcasts),
        webhooks: Arc::new(webhooks),
        request_timeout: Duration::from_secs(config.api.request_timeout_secs),
        db_pool: Some(db_pool),
    });

    let addr = format!("{}:{}", config.server.bind_address, config.api.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;
    info!("Starting API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Notifuse server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},notifuse=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
