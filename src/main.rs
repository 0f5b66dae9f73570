mod api;
mod auth;
mod blacklist;
mod config;
mod db;
mod email_configs;
mod error;
mod notifier;
mod scheduler;
mod subscription;
mod tasks;
mod utils;

use crate::config::{Config, RendererKind, SchedulerConfig};
use anyhow::{Context, Result};
use page_client::{
    BrowserRenderer, BrowserRendererConfig, HttpRenderer, HttpRendererConfig, PageClient, Renderer,
};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    let log_level = config.log_level();
    let log_dir = &config.logging.dir;

    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir)?;

    // Setup file appender (daily rotation)
    let file_appender = tracing_appender::rolling::daily(log_dir, "webmonitor.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Use local time for log timestamps
    let local_timer = ChronoLocal::rfc_3339();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_file(true)
        .with_target(false)
        .with_timer(local_timer.clone());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_timer(local_timer)
        .with_writer(non_blocking);

    // Filter layer based on config
    let filter_layer = EnvFilter::from_default_env()
        .add_directive(log_level.into())
        .add_directive("sqlx=warn".parse()?)
        .add_directive("sea_orm=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    info!("Starting WebMonitor...");
    info!("Logs are written to: {}", log_dir);

    // Connect to database
    db::ensure_sqlite_dir(&config.database.url)?;
    let db = db::establish_connection(&config.database.url).await?;

    // Run migrations
    migration::Migrator::up(&db, None).await?;
    info!("✅ Database migrations completed");

    let repo = Arc::new(db::repo::Repo::new(db));
    repo.ping().await?;
    info!("✅ Database ping successful");

    // Page fetching
    let scheduler_config = &config.scheduler;
    let renderer = build_renderer(scheduler_config).await?;
    let client = PageClient::new(
        renderer,
        scheduler_config.max_concurrent_fetches,
        scheduler_config.fetch_timeout(),
    );
    info!(
        "✅ Page client initialized ({} concurrent session(s))",
        scheduler_config.max_concurrent_fetches
    );

    // Notifications
    let mailer = Arc::new(notifier::SmtpMailer::new(
        config.notification.sender_name.clone(),
        config.notification.smtp_timeout(),
    ));
    let dispatcher = Arc::new(notifier::Dispatcher::new(repo.clone(), mailer));

    // Scheduler
    let runner = Arc::new(scheduler::CycleRunner::new(
        repo.clone(),
        client.clone(),
        dispatcher.clone(),
        scheduler_config.fetch_timeout(),
        scheduler_config.log_excerpt_chars,
    ));
    let scheduler = scheduler::SchedulerEngine::new(
        repo.clone(),
        runner,
        std::time::Duration::from_secs(scheduler_config.startup_jitter_sec),
    );
    let loaded = scheduler.load_active_tasks().await?;
    info!("✅ Scheduler initialized with {} active task(s)", loaded);

    // Services
    let filter = Arc::new(blacklist::DomainFilter::new(repo.clone()));
    let state = api::ApiState {
        tasks: Arc::new(tasks::TaskService::new(
            repo.clone(),
            filter.clone(),
            scheduler.clone(),
            client,
            scheduler_config.min_interval_sec..=scheduler_config.max_interval_sec,
            scheduler_config.fetch_timeout(),
        )),
        email_configs: Arc::new(email_configs::EmailConfigService::new(
            repo.clone(),
            dispatcher,
        )),
        subscriptions: Arc::new(subscription::SubscriptionManager::new(
            repo,
            config.subscription.default_max_subscriptions,
        )),
        filter,
        verifier: Arc::new(auth::TokenVerifier::new(&config.auth.jwt_secret)),
        cors_origins: config.server.cors_origins.clone().into(),
    };

    // Setup Ctrl+C handler
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    let server_shutdown_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down...");
        let _ = shutdown_tx.send(()).await;
    });

    // Start API server
    let listen_address = config.server.listen_address.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = api::run_server(&listen_address, state).await {
            error!("API server error: {:?}", e);
            let _ = server_shutdown_tx.send(()).await;
        }
    });

    // Wait for shutdown signal
    shutdown_rx.recv().await;
    info!("Shutting down gracefully...");

    scheduler.shutdown().await;
    server_handle.abort();

    info!("✅ Shutdown complete");
    Ok(())
}

/// Headless browser by default; plain HTTP when configured or when no
/// browser can be started
async fn build_renderer(config: &SchedulerConfig) -> Result<Arc<dyn Renderer>> {
    let user_agent = config
        .user_agent
        .clone()
        .unwrap_or_else(|| page_client::DEFAULT_USER_AGENT.to_string());

    if config.renderer == RendererKind::Browser {
        let browser_config = BrowserRendererConfig {
            chrome_executable: config.chrome_executable.as_ref().map(Into::into),
            user_agent: user_agent.clone(),
            request_timeout: config.fetch_timeout(),
            max_settle: std::time::Duration::from_secs(config.settle_timeout_sec),
            ..Default::default()
        };
        match BrowserRenderer::launch(browser_config).await {
            Ok(renderer) => {
                info!("✅ Using headless browser renderer");
                return Ok(Arc::new(renderer));
            }
            Err(e) => warn!("Failed to launch headless browser, falling back to HTTP: {}", e),
        }
    }

    let renderer = HttpRenderer::new(HttpRendererConfig {
        user_agent,
        max_body_bytes: config.max_body_bytes,
        ..Default::default()
    })
    .context("Failed to build HTTP renderer")?;
    info!("✅ Using HTTP renderer");
    Ok(Arc::new(renderer))
}
