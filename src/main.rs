//! Huddle Server - Main Entry Point
//!
//! Conferencing backend: signaling, meeting state, job queue, minutes.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huddle_server::api::{self, AppState};
use huddle_server::cache::Cache;
use huddle_server::config::Config;
use huddle_server::db;
use huddle_server::email::EmailService;
use huddle_server::minutes::llm::LlmClient;
use huddle_server::queue::{JobContext, JobQueue};
use huddle_server::ws::rooms::RoomRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("huddle_server=info,tower_http=warn")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Huddle Server"
    );

    // Database is required; everything else degrades.
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    // Redis is optional: without it, presence falls back to the in-memory
    // room map and the job queue runs in in-memory fallback mode.
    let redis = match db::create_redis_client(&config.redis_url).await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(
                "Redis connection failed: {e}. Presence and durable queues disabled, \
                 running in single-node fallback mode."
            );
            None
        }
    };
    let cache = Cache::new(redis.clone());

    // Email service (optional - reminder/minutes emails disabled if absent).
    let email_service = if config.has_smtp() {
        match EmailService::new(&config) {
            Ok(service) => match service.test_connection().await {
                Ok(()) => {
                    info!("Email service initialized and SMTP connection verified");
                    Some(Arc::new(service))
                }
                Err(e) => {
                    warn!("SMTP connection test failed: {e}. Emails disabled.");
                    None
                }
            },
            Err(e) => {
                warn!("Email service initialization failed: {e}. Emails disabled.");
                None
            }
        }
    } else {
        info!("SMTP not configured. Emails disabled.");
        None
    };

    // LLM client (optional - minutes generation degrades without it).
    let llm = match &config.gemini_api_key {
        Some(key) => match LlmClient::new(key.clone(), config.gemini_model.clone()) {
            Ok(client) => {
                info!(model = %config.gemini_model, "LLM client initialized");
                Some(Arc::new(client))
            }
            Err(e) => {
                warn!("LLM client initialization failed: {e}. Minutes generation degraded.");
                None
            }
        },
        None => {
            info!("GEMINI_API_KEY not set. Minutes generation degraded.");
            None
        }
    };

    let config = Arc::new(config);
    let queue = JobQueue::new(redis);
    queue.install_context(JobContext {
        db: db_pool.clone(),
        config: Arc::clone(&config),
        cache: cache.clone(),
        email: email_service.clone(),
        llm: llm.clone(),
        queue: Arc::clone(&queue),
    });
    Arc::clone(&queue).start().await;

    let state = AppState {
        db: db_pool.clone(),
        config: Arc::clone(&config),
        cache,
        queue: Arc::clone(&queue),
        rooms: Arc::new(RoomRegistry::new()),
        email: email_service,
        llm,
    };

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, initiating graceful shutdown...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("HTTP server stopped, draining job queue...");

    // Workers finish in-flight jobs within a bounded deadline; new enqueues
    // are rejected from here on.
    queue.shutdown().await;

    db_pool.close().await;
    info!("Database pool closed");

    info!("Server shutdown complete");
    Ok(())
}
