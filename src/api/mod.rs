//! REST API

mod admin;
mod auth;
mod email_configs;
mod error;
mod subscriptions;
mod tasks;

pub use error::ApiError;

use crate::auth::TokenVerifier;
use crate::blacklist::DomainFilter;
use crate::email_configs::EmailConfigService;
use crate::subscription::SubscriptionManager;
use crate::tasks::TaskService;
use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiState {
    pub tasks: Arc<TaskService>,
    pub email_configs: Arc<EmailConfigService>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub filter: Arc<DomainFilter>,
    pub verifier: Arc<TokenVerifier>,
    /// Origins allowed by CORS; `*` allows any
    pub cors_origins: Arc<[String]>,
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub fn router(state: ApiState) -> Router {
    let api = Router::new()
        .route(
            "/api/monitor-tasks",
            get(tasks::list_tasks).post(tasks::create_task),
        )
        .route(
            "/api/monitor-tasks/{id}",
            get(tasks::get_task)
                .put(tasks::update_task)
                .delete(tasks::delete_task),
        )
        .route("/api/monitor-tasks/{id}/test", post(tasks::test_task))
        .route("/api/monitor-tasks/{id}/logs", get(tasks::task_logs))
        .route("/api/monitor-logs/latest", get(tasks::latest_logs))
        .route(
            "/api/email-configs",
            get(email_configs::list_configs).post(email_configs::create_config),
        )
        .route(
            "/api/email-configs/simple-list",
            get(email_configs::simple_list),
        )
        .route(
            "/api/email-configs/{id}",
            get(email_configs::get_config)
                .put(email_configs::update_config)
                .delete(email_configs::delete_config),
        )
        .route(
            "/api/email-configs/{id}/test",
            post(email_configs::test_config),
        )
        .route("/api/public-tasks", get(subscriptions::public_tasks))
        .route(
            "/api/subscription-info",
            get(subscriptions::subscription_info),
        )
        .route(
            "/api/subscriptions",
            get(subscriptions::list_subscriptions),
        )
        .route(
            "/api/subscriptions/{id}",
            put(subscriptions::update_subscription).delete(subscriptions::delete_subscription),
        )
        .route("/api/subscriptions/{id}/toggle", post(subscriptions::toggle))
        .route(
            "/api/subscriptions/{id}/subscribe-with-email",
            post(subscriptions::subscribe_with_email),
        )
        .route(
            "/api/blacklist-domains",
            get(admin::list_blacklist).post(admin::create_blacklist),
        )
        .route(
            "/api/blacklist-domains/{id}",
            put(admin::update_blacklist).delete(admin::delete_blacklist),
        )
        .route("/api/user-quotas/{id}", put(admin::set_user_quota))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::auth));

    let cors = cors_layer(&state.cors_origins);
    Router::new()
        .route("/health", get(health))
        .merge(api)
        .with_state(state)
        .layer(cors)
}

/// Serve the API on an already bound listener
pub async fn serve(listener: TcpListener, state: ApiState) -> Result<()> {
    axum::serve(listener, router(state).into_make_service())
        .await
        .context("API server failed")
}

pub async fn run_server(listen_address: &str, state: ApiState) -> Result<()> {
    let addr: SocketAddr = listen_address
        .parse()
        .with_context(|| format!("Invalid server.listen_address '{}'", listen_address))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🌐 API listening on http://{}", addr);
    serve(listener, state).await
}
