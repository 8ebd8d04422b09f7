use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, Level};

use rotabot::config::Config;
use rotabot::gitlab::GitLabClient;
use rotabot::jira::JiraClient;
use rotabot::lifecycle::ReviewLifecycle;
use rotabot::roster::engine::AssignmentEngine;
use rotabot::roster::repository::{ReviewerRepository, SqliteRepository};
use rotabot::status::StatusData;
use rotabot::telegram::TelegramClient;
use rotabot::webhook::webhook_router;
use rotabot::AppState;

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "rotabot"
    }))
}

async fn status_handler(headers: HeaderMap, State(state): State<Arc<AppState>>) -> Response {
    // The endpoint is disabled entirely unless an auth token is configured.
    let Some(expected) = state.status_auth_token.as_deref() else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if presented != Some(expected) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    match state.repository.list_all().await {
        Ok(reviewers) => {
            let data = StatusData::from_reviewers(reviewers, rotabot::bot_version().to_string());
            Json(data).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "status snapshot failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting review rotation bot v{}", rotabot::bot_version());

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let telegram_client = TelegramClient::new(&config.telegram_bot_token)?;
    let gitlab_client = GitLabClient::new(&config.gitlab_url, &config.gitlab_token)?;
    let jira_client = JiraClient::new(&config.jira_url, &config.jira_user, &config.jira_token)?;

    let db_path = config.state_dir.join("rotabot-state.db");
    info!("Using roster database: {}", db_path.display());
    let repository: Arc<dyn ReviewerRepository> = Arc::new(
        SqliteRepository::new(&db_path).context("Failed to initialize roster database")?,
    );

    let lifecycle = ReviewLifecycle::new(
        AssignmentEngine::new(repository.clone()),
        Arc::new(gitlab_client),
        Arc::new(jira_client),
    );

    let app_state = Arc::new(AppState {
        repository,
        lifecycle,
        telegram_client,
        webhook_secret: config.telegram_webhook_secret,
        status_auth_token: config.status_auth_token,
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_handler))
        .merge(webhook_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
