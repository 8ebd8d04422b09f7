//! Telegram webhook front end.
//!
//! Receives Bot API updates over HTTP, parses commands and dispatches them
//! to the roster and the lifecycle controller. All chat formatting lives
//! here; the core hands back typed outcomes.
//!
//! Telegram authenticates deliveries by echoing the secret token configured
//! on the webhook in the `X-Telegram-Bot-Api-Secret-Token` header. The
//! handler always answers 200 once the header checks out, even for
//! messages it ignores, so Telegram doesn't redeliver.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::command::{parse_message, BotCommand, ParseResult, RegisterOptions};
use crate::lifecycle::{AssignError, AssignedReview, TrackerSync};
use crate::roster::engine::CompletionError;
use crate::roster::repository::{RepositoryError, ReviewerRepository};
use crate::roster::{AccountId, ChatId, Reviewer, ReviewerStatus};
use crate::AppState;

pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

const WELCOME_TEXT: &str = "Welcome to the review rotation! \
Use /register gitlab:<handle> jira:<handle> to join the queue.";

const REGISTER_USAGE: &str =
    "Usage: /register gitlab:<handle> jira:<handle> - both handles are required.";

// =============================================================================
// Bot API payload types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<Sender>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

fn respond(message: impl Into<String>) -> (StatusCode, Json<WebhookResponse>) {
    (
        StatusCode::OK,
        Json(WebhookResponse {
            message: message.into(),
        }),
    )
}

// =============================================================================
// Handler
// =============================================================================

pub async fn telegram_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> (StatusCode, Json<WebhookResponse>) {
    let presented = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if presented != state.webhook_secret {
        warn!(update_id = update.update_id, "webhook delivery with bad secret token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(WebhookResponse {
                message: "invalid secret token".to_string(),
            }),
        );
    }

    let Some(message) = update.message else {
        return respond("ignored: no message");
    };
    let Some(text) = message.text.as_deref() else {
        return respond("ignored: no text");
    };
    let Some(sender) = message.from.as_ref() else {
        return respond("ignored: no sender");
    };

    let command = match parse_message(text) {
        ParseResult::NotACommand => return respond("ignored: not a command"),
        ParseResult::UnrecognizedCommand { attempted } => {
            let reply = format!(
                "Unknown command '/{}'. Try /register, /unregister, /review, /end_review or /queue.",
                attempted
            );
            send_reply(&state, ChatId(message.chat.id), &reply).await;
            return respond(reply);
        }
        ParseResult::Command(command) => command,
    };

    let correlation_id = Uuid::new_v4().to_string();
    let chat = ChatId(message.chat.id);
    let account = AccountId(sender.id);
    info!(
        correlation_id = %correlation_id,
        update_id = update.update_id,
        message_id = message.message_id,
        chat = %chat,
        account = %account,
        command = %command,
        "processing command"
    );

    let reply = match command {
        BotCommand::Start => WELCOME_TEXT.to_string(),
        BotCommand::Register(options) => process_register(&state, chat, account, options).await,
        BotCommand::Unregister => process_unregister(&state, chat, account).await,
        BotCommand::Review { link } => process_review(&state, chat, &link).await,
        BotCommand::EndReview => process_end_review(&state, chat, account).await,
        BotCommand::Queue => process_queue(&state, chat).await,
    };

    send_reply(&state, chat, &reply).await;
    respond(reply)
}

async fn send_reply(state: &AppState, chat: ChatId, text: &str) {
    if let Err(e) = state.telegram_client.send_message(chat, text).await {
        error!(chat = %chat, error = %e, "failed to deliver reply");
    }
}

// =============================================================================
// Command processing
// =============================================================================

async fn process_register(
    state: &AppState,
    chat: ChatId,
    account: AccountId,
    options: RegisterOptions,
) -> String {
    let (Some(gitlab), Some(jira)) = (options.gitlab, options.jira) else {
        return REGISTER_USAGE.to_string();
    };

    match state.repository.register(chat, account, &gitlab, &jira).await {
        Ok(reviewer) => format!(
            "Registration complete! {} has been added to the review queue.",
            reviewer.gitlab_handle
        ),
        Err(RepositoryError::AlreadyRegistered) => "You are already registered!".to_string(),
        Err(e) => {
            error!(chat = %chat, account = %account, error = %e, "registration failed");
            "Something went wrong while registering; please try again.".to_string()
        }
    }
}

async fn process_unregister(state: &AppState, chat: ChatId, account: AccountId) -> String {
    match state.repository.remove(chat, account).await {
        Ok(true) => "You've been removed from the review rotation.".to_string(),
        Ok(false) => "You are not registered in this chat.".to_string(),
        Err(e) => {
            error!(chat = %chat, account = %account, error = %e, "unregistration failed");
            "Something went wrong while unregistering; please try again.".to_string()
        }
    }
}

async fn process_review(state: &AppState, chat: ChatId, link: &str) -> String {
    if link.is_empty() {
        return "Please provide a merge request link: /review <link>".to_string();
    }

    match state.lifecycle.assign_review(chat, link).await {
        Ok(assigned) => render_assignment(&assigned),
        Err(e) => render_assign_error(&e),
    }
}

async fn process_end_review(state: &AppState, chat: ChatId, account: AccountId) -> String {
    match state.lifecycle.complete_review(chat, account).await {
        Ok(_) => "Review completed, you've been added back to the queue!".to_string(),
        Err(CompletionError::NotRegistered) => "You are not registered!".to_string(),
        Err(CompletionError::NotReviewing) => "You are not reviewing anything!".to_string(),
        Err(CompletionError::Repository(e)) => {
            error!(chat = %chat, account = %account, error = %e, "end review failed");
            "Something went wrong while ending the review; please try again.".to_string()
        }
    }
}

async fn process_queue(state: &AppState, chat: ChatId) -> String {
    match state.repository.list(chat).await {
        Ok(reviewers) => render_queue(&reviewers),
        Err(e) => {
            error!(chat = %chat, error = %e, "queue listing failed");
            "Something went wrong while reading the queue; please try again.".to_string()
        }
    }
}

// =============================================================================
// Reply rendering
// =============================================================================

fn render_assignment(assigned: &AssignedReview) -> String {
    let mut reply = format!("Review assigned to @{}!", assigned.reviewer.gitlab_handle);
    match &assigned.tracker {
        TrackerSync::Updated { issue_key } => {
            reply.push_str(&format!(" {} moved to review.", issue_key));
        }
        TrackerSync::NoIssueKey => {}
        TrackerSync::Failed { issue_key, error } => {
            reply.push_str(&format!(
                " (Jira update for {} failed: {})",
                issue_key, error
            ));
        }
    }
    reply
}

fn render_assign_error(error: &AssignError) -> String {
    match error {
        AssignError::MalformedLink(e) => {
            format!("Invalid merge request link: {}.", e)
        }
        AssignError::AuthorLookup(e) => format!("Could not look up the merge request: {}.", e),
        AssignError::NoEligibleReviewer => "No available reviewers in the queue.".to_string(),
        AssignError::RecordAssignment { reviewer, error } => format!(
            "@{} took the review, but updating GitLab failed: {}. \
             The assignment stands; please set the reviewer on the merge request manually.",
            reviewer.gitlab_handle, error
        ),
        AssignError::Repository(e) => {
            error!(error = %e, "assignment failed in the store");
            "Something went wrong while assigning the review; please try again.".to_string()
        }
    }
}

fn render_queue(reviewers: &[Reviewer]) -> String {
    if reviewers.is_empty() {
        return "Nobody is registered in this chat yet. Use /register to join.".to_string();
    }

    let mut lines = vec!["Review rotation (next up first):".to_string()];
    let mut position = 0;
    for reviewer in reviewers
        .iter()
        .filter(|r| r.status == ReviewerStatus::Queued)
    {
        position += 1;
        lines.push(format!("{}. {}", position, reviewer.gitlab_handle));
    }
    if position == 0 {
        lines.push("(everyone is currently reviewing)".to_string());
    }

    let reviewing: Vec<&Reviewer> = reviewers
        .iter()
        .filter(|r| r.status == ReviewerStatus::Reviewing)
        .collect();
    if !reviewing.is_empty() {
        lines.push("Currently reviewing:".to_string());
        for reviewer in reviewing {
            let assignment = reviewer.active_review.as_deref().unwrap_or("?");
            lines.push(format!("- {} ({})", reviewer.gitlab_handle, assignment));
        }
    }

    lines.join("\n")
}

pub fn webhook_router() -> Router<Arc<AppState>> {
    Router::new().route("/webhook", post(telegram_webhook_handler))
}
