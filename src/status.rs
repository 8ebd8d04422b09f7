//! Queue snapshot served by the `/status` endpoint.

use serde::Serialize;

use crate::roster::{Reviewer, ReviewerStatus};

#[derive(Debug, Serialize)]
pub struct StatusData {
    pub version: String,
    pub summary: Summary,
    pub chats: Vec<ChatQueue>,
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub total_reviewers: usize,
    pub reviewing: usize,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct ChatQueue {
    pub chat_id: i64,
    /// Reviewers in fairness order (next to be assigned first).
    pub queued: Vec<ReviewerEntry>,
    pub reviewing: Vec<ReviewerEntry>,
}

#[derive(Debug, Serialize)]
pub struct ReviewerEntry {
    pub gitlab_handle: String,
    pub jira_handle: String,
    pub active_review: Option<String>,
    pub last_assigned_at: Option<i64>,
}

impl From<&Reviewer> for ReviewerEntry {
    fn from(r: &Reviewer) -> Self {
        Self {
            gitlab_handle: r.gitlab_handle.clone(),
            jira_handle: r.jira_handle.clone(),
            active_review: r.active_review.clone(),
            last_assigned_at: r.last_assigned_at,
        }
    }
}

impl StatusData {
    /// Build a snapshot from reviewers already sorted by
    /// `(chat, fairness order)`, as `list_all` returns them.
    pub fn from_reviewers(reviewers: Vec<Reviewer>, version: String) -> Self {
        let reviewing = reviewers
            .iter()
            .filter(|r| r.status == ReviewerStatus::Reviewing)
            .count();
        let summary = Summary {
            total_reviewers: reviewers.len(),
            reviewing,
            queued: reviewers.len() - reviewing,
        };

        let mut chats: Vec<ChatQueue> = Vec::new();
        for reviewer in &reviewers {
            if chats.last().map(|c| c.chat_id) != Some(reviewer.chat.0) {
                chats.push(ChatQueue {
                    chat_id: reviewer.chat.0,
                    queued: Vec::new(),
                    reviewing: Vec::new(),
                });
            }
            if let Some(chat) = chats.last_mut() {
                match reviewer.status {
                    ReviewerStatus::Queued => chat.queued.push(reviewer.into()),
                    ReviewerStatus::Reviewing => chat.reviewing.push(reviewer.into()),
                }
            }
        }

        Self {
            version,
            summary,
            chats,
        }
    }
}
