//! Reviewer roster: the data model for the per-chat review rotation.
//!
//! A reviewer is registered within exactly one chat, identified by the
//! `(chat, account)` pair. Following the principle of "make illegal states
//! unrepresentable", a reviewer has exactly two statuses: `Queued` (waiting
//! for work) and `Reviewing` (holding an assignment). The assignment
//! reference is present if and only if the reviewer is `Reviewing`.

pub mod engine;
pub mod repository;

use std::fmt;

use serde::Serialize;

/// Surrogate key for a reviewer, assigned at registration and immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ReviewerId(pub i64);

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype for a Telegram chat id, the scope within which a queue rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Newtype for a Telegram account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Lifecycle status of a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewerStatus {
    /// Waiting in the rotation for the next assignment.
    Queued,
    /// Holding an active review assignment.
    Reviewing,
}

impl ReviewerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Reviewing => "reviewing",
        }
    }

    /// Parse a stored status string. Returns `None` for unknown values so
    /// storage backends can report corruption instead of panicking.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "reviewing" => Some(Self::Reviewing),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered reviewer within one chat's rotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reviewer {
    pub id: ReviewerId,
    pub chat: ChatId,
    pub account: AccountId,
    /// Handle used to address the reviewer on GitLab.
    pub gitlab_handle: String,
    /// Handle used to address the reviewer on Jira.
    pub jira_handle: String,
    pub status: ReviewerStatus,
    /// Canonical reference to the merge request under review
    /// (e.g. `group/project!123`). `Some` iff `status == Reviewing`.
    pub active_review: Option<String>,
    /// Unix milliseconds of the most recent transition into `Reviewing`.
    /// `None` means never assigned, which sorts before all real timestamps.
    pub last_assigned_at: Option<i64>,
}

impl Reviewer {
    /// Whether the status/assignment invariant holds: an assignment
    /// reference is present exactly when the reviewer is `Reviewing`.
    pub fn invariants_hold(&self) -> bool {
        match self.status {
            ReviewerStatus::Reviewing => self.active_review.is_some(),
            ReviewerStatus::Queued => self.active_review.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [ReviewerStatus::Queued, ReviewerStatus::Reviewing] {
            assert_eq!(ReviewerStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(ReviewerStatus::parse("idle"), None);
        assert_eq!(ReviewerStatus::parse(""), None);
    }

    #[test]
    fn invariants_require_assignment_iff_reviewing() {
        let mut reviewer = Reviewer {
            id: ReviewerId(1),
            chat: ChatId(10),
            account: AccountId(100),
            gitlab_handle: "alice".to_string(),
            jira_handle: "alice".to_string(),
            status: ReviewerStatus::Queued,
            active_review: None,
            last_assigned_at: None,
        };
        assert!(reviewer.invariants_hold());

        reviewer.status = ReviewerStatus::Reviewing;
        assert!(!reviewer.invariants_hold());

        reviewer.active_review = Some("group/project!1".to_string());
        assert!(reviewer.invariants_hold());

        reviewer.status = ReviewerStatus::Queued;
        assert!(!reviewer.invariants_hold());
    }
}
