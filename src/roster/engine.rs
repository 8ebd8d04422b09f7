//! Assignment engine: selection and lifecycle transitions for the rotation.
//!
//! The engine layers the assignment decisions on top of the repository.
//! Fairness is entirely a function of `last_assigned_at` plus the
//! registration-order tie-break, and selection is fused with the claim in
//! the repository so concurrent requests can never pick the same reviewer.

use std::fmt;
use std::sync::Arc;

use tracing::info;

use super::repository::{RepositoryError, ReviewerRepository};
use super::{AccountId, ChatId, Reviewer, ReviewerStatus};

/// Why an assignment request produced no reviewer.
#[derive(Debug)]
pub enum AssignmentError {
    /// Every reviewer in the chat is either the author or already reviewing.
    NoEligibleReviewer,
    Repository(RepositoryError),
}

impl fmt::Display for AssignmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEligibleReviewer => write!(f, "no eligible reviewer in the queue"),
            Self::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AssignmentError {}

impl From<RepositoryError> for AssignmentError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e)
    }
}

/// Why an end-of-review request was rejected.
#[derive(Debug)]
pub enum CompletionError {
    /// The caller has no record in this chat's roster.
    NotRegistered,
    /// The caller is registered but not currently holding a review.
    NotReviewing,
    Repository(RepositoryError),
}

impl fmt::Display for CompletionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => write!(f, "reviewer is not registered"),
            Self::NotReviewing => write!(f, "reviewer is not currently reviewing"),
            Self::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CompletionError {}

impl From<RepositoryError> for CompletionError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e)
    }
}

/// Pure decision logic for the rotation, backed by a repository.
#[derive(Clone)]
pub struct AssignmentEngine {
    repository: Arc<dyn ReviewerRepository>,
}

impl AssignmentEngine {
    pub fn new(repository: Arc<dyn ReviewerRepository>) -> Self {
        Self { repository }
    }

    /// Select-and-claim the next reviewer for an assignment authored by
    /// `author_gitlab_handle`.
    ///
    /// On success the returned reviewer is already `Reviewing` with the
    /// assignment recorded. On `NoEligibleReviewer` nothing was mutated.
    pub async fn select_reviewer(
        &self,
        chat: ChatId,
        author_gitlab_handle: &str,
        assignment: &str,
    ) -> Result<Reviewer, AssignmentError> {
        match self
            .repository
            .claim_next(chat, author_gitlab_handle, assignment)
            .await?
        {
            Some(reviewer) => {
                info!(
                    chat = %chat,
                    reviewer = %reviewer.gitlab_handle,
                    assignment = %assignment,
                    "claimed reviewer for assignment"
                );
                Ok(reviewer)
            }
            None => Err(AssignmentError::NoEligibleReviewer),
        }
    }

    /// Transition the caller's review back to `Queued`.
    ///
    /// Distinguishes "not registered" from "not currently reviewing"; both
    /// leave the roster untouched. Returns the reviewer as they were while
    /// still reviewing.
    pub async fn complete_review(
        &self,
        chat: ChatId,
        account: AccountId,
    ) -> Result<Reviewer, CompletionError> {
        let Some(reviewer) = self.repository.find(chat, account).await? else {
            return Err(CompletionError::NotRegistered);
        };

        if reviewer.status != ReviewerStatus::Reviewing {
            return Err(CompletionError::NotReviewing);
        }

        // Conditional requeue: if another completion slipped in between the
        // read and this write, report the state as it now stands.
        if !self.repository.requeue(reviewer.id).await? {
            return Err(CompletionError::NotReviewing);
        }

        info!(
            chat = %chat,
            reviewer = %reviewer.gitlab_handle,
            "reviewer returned to the queue"
        );
        Ok(reviewer)
    }
}
