//! Repository abstraction for reviewer persistence.
//!
//! This module defines the `ReviewerRepository` trait that abstracts storage
//! of the reviewer roster. Implementations provide different backends:
//! in-memory (tests) and SQLite (production, survives restart).
//!
//! The fused `claim_next` operation is the concurrency-critical piece: it
//! must select the next eligible reviewer and mark them `Reviewing` as one
//! atomic step, so that two concurrent assignment requests can never claim
//! the same reviewer.

mod memory;
mod sqlite;

pub use memory::InMemoryRepository;
pub use sqlite::SqliteRepository;

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;

use super::{AccountId, ChatId, Reviewer, ReviewerId};

/// Errors surfaced by repository operations.
#[derive(Debug)]
pub enum RepositoryError {
    /// A reviewer with the same `(chat, account)` key already exists.
    AlreadyRegistered,
    /// The storage backend failed.
    Storage { operation: String, detail: String },
    /// Stored data could not be interpreted.
    Corruption { what: String },
}

impl RepositoryError {
    pub fn storage(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Storage {
            operation: operation.into(),
            detail: detail.into(),
        }
    }

    pub fn corruption(what: impl Into<String>) -> Self {
        Self::Corruption { what: what.into() }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered => write!(f, "reviewer is already registered"),
            Self::Storage { operation, detail } => {
                write!(f, "storage failure during {}: {}", operation, detail)
            }
            Self::Corruption { what } => write!(f, "corrupt stored data: {}", what),
        }
    }
}

impl std::error::Error for RepositoryError {}

/// Fairness ordering for the rotation: never-assigned reviewers first, then
/// ascending `last_assigned_at`, with registration order (ascending id) as
/// the tie-break.
///
/// This is the single definition of queue order. The in-memory backend uses
/// it directly; the SQLite backend encodes the same ordering in SQL
/// (`ORDER BY (last_assigned_at IS NOT NULL), last_assigned_at, id`) rather
/// than relying on the engine's NULL collation.
pub fn queue_order(a: &Reviewer, b: &Reviewer) -> Ordering {
    match (a.last_assigned_at, b.last_assigned_at) {
        (None, None) => a.id.0.cmp(&b.id.0),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y).then(a.id.0.cmp(&b.id.0)),
    }
}

/// Repository trait for the reviewer roster.
///
/// All operations are atomic with respect to each other for a given chat:
/// no interleaving of `claim_next` calls may observe and commit the same
/// reviewer.
#[async_trait]
pub trait ReviewerRepository: Send + Sync {
    /// Create a reviewer with status `Queued` and no assignment history.
    ///
    /// Fails with `RepositoryError::AlreadyRegistered` if `(chat, account)`
    /// is already present.
    async fn register(
        &self,
        chat: ChatId,
        account: AccountId,
        gitlab_handle: &str,
        jira_handle: &str,
    ) -> Result<Reviewer, RepositoryError>;

    /// Look up a reviewer by natural key. Absence is not an error.
    async fn find(
        &self,
        chat: ChatId,
        account: AccountId,
    ) -> Result<Option<Reviewer>, RepositoryError>;

    /// Hard-delete a reviewer. Idempotent; returns whether a record existed.
    async fn remove(&self, chat: ChatId, account: AccountId) -> Result<bool, RepositoryError>;

    /// Read-only fairness query: the `Queued` reviewer in `chat` whose
    /// GitLab handle differs from `excluded_gitlab_handle`, first in
    /// [`queue_order`]. Returns `None` when nobody is eligible.
    async fn next_eligible(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
    ) -> Result<Option<Reviewer>, RepositoryError>;

    /// Fused select-and-claim: atomically pick the next eligible reviewer
    /// (same ordering as [`ReviewerRepository::next_eligible`]), transition
    /// them to `Reviewing` with the given assignment reference and stamp
    /// `last_assigned_at` with the current time.
    ///
    /// Returns the claimed reviewer in their post-claim state, or `None`
    /// without mutating anything when nobody is eligible.
    async fn claim_next(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
        assignment: &str,
    ) -> Result<Option<Reviewer>, RepositoryError>;

    /// Conditional transition `Reviewing -> Queued`: clears the assignment
    /// reference and leaves `last_assigned_at` untouched (it feeds the
    /// fairness ordering). Returns `false` if the reviewer is missing or
    /// not currently `Reviewing`.
    async fn requeue(&self, id: ReviewerId) -> Result<bool, RepositoryError>;

    /// All reviewers in a chat, in [`queue_order`].
    async fn list(&self, chat: ChatId) -> Result<Vec<Reviewer>, RepositoryError>;

    /// All reviewers across every chat, in `(chat, queue_order)` order.
    async fn list_all(&self) -> Result<Vec<Reviewer>, RepositoryError>;
}
