//! Review lifecycle controller.
//!
//! Orchestrates a review request across the roster and the external
//! collaborators. There is no cross-system transaction, so the flow follows
//! a compensating-action policy:
//!
//! 1. Resolve the merge request's title and author on the code host.
//! 2. Select-and-claim the next eligible reviewer (atomic in the store).
//! 3. Record the assignment on the code host. If this fails the claim has
//!    already committed; the inconsistency is surfaced to the caller and
//!    logged, never rolled back. Rolling back could hand the work to a
//!    different reviewer while the first assignment partially succeeded
//!    externally.
//! 4. Best-effort issue-tracker sync, keyed by the title's issue-key
//!    prefix. The roster is the source of truth; tracker sync is advisory.
//!
//! Ending a review is a single-step transition with no external side
//! effects; GitLab and Jira move on through their own workflows.

use std::fmt;
use std::sync::Arc;

use tracing::{error, warn};

use crate::collaborator::ExternalCallError;
use crate::gitlab::{CodeHost, MergeRequestLinkError, MergeRequestRef};
use crate::jira::{extract_issue_key, IssueTracker};
use crate::roster::engine::{AssignmentEngine, AssignmentError, CompletionError};
use crate::roster::{AccountId, ChatId, Reviewer};

/// Outcome of the advisory issue-tracker sync.
#[derive(Debug)]
pub enum TrackerSync {
    /// The issue was assigned and moved to review.
    Updated { issue_key: String },
    /// The merge request title carries no issue key; sync skipped.
    NoIssueKey,
    /// Sync was attempted and failed; the assignment stands.
    Failed {
        issue_key: String,
        error: ExternalCallError,
    },
}

/// A successfully assigned review.
#[derive(Debug)]
pub struct AssignedReview {
    pub reviewer: Reviewer,
    pub merge_request: MergeRequestRef,
    pub tracker: TrackerSync,
}

/// Why an assignment request failed.
#[derive(Debug)]
pub enum AssignError {
    /// The work-item locator was rejected before any external call.
    MalformedLink(MergeRequestLinkError),
    /// The merge request could not be resolved on the code host.
    AuthorLookup(ExternalCallError),
    /// Every reviewer in the chat is either the author or already busy.
    NoEligibleReviewer,
    /// The reviewer was claimed but recording the assignment on the code
    /// host failed; the claim stands and needs operator attention.
    RecordAssignment {
        reviewer: Reviewer,
        error: ExternalCallError,
    },
    Repository(crate::roster::repository::RepositoryError),
}

impl fmt::Display for AssignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedLink(e) => write!(f, "malformed merge request link: {}", e),
            Self::AuthorLookup(e) => write!(f, "{}", e),
            Self::NoEligibleReviewer => write!(f, "no eligible reviewer in the queue"),
            Self::RecordAssignment { reviewer, error } => write!(
                f,
                "reviewer {} claimed but recording the assignment failed: {}",
                reviewer.gitlab_handle, error
            ),
            Self::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AssignError {}

/// The controller composing store, engine and collaborators. Constructed
/// once at startup and handed its dependencies explicitly.
#[derive(Clone)]
pub struct ReviewLifecycle {
    engine: AssignmentEngine,
    code_host: Arc<dyn CodeHost>,
    issue_tracker: Arc<dyn IssueTracker>,
}

impl ReviewLifecycle {
    pub fn new(
        engine: AssignmentEngine,
        code_host: Arc<dyn CodeHost>,
        issue_tracker: Arc<dyn IssueTracker>,
    ) -> Self {
        Self {
            engine,
            code_host,
            issue_tracker,
        }
    }

    /// Run the full assignment flow for a merge request link posted in
    /// `chat`.
    pub async fn assign_review(
        &self,
        chat: ChatId,
        link: &str,
    ) -> Result<AssignedReview, AssignError> {
        let mr = MergeRequestRef::parse(link).map_err(AssignError::MalformedLink)?;

        let info = self
            .code_host
            .resolve_merge_request(&mr)
            .await
            .map_err(AssignError::AuthorLookup)?;

        let reviewer = self
            .engine
            .select_reviewer(chat, &info.author_handle, &mr.to_string())
            .await
            .map_err(|e| match e {
                AssignmentError::NoEligibleReviewer => AssignError::NoEligibleReviewer,
                AssignmentError::Repository(e) => AssignError::Repository(e),
            })?;

        if let Err(error) = self
            .code_host
            .record_assignment(&mr, &reviewer.gitlab_handle)
            .await
        {
            error!(
                merge_request = %mr,
                reviewer = %reviewer.gitlab_handle,
                %error,
                "claim committed but code-host recording failed"
            );
            return Err(AssignError::RecordAssignment { reviewer, error });
        }

        let tracker = match extract_issue_key(&info.title) {
            None => TrackerSync::NoIssueKey,
            Some(issue_key) => {
                match self
                    .issue_tracker
                    .advance_to_review(issue_key, &reviewer.jira_handle)
                    .await
                {
                    Ok(()) => TrackerSync::Updated {
                        issue_key: issue_key.to_string(),
                    },
                    Err(error) => {
                        warn!(issue = %issue_key, %error, "advisory tracker sync failed");
                        TrackerSync::Failed {
                            issue_key: issue_key.to_string(),
                            error,
                        }
                    }
                }
            }
        };

        Ok(AssignedReview {
            reviewer,
            merge_request: mr,
            tracker,
        })
    }

    /// End the caller's current review and return them to the queue.
    pub async fn complete_review(
        &self,
        chat: ChatId,
        account: AccountId,
    ) -> Result<Reviewer, CompletionError> {
        self.engine.complete_review(chat, account).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::MergeRequestInfo;
    use crate::roster::repository::{InMemoryRepository, ReviewerRepository};
    use crate::roster::ReviewerStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const CHAT: ChatId = ChatId(42);
    const LINK: &str = "https://gitlab.example.com/group/project/-/merge_requests/7";

    struct FakeCodeHost {
        title: String,
        author: String,
        fail_resolve: bool,
        fail_record: bool,
        recorded: Mutex<Vec<(String, String)>>,
    }

    impl FakeCodeHost {
        fn new(title: &str, author: &str) -> Self {
            Self {
                title: title.to_string(),
                author: author.to_string(),
                fail_resolve: false,
                fail_record: false,
                recorded: Mutex::new(Vec::new()),
            }
        }

        fn fail(operation: &'static str) -> ExternalCallError {
            ExternalCallError::new(
                crate::collaborator::Collaborator::GitLab,
                operation,
                "simulated failure",
            )
        }
    }

    #[async_trait]
    impl CodeHost for FakeCodeHost {
        async fn resolve_merge_request(
            &self,
            _mr: &MergeRequestRef,
        ) -> Result<MergeRequestInfo, ExternalCallError> {
            if self.fail_resolve {
                return Err(Self::fail("fetch merge request"));
            }
            Ok(MergeRequestInfo {
                title: self.title.clone(),
                author_handle: self.author.clone(),
            })
        }

        async fn record_assignment(
            &self,
            mr: &MergeRequestRef,
            reviewer_handle: &str,
        ) -> Result<(), ExternalCallError> {
            if self.fail_record {
                return Err(Self::fail("assign merge request"));
            }
            self.recorded
                .lock()
                .unwrap()
                .push((mr.to_string(), reviewer_handle.to_string()));
            Ok(())
        }
    }

    struct FakeTracker {
        fail: bool,
        advanced: Mutex<Vec<(String, String)>>,
    }

    impl FakeTracker {
        fn new() -> Self {
            Self {
                fail: false,
                advanced: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl IssueTracker for FakeTracker {
        async fn advance_to_review(
            &self,
            issue_key: &str,
            reviewer_handle: &str,
        ) -> Result<(), ExternalCallError> {
            if self.fail {
                return Err(ExternalCallError::new(
                    crate::collaborator::Collaborator::Jira,
                    "transition issue",
                    "simulated failure",
                ));
            }
            self.advanced
                .lock()
                .unwrap()
                .push((issue_key.to_string(), reviewer_handle.to_string()));
            Ok(())
        }
    }

    struct Harness {
        lifecycle: ReviewLifecycle,
        repo: Arc<InMemoryRepository>,
        code_host: Arc<FakeCodeHost>,
        tracker: Arc<FakeTracker>,
    }

    fn harness(code_host: FakeCodeHost, tracker: FakeTracker) -> Harness {
        let repo = Arc::new(InMemoryRepository::new());
        let code_host = Arc::new(code_host);
        let tracker = Arc::new(tracker);
        let lifecycle = ReviewLifecycle::new(
            AssignmentEngine::new(repo.clone()),
            code_host.clone(),
            tracker.clone(),
        );
        Harness {
            lifecycle,
            repo,
            code_host,
            tracker,
        }
    }

    async fn register(repo: &InMemoryRepository, account: i64, handle: &str) {
        repo.register(CHAT, AccountId(account), handle, &format!("{}-jira", handle))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn happy_path_records_assignment_and_syncs_tracker() {
        let h = harness(
            FakeCodeHost::new("ABC-123: fix the thing", "dave"),
            FakeTracker::new(),
        );
        register(&h.repo, 1, "alice").await;

        let assigned = h.lifecycle.assign_review(CHAT, LINK).await.unwrap();

        assert_eq!(assigned.reviewer.gitlab_handle, "alice");
        assert_eq!(assigned.merge_request.to_string(), "group/project!7");
        assert!(matches!(
            assigned.tracker,
            TrackerSync::Updated { ref issue_key } if issue_key == "ABC-123"
        ));

        assert_eq!(
            *h.code_host.recorded.lock().unwrap(),
            vec![("group/project!7".to_string(), "alice".to_string())]
        );
        assert_eq!(
            *h.tracker.advanced.lock().unwrap(),
            vec![("ABC-123".to_string(), "alice-jira".to_string())]
        );
    }

    #[tokio::test]
    async fn malformed_link_is_rejected_before_any_external_call() {
        let mut code_host = FakeCodeHost::new("ABC-1: x", "dave");
        code_host.fail_resolve = true; // would blow up if reached
        let h = harness(code_host, FakeTracker::new());
        register(&h.repo, 1, "alice").await;

        let err = h
            .lifecycle
            .assign_review(CHAT, "https://gitlab.example.com/not-an-mr")
            .await
            .unwrap_err();
        assert!(matches!(err, AssignError::MalformedLink(_)));

        let alice = h.repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Queued);
    }

    #[tokio::test]
    async fn resolve_failure_leaves_the_queue_untouched() {
        let mut code_host = FakeCodeHost::new("ABC-1: x", "dave");
        code_host.fail_resolve = true;
        let h = harness(code_host, FakeTracker::new());
        register(&h.repo, 1, "alice").await;

        let err = h.lifecycle.assign_review(CHAT, LINK).await.unwrap_err();
        assert!(matches!(err, AssignError::AuthorLookup(_)));

        let alice = h.repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Queued);
    }

    #[tokio::test]
    async fn author_is_never_assigned_their_own_merge_request() {
        let h = harness(FakeCodeHost::new("ABC-1: x", "alice"), FakeTracker::new());
        register(&h.repo, 1, "alice").await;

        let err = h.lifecycle.assign_review(CHAT, LINK).await.unwrap_err();
        assert!(matches!(err, AssignError::NoEligibleReviewer));
        assert!(h.code_host.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_failure_surfaces_but_keeps_the_claim() {
        let mut code_host = FakeCodeHost::new("ABC-1: x", "dave");
        code_host.fail_record = true;
        let h = harness(code_host, FakeTracker::new());
        register(&h.repo, 1, "alice").await;

        let err = h.lifecycle.assign_review(CHAT, LINK).await.unwrap_err();
        let AssignError::RecordAssignment { reviewer, .. } = err else {
            panic!("expected RecordAssignment, got {:?}", err);
        };
        assert_eq!(reviewer.gitlab_handle, "alice");

        // The claim stands: alice is still marked reviewing.
        let alice = h.repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Reviewing);
        // Tracker sync never ran.
        assert!(h.tracker.advanced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn tracker_failure_is_advisory() {
        let mut tracker = FakeTracker::new();
        tracker.fail = true;
        let h = harness(FakeCodeHost::new("ABC-9: y", "dave"), tracker);
        register(&h.repo, 1, "alice").await;

        let assigned = h.lifecycle.assign_review(CHAT, LINK).await.unwrap();
        assert!(matches!(
            assigned.tracker,
            TrackerSync::Failed { ref issue_key, .. } if issue_key == "ABC-9"
        ));

        // The assignment itself succeeded.
        let alice = h.repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Reviewing);
    }

    #[tokio::test]
    async fn titles_without_issue_keys_skip_tracker_sync() {
        let h = harness(
            FakeCodeHost::new("tidy up the build", "dave"),
            FakeTracker::new(),
        );
        register(&h.repo, 1, "alice").await;

        let assigned = h.lifecycle.assign_review(CHAT, LINK).await.unwrap();
        assert!(matches!(assigned.tracker, TrackerSync::NoIssueKey));
        assert!(h.tracker.advanced.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_review_round_trips_through_the_queue() {
        let h = harness(FakeCodeHost::new("ABC-1: x", "dave"), FakeTracker::new());
        register(&h.repo, 1, "alice").await;

        h.lifecycle.assign_review(CHAT, LINK).await.unwrap();
        h.lifecycle
            .complete_review(CHAT, AccountId(1))
            .await
            .unwrap();

        let alice = h.repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Queued);
        assert_eq!(alice.active_review, None);
    }
}
