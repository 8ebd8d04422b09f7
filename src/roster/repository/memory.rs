//! In-memory implementation of `ReviewerRepository`.
//!
//! Backs the engine in unit tests. All state is held in a `HashMap`
//! protected by a `RwLock` and lost on restart; `claim_next` holds the
//! write lock across selection and mutation, which is what makes
//! select-and-claim atomic here.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{queue_order, RepositoryError, ReviewerRepository};
use crate::roster::{AccountId, ChatId, Reviewer, ReviewerId, ReviewerStatus};

/// In-memory reviewer repository.
pub struct InMemoryRepository {
    inner: RwLock<Inner>,
}

struct Inner {
    reviewers: HashMap<(ChatId, AccountId), Reviewer>,
    next_id: i64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                reviewers: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Overwrite a reviewer's assignment timestamp. Test hook for exercising
    /// the fairness ordering without sleeping between claims.
    #[cfg(test)]
    pub(crate) async fn set_last_assigned_at(&self, id: ReviewerId, at: Option<i64>) {
        let mut inner = self.inner.write().await;
        if let Some(reviewer) = inner.reviewers.values_mut().find(|r| r.id == id) {
            reviewer.last_assigned_at = at;
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn eligible<'a>(
    reviewers: impl Iterator<Item = &'a Reviewer>,
    chat: ChatId,
    excluded_gitlab_handle: &str,
) -> Option<&'a Reviewer> {
    reviewers
        .filter(|r| {
            r.chat == chat
                && r.status == ReviewerStatus::Queued
                && r.gitlab_handle != excluded_gitlab_handle
        })
        .min_by(|a, b| queue_order(a, b))
}

#[async_trait]
impl ReviewerRepository for InMemoryRepository {
    async fn register(
        &self,
        chat: ChatId,
        account: AccountId,
        gitlab_handle: &str,
        jira_handle: &str,
    ) -> Result<Reviewer, RepositoryError> {
        let mut inner = self.inner.write().await;
        if inner.reviewers.contains_key(&(chat, account)) {
            return Err(RepositoryError::AlreadyRegistered);
        }

        let id = ReviewerId(inner.next_id);
        inner.next_id += 1;

        let reviewer = Reviewer {
            id,
            chat,
            account,
            gitlab_handle: gitlab_handle.to_string(),
            jira_handle: jira_handle.to_string(),
            status: ReviewerStatus::Queued,
            active_review: None,
            last_assigned_at: None,
        };
        inner.reviewers.insert((chat, account), reviewer.clone());
        Ok(reviewer)
    }

    async fn find(
        &self,
        chat: ChatId,
        account: AccountId,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(inner.reviewers.get(&(chat, account)).cloned())
    }

    async fn remove(&self, chat: ChatId, account: AccountId) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        Ok(inner.reviewers.remove(&(chat, account)).is_some())
    }

    async fn next_eligible(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let inner = self.inner.read().await;
        Ok(eligible(inner.reviewers.values(), chat, excluded_gitlab_handle).cloned())
    }

    async fn claim_next(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
        assignment: &str,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        // Selection and mutation happen under one write guard.
        let mut inner = self.inner.write().await;

        let Some(key) = eligible(inner.reviewers.values(), chat, excluded_gitlab_handle)
            .map(|r| (r.chat, r.account))
        else {
            return Ok(None);
        };

        let reviewer = inner
            .reviewers
            .get_mut(&key)
            .ok_or_else(|| RepositoryError::corruption("claimed reviewer vanished"))?;
        reviewer.status = ReviewerStatus::Reviewing;
        reviewer.active_review = Some(assignment.to_string());
        reviewer.last_assigned_at = Some(Utc::now().timestamp_millis());
        Ok(Some(reviewer.clone()))
    }

    async fn requeue(&self, id: ReviewerId) -> Result<bool, RepositoryError> {
        let mut inner = self.inner.write().await;
        match inner
            .reviewers
            .values_mut()
            .find(|r| r.id == id && r.status == ReviewerStatus::Reviewing)
        {
            Some(reviewer) => {
                reviewer.status = ReviewerStatus::Queued;
                reviewer.active_review = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, chat: ChatId) -> Result<Vec<Reviewer>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut reviewers: Vec<Reviewer> = inner
            .reviewers
            .values()
            .filter(|r| r.chat == chat)
            .cloned()
            .collect();
        reviewers.sort_by(queue_order);
        Ok(reviewers)
    }

    async fn list_all(&self) -> Result<Vec<Reviewer>, RepositoryError> {
        let inner = self.inner.read().await;
        let mut reviewers: Vec<Reviewer> = inner.reviewers.values().cloned().collect();
        reviewers.sort_by(|a, b| a.chat.0.cmp(&b.chat.0).then(queue_order(a, b)));
        Ok(reviewers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHAT: ChatId = ChatId(42);

    async fn register(repo: &InMemoryRepository, account: i64, handle: &str) -> Reviewer {
        repo.register(CHAT, AccountId(account), handle, handle)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn register_then_find() {
        let repo = InMemoryRepository::new();
        let created = register(&repo, 1, "alice").await;

        assert_eq!(created.status, ReviewerStatus::Queued);
        assert_eq!(created.last_assigned_at, None);

        let found = repo.find(CHAT, AccountId(1)).await.unwrap();
        assert_eq!(found, Some(created));
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let repo = InMemoryRepository::new();
        register(&repo, 1, "alice").await;

        let err = repo
            .register(CHAT, AccountId(1), "alice2", "alice2")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn same_account_can_register_in_two_chats() {
        let repo = InMemoryRepository::new();
        register(&repo, 1, "alice").await;
        repo.register(ChatId(43), AccountId(1), "alice", "alice")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let repo = InMemoryRepository::new();
        register(&repo, 1, "alice").await;

        assert!(repo.remove(CHAT, AccountId(1)).await.unwrap());
        assert!(!repo.remove(CHAT, AccountId(1)).await.unwrap());
        assert_eq!(repo.find(CHAT, AccountId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn next_eligible_prefers_never_assigned_then_oldest() {
        let repo = InMemoryRepository::new();
        let alice = register(&repo, 1, "alice").await;
        let bob = register(&repo, 2, "bob").await;
        let carol = register(&repo, 3, "carol").await;

        repo.set_last_assigned_at(bob.id, Some(100)).await;
        repo.set_last_assigned_at(carol.id, Some(200)).await;

        let next = repo.next_eligible(CHAT, "dave").await.unwrap().unwrap();
        assert_eq!(next.id, alice.id);

        repo.set_last_assigned_at(alice.id, Some(300)).await;
        let next = repo.next_eligible(CHAT, "dave").await.unwrap().unwrap();
        assert_eq!(next.id, bob.id);
    }

    #[tokio::test]
    async fn next_eligible_excludes_the_author() {
        let repo = InMemoryRepository::new();
        register(&repo, 1, "alice").await;

        assert!(repo.next_eligible(CHAT, "alice").await.unwrap().is_none());
        assert!(repo.next_eligible(CHAT, "bob").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_transitions_and_stamps_assignment_time() {
        let repo = InMemoryRepository::new();
        let alice = register(&repo, 1, "alice").await;

        let claimed = repo
            .claim_next(CHAT, "dave", "group/project!7")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(claimed.id, alice.id);
        assert_eq!(claimed.status, ReviewerStatus::Reviewing);
        assert_eq!(claimed.active_review.as_deref(), Some("group/project!7"));
        assert!(claimed.last_assigned_at.is_some());
        assert!(claimed.invariants_hold());

        // A claimed reviewer is out of the rotation until requeued.
        assert!(repo.next_eligible(CHAT, "dave").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_with_empty_queue_mutates_nothing() {
        let repo = InMemoryRepository::new();
        let alice = register(&repo, 1, "alice").await;

        let claimed = repo.claim_next(CHAT, "alice", "group/project!7").await.unwrap();
        assert!(claimed.is_none());

        let unchanged = repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(unchanged, alice);
    }

    #[tokio::test]
    async fn requeue_clears_assignment_and_preserves_fairness_stamp() {
        let repo = InMemoryRepository::new();
        register(&repo, 1, "alice").await;

        let claimed = repo
            .claim_next(CHAT, "dave", "group/project!7")
            .await
            .unwrap()
            .unwrap();
        let stamp = claimed.last_assigned_at;

        assert!(repo.requeue(claimed.id).await.unwrap());

        let after = repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(after.status, ReviewerStatus::Queued);
        assert_eq!(after.active_review, None);
        assert_eq!(after.last_assigned_at, stamp);
        assert!(after.invariants_hold());
    }

    #[tokio::test]
    async fn requeue_fails_for_queued_or_missing_reviewer() {
        let repo = InMemoryRepository::new();
        let alice = register(&repo, 1, "alice").await;

        assert!(!repo.requeue(alice.id).await.unwrap());
        assert!(!repo.requeue(ReviewerId(999)).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_claims_yield_exactly_one_winner() {
        let repo = std::sync::Arc::new(InMemoryRepository::new());
        register(&repo, 1, "alice").await;

        let (a, b) = tokio::join!(
            repo.claim_next(CHAT, "dave", "group/project!1"),
            repo.claim_next(CHAT, "dave", "group/project!2"),
        );
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .flatten()
            .count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn full_rotation_cycles_in_fairness_order() {
        let repo = InMemoryRepository::new();
        let alice = register(&repo, 1, "alice").await;
        let bob = register(&repo, 2, "bob").await;
        let carol = register(&repo, 3, "carol").await;
        repo.set_last_assigned_at(bob.id, Some(100)).await;
        repo.set_last_assigned_at(carol.id, Some(200)).await;

        let mut order = Vec::new();
        for mr in ["g/p!1", "g/p!2", "g/p!3"] {
            let claimed = repo.claim_next(CHAT, "dave", mr).await.unwrap().unwrap();
            order.push(claimed.id);
            assert!(repo.requeue(claimed.id).await.unwrap());
        }
        assert_eq!(order, vec![alice.id, bob.id, carol.id]);

        // Second lap follows the stamps written by the first.
        let again = repo.claim_next(CHAT, "dave", "g/p!4").await.unwrap().unwrap();
        assert_eq!(again.id, alice.id);
    }

    // =========================================================================
    // Property-based tests
    // =========================================================================

    /// A roster entry for generation: handle index and optional backdated
    /// assignment stamp.
    fn arb_roster() -> impl Strategy<Value = Vec<(u8, Option<i64>)>> {
        proptest::collection::vec((0u8..6, proptest::option::of(0i64..1_000)), 0..12)
    }

    fn handle(index: u8) -> String {
        format!("dev{}", index)
    }

    proptest! {
        /// Property: `claim_next` returns exactly the reviewer that
        /// `queue_order` ranks first among eligible candidates, or nothing
        /// when no candidate is eligible.
        #[test]
        fn claim_agrees_with_explicit_comparator(roster in arb_roster(), excluded in 0u8..6) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let repo = InMemoryRepository::new();
                let mut registered = Vec::new();
                for (account, (handle_index, stamp)) in roster.iter().enumerate() {
                    let reviewer = repo
                        .register(CHAT, AccountId(account as i64), &handle(*handle_index), "jira")
                        .await
                        .unwrap();
                    repo.set_last_assigned_at(reviewer.id, *stamp).await;
                    registered.push(repo.find(CHAT, AccountId(account as i64)).await.unwrap().unwrap());
                }

                let expected = registered
                    .iter()
                    .filter(|r| r.gitlab_handle != handle(excluded))
                    .min_by(|a, b| queue_order(a, b))
                    .map(|r| r.id);

                let claimed = repo
                    .claim_next(CHAT, &handle(excluded), "g/p!1")
                    .await
                    .unwrap();

                prop_assert_eq!(claimed.map(|r| r.id), expected);
                Ok(())
            })?;
        }

        /// Property: after any interleaving of claims and requeues, every
        /// reviewer still satisfies the status/assignment invariant and at
        /// most one claim succeeds per eligible reviewer.
        #[test]
        fn claims_and_requeues_preserve_invariants(
            roster in arb_roster(),
            ops in proptest::collection::vec(any::<bool>(), 0..20),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let repo = InMemoryRepository::new();
                for (account, (handle_index, stamp)) in roster.iter().enumerate() {
                    let reviewer = repo
                        .register(CHAT, AccountId(account as i64), &handle(*handle_index), "jira")
                        .await
                        .unwrap();
                    repo.set_last_assigned_at(reviewer.id, *stamp).await;
                }

                let mut held: Vec<ReviewerId> = Vec::new();
                for claim in ops {
                    if claim {
                        if let Some(r) = repo.claim_next(CHAT, "nobody", "g/p!1").await.unwrap() {
                            held.push(r.id);
                        }
                    } else if let Some(id) = held.pop() {
                        prop_assert!(repo.requeue(id).await.unwrap());
                    }
                }

                for reviewer in repo.list(CHAT).await.unwrap() {
                    prop_assert!(reviewer.invariants_hold());
                    let is_held = held.contains(&reviewer.id);
                    prop_assert_eq!(reviewer.status == ReviewerStatus::Reviewing, is_held);
                }
                Ok(())
            })?;
        }
    }
}
