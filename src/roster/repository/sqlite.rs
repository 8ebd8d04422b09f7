//! SQLite implementation of `ReviewerRepository`.
//!
//! This provides persistent storage that survives service restarts.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and
//! add a migration in `run_migrations()`. Migrations run sequentially from
//! the current version to the target version.
//!
//! # Claim atomicity
//!
//! `claim_next` is a single conditional `UPDATE ... WHERE id = (SELECT ...)
//! RETURNING ...` statement executed under the connection mutex, so
//! selection and claim cannot interleave with another caller's pair. The
//! ordering subquery spells out NULL handling explicitly
//! (`last_assigned_at IS NOT NULL` sorts never-assigned reviewers first)
//! instead of leaning on the engine's NULL collation.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{RepositoryError, ReviewerRepository};
use crate::roster::{AccountId, ChatId, Reviewer, ReviewerId, ReviewerStatus};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const REVIEWER_COLUMNS: &str =
    "id, chat_id, account_id, gitlab_handle, jira_handle, status, active_review, last_assigned_at";

/// SQLite-backed reviewer repository.
///
/// Stores the roster in a SQLite database for persistence across restarts.
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteRepository {
    /// Database connection. Exposed as `pub(crate)` for test access to
    /// backdate assignment timestamps when testing the fairness ordering.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

/// Raw row shape before status validation.
type ReviewerRow = (i64, i64, i64, String, String, String, Option<String>, Option<i64>);

fn row_to_reviewer(row: ReviewerRow) -> Result<Reviewer, RepositoryError> {
    let (id, chat_id, account_id, gitlab_handle, jira_handle, status, active_review, last_assigned_at) =
        row;
    let status = ReviewerStatus::parse(&status)
        .ok_or_else(|| RepositoryError::corruption(format!("reviewer status '{}'", status)))?;
    Ok(Reviewer {
        id: ReviewerId(id),
        chat: ChatId(chat_id),
        account: AccountId(account_id),
        gitlab_handle,
        jira_handle,
        status,
        active_review,
        last_assigned_at,
    })
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReviewerRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

impl SqliteRepository {
    /// Create a new SQLite repository at the given path.
    ///
    /// Creates the database file and schema if they don't exist, and runs
    /// any pending migrations if the database has an older schema.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for better concurrency and crash safety
    /// - `synchronous = FULL` for maximum durability
    /// - `busy_timeout = 5000ms` to handle concurrent access gracefully
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();

        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        RepositoryError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| RepositoryError::storage("open database", e.to_string()))?;

        // Verify WAL mode was actually enabled - SQLite can silently keep
        // DELETE mode on filesystems that don't support shared memory.
        // In-memory databases report "memory", which is fine.
        let is_in_memory = path_str == ":memory:";
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| RepositoryError::storage("set journal_mode", e.to_string()))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(RepositoryError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the roster database \
                     requires WAL mode for its durability guarantees",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| RepositoryError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| RepositoryError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| RepositoryError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), RepositoryError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(RepositoryError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        // Migration from version 0 (fresh database) to version 1
        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS reviewers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chat_id INTEGER NOT NULL,
                    account_id INTEGER NOT NULL,
                    gitlab_handle TEXT NOT NULL,
                    jira_handle TEXT NOT NULL,
                    status TEXT NOT NULL,
                    active_review TEXT,
                    last_assigned_at INTEGER,
                    UNIQUE (chat_id, account_id)
                );

                CREATE INDEX IF NOT EXISTS idx_rotation
                    ON reviewers(chat_id, status);
                "#,
            )
            .map_err(|e| RepositoryError::storage("migration v1", e.to_string()))?;
        }

        // Future migrations would go here:
        // if from_version < 2 { ... }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| RepositoryError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Create a new in-memory SQLite repository (for testing).
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, RepositoryError> {
        Self::new(":memory:")
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl ReviewerRepository for SqliteRepository {
    async fn register(
        &self,
        chat: ChatId,
        account: AccountId,
        gitlab_handle: &str,
        jira_handle: &str,
    ) -> Result<Reviewer, RepositoryError> {
        let conn = self.conn.clone();
        let gitlab_handle = gitlab_handle.to_string();
        let jira_handle = jira_handle.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let row = conn
                .query_row(
                    &format!(
                        "INSERT INTO reviewers
                             (chat_id, account_id, gitlab_handle, jira_handle, status)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         RETURNING {}",
                        REVIEWER_COLUMNS
                    ),
                    params![
                        chat.0,
                        account.0,
                        gitlab_handle,
                        jira_handle,
                        ReviewerStatus::Queued.as_str()
                    ],
                    read_row,
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        RepositoryError::AlreadyRegistered
                    } else {
                        RepositoryError::storage("register", e.to_string())
                    }
                })?;

            row_to_reviewer(row)
        })
        .await
        .map_err(|e| RepositoryError::storage("register", e.to_string()))?
    }

    async fn find(
        &self,
        chat: ChatId,
        account: AccountId,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM reviewers WHERE chat_id = ?1 AND account_id = ?2",
                        REVIEWER_COLUMNS
                    ),
                    params![chat.0, account.0],
                    read_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("find", e.to_string()))?;

            row.map(row_to_reviewer).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("find", e.to_string()))?
    }

    async fn remove(&self, chat: ChatId, account: AccountId) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let deleted = conn
                .execute(
                    "DELETE FROM reviewers WHERE chat_id = ?1 AND account_id = ?2",
                    params![chat.0, account.0],
                )
                .map_err(|e| RepositoryError::storage("remove", e.to_string()))?;

            Ok(deleted > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("remove", e.to_string()))?
    }

    async fn next_eligible(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let conn = self.conn.clone();
        let excluded = excluded_gitlab_handle.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let row = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM reviewers
                         WHERE chat_id = ?1 AND status = ?2 AND gitlab_handle <> ?3
                         ORDER BY (last_assigned_at IS NOT NULL), last_assigned_at, id
                         LIMIT 1",
                        REVIEWER_COLUMNS
                    ),
                    params![chat.0, ReviewerStatus::Queued.as_str(), excluded],
                    read_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("next_eligible", e.to_string()))?;

            row.map(row_to_reviewer).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("next_eligible", e.to_string()))?
    }

    async fn claim_next(
        &self,
        chat: ChatId,
        excluded_gitlab_handle: &str,
        assignment: &str,
    ) -> Result<Option<Reviewer>, RepositoryError> {
        let conn = self.conn.clone();
        let excluded = excluded_gitlab_handle.to_string();
        let assignment = assignment.to_string();
        let now = Utc::now().timestamp_millis();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let row = conn
                .query_row(
                    &format!(
                        "UPDATE reviewers
                         SET status = ?1, active_review = ?2, last_assigned_at = ?3
                         WHERE id = (
                             SELECT id FROM reviewers
                             WHERE chat_id = ?4 AND status = ?5 AND gitlab_handle <> ?6
                             ORDER BY (last_assigned_at IS NOT NULL), last_assigned_at, id
                             LIMIT 1
                         )
                         RETURNING {}",
                        REVIEWER_COLUMNS
                    ),
                    params![
                        ReviewerStatus::Reviewing.as_str(),
                        assignment,
                        now,
                        chat.0,
                        ReviewerStatus::Queued.as_str(),
                        excluded
                    ],
                    read_row,
                )
                .optional()
                .map_err(|e| RepositoryError::storage("claim_next", e.to_string()))?;

            row.map(row_to_reviewer).transpose()
        })
        .await
        .map_err(|e| RepositoryError::storage("claim_next", e.to_string()))?
    }

    async fn requeue(&self, id: ReviewerId) -> Result<bool, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            // Conditional on the row still being `reviewing`; a concurrent
            // completion loses this race instead of double-clearing.
            let updated = conn
                .execute(
                    "UPDATE reviewers
                     SET status = ?1, active_review = NULL
                     WHERE id = ?2 AND status = ?3",
                    params![
                        ReviewerStatus::Queued.as_str(),
                        id.0,
                        ReviewerStatus::Reviewing.as_str()
                    ],
                )
                .map_err(|e| RepositoryError::storage("requeue", e.to_string()))?;

            Ok(updated > 0)
        })
        .await
        .map_err(|e| RepositoryError::storage("requeue", e.to_string()))?
    }

    async fn list(&self, chat: ChatId) -> Result<Vec<Reviewer>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM reviewers
                     WHERE chat_id = ?1
                     ORDER BY (last_assigned_at IS NOT NULL), last_assigned_at, id",
                    REVIEWER_COLUMNS
                ))
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;

            let rows = stmt
                .query_map(params![chat.0], read_row)
                .map_err(|e| RepositoryError::storage("list", e.to_string()))?;

            let mut reviewers = Vec::new();
            for row in rows {
                let row = row.map_err(|e| RepositoryError::storage("list", e.to_string()))?;
                reviewers.push(row_to_reviewer(row)?);
            }
            Ok(reviewers)
        })
        .await
        .map_err(|e| RepositoryError::storage("list", e.to_string()))?
    }

    async fn list_all(&self) -> Result<Vec<Reviewer>, RepositoryError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM reviewers
                     ORDER BY chat_id, (last_assigned_at IS NOT NULL), last_assigned_at, id",
                    REVIEWER_COLUMNS
                ))
                .map_err(|e| RepositoryError::storage("list_all", e.to_string()))?;

            let rows = stmt
                .query_map([], read_row)
                .map_err(|e| RepositoryError::storage("list_all", e.to_string()))?;

            let mut reviewers = Vec::new();
            for row in rows {
                let row = row.map_err(|e| RepositoryError::storage("list_all", e.to_string()))?;
                reviewers.push(row_to_reviewer(row)?);
            }
            Ok(reviewers)
        })
        .await
        .map_err(|e| RepositoryError::storage("list_all", e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: ChatId = ChatId(42);

    async fn register(repo: &SqliteRepository, account: i64, handle: &str) -> Reviewer {
        repo.register(CHAT, AccountId(account), handle, handle)
            .await
            .unwrap()
    }

    /// Backdate a reviewer's assignment stamp directly in the database.
    fn backdate(repo: &SqliteRepository, id: ReviewerId, at: Option<i64>) {
        let conn = repo.conn.lock().unwrap();
        conn.execute(
            "UPDATE reviewers SET last_assigned_at = ?1 WHERE id = ?2",
            params![at, id.0],
        )
        .unwrap();
    }

    #[tokio::test]
    async fn register_find_remove_round_trip() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let created = register(&repo, 1, "alice").await;

        assert_eq!(created.status, ReviewerStatus::Queued);
        assert_eq!(created.active_review, None);
        assert_eq!(created.last_assigned_at, None);

        let found = repo.find(CHAT, AccountId(1)).await.unwrap();
        assert_eq!(found, Some(created));

        assert!(repo.remove(CHAT, AccountId(1)).await.unwrap());
        assert!(!repo.remove(CHAT, AccountId(1)).await.unwrap());
        assert_eq!(repo.find(CHAT, AccountId(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_registration_maps_to_already_registered() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        register(&repo, 1, "alice").await;

        let err = repo
            .register(CHAT, AccountId(1), "other", "other")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyRegistered));
    }

    #[tokio::test]
    async fn claim_follows_explicit_null_first_ordering() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let alice = register(&repo, 1, "alice").await;
        let bob = register(&repo, 2, "bob").await;
        let carol = register(&repo, 3, "carol").await;
        backdate(&repo, bob.id, Some(100));
        backdate(&repo, carol.id, Some(200));

        let first = repo.claim_next(CHAT, "dave", "g/p!1").await.unwrap().unwrap();
        assert_eq!(first.id, alice.id);
        assert_eq!(first.status, ReviewerStatus::Reviewing);
        assert_eq!(first.active_review.as_deref(), Some("g/p!1"));

        let second = repo.claim_next(CHAT, "dave", "g/p!2").await.unwrap().unwrap();
        assert_eq!(second.id, bob.id);

        let third = repo.claim_next(CHAT, "dave", "g/p!3").await.unwrap().unwrap();
        assert_eq!(third.id, carol.id);

        assert!(repo.claim_next(CHAT, "dave", "g/p!4").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_excludes_author_and_other_chats() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        register(&repo, 1, "alice").await;
        repo.register(ChatId(7), AccountId(2), "bob", "bob")
            .await
            .unwrap();

        // The only reviewer in this chat is the author.
        assert!(repo.claim_next(CHAT, "alice", "g/p!1").await.unwrap().is_none());

        // A reviewer in another chat is never considered.
        let claimed = repo.claim_next(CHAT, "dave", "g/p!1").await.unwrap().unwrap();
        assert_eq!(claimed.gitlab_handle, "alice");
    }

    #[tokio::test]
    async fn requeue_is_conditional_on_reviewing() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let alice = register(&repo, 1, "alice").await;

        assert!(!repo.requeue(alice.id).await.unwrap());

        let claimed = repo.claim_next(CHAT, "dave", "g/p!1").await.unwrap().unwrap();
        let stamp = claimed.last_assigned_at;

        assert!(repo.requeue(claimed.id).await.unwrap());
        assert!(!repo.requeue(claimed.id).await.unwrap());

        let after = repo.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(after.status, ReviewerStatus::Queued);
        assert_eq!(after.active_review, None);
        assert_eq!(after.last_assigned_at, stamp);
    }

    #[tokio::test]
    async fn list_orders_by_rotation_and_scopes_by_chat() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let alice = register(&repo, 1, "alice").await;
        let bob = register(&repo, 2, "bob").await;
        repo.register(ChatId(7), AccountId(3), "carol", "carol")
            .await
            .unwrap();
        backdate(&repo, alice.id, Some(500));

        let listed = repo.list(CHAT).await.unwrap();
        assert_eq!(
            listed.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![bob.id, alice.id]
        );

        let all = repo.list_all().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn roster_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("rotabot.db");

        {
            let repo = SqliteRepository::new(&db_path).unwrap();
            register(&repo, 1, "alice").await;
            repo.claim_next(CHAT, "dave", "g/p!9").await.unwrap().unwrap();
        }

        let reopened = SqliteRepository::new(&db_path).unwrap();
        let alice = reopened.find(CHAT, AccountId(1)).await.unwrap().unwrap();
        assert_eq!(alice.status, ReviewerStatus::Reviewing);
        assert_eq!(alice.active_review.as_deref(), Some("g/p!9"));
        assert!(alice.last_assigned_at.is_some());
    }

    #[tokio::test]
    async fn corrupt_status_is_reported_not_swallowed() {
        let repo = SqliteRepository::new_in_memory().unwrap();
        let alice = register(&repo, 1, "alice").await;
        {
            let conn = repo.conn.lock().unwrap();
            conn.execute(
                "UPDATE reviewers SET status = 'idle' WHERE id = ?1",
                params![alice.id.0],
            )
            .unwrap();
        }

        let err = repo.find(CHAT, AccountId(1)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Corruption { .. }));
    }
}
