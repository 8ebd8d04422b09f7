//! Shared error type for the external collaborators.
//!
//! Every outbound call (GitLab, Jira, Telegram) resolves to either success
//! or an `ExternalCallError` naming the collaborator and the operation that
//! failed. Timeouts surface here like any other transport failure; the core
//! never retries.

use std::fmt;

/// The external system a failed call was addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collaborator {
    GitLab,
    Jira,
    Telegram,
}

impl fmt::Display for Collaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitLab => write!(f, "GitLab"),
            Self::Jira => write!(f, "Jira"),
            Self::Telegram => write!(f, "Telegram"),
        }
    }
}

/// A failed call to an external collaborator.
#[derive(Debug)]
pub struct ExternalCallError {
    pub collaborator: Collaborator,
    pub operation: &'static str,
    pub detail: String,
}

impl ExternalCallError {
    pub fn new(
        collaborator: Collaborator,
        operation: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            collaborator,
            operation,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ExternalCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} call failed ({}): {}",
            self.collaborator, self.operation, self.detail
        )
    }
}

impl std::error::Error for ExternalCallError {}
