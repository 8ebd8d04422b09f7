//! Jira collaborator: advisory issue sync when a review is assigned.
//!
//! The issue key is extracted from the merge request title by a fixed rule:
//! an uppercase-letters-then-hyphen-then-digits prefix (`ABC-123: fix ...`).
//! A title without such a prefix simply skips tracker sync; a failed sync is
//! reported but never unwinds the assignment.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use crate::collaborator::{Collaborator, ExternalCallError};

/// Upper bound on any single Jira API call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Extract the issue key prefix from a merge request title.
///
/// The key must sit at the very start of the title: one or more ASCII
/// uppercase letters, a hyphen, one or more digits. Returns `None` when the
/// title carries no key.
pub fn extract_issue_key(title: &str) -> Option<&str> {
    let bytes = title.as_bytes();

    let letters = bytes.iter().take_while(|b| b.is_ascii_uppercase()).count();
    if letters == 0 || bytes.get(letters) != Some(&b'-') {
        return None;
    }

    let digits = bytes[letters + 1..]
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }

    Some(&title[..letters + 1 + digits])
}

/// Narrow interface to the issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Assign the issue to the reviewer and move it to the "Review" status.
    async fn advance_to_review(
        &self,
        issue_key: &str,
        reviewer_handle: &str,
    ) -> Result<(), ExternalCallError>;
}

#[derive(Debug, Deserialize)]
struct TransitionsResponse {
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    name: String,
}

/// Jira REST API client (basic auth).
#[derive(Clone)]
pub struct JiraClient {
    client: Client,
    base_url: String,
    user: String,
    token: String,
}

impl JiraClient {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to construct Jira HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user: user.into(),
            token: token.into(),
        })
    }

    fn error(operation: &'static str, detail: impl Into<String>) -> ExternalCallError {
        ExternalCallError::new(Collaborator::Jira, operation, detail)
    }

    async fn assign_issue(
        &self,
        issue_key: &str,
        reviewer_handle: &str,
    ) -> Result<(), ExternalCallError> {
        const OPERATION: &str = "assign issue";
        let url = format!("{}/rest/api/2/issue/{}/assignee", self.base_url, issue_key);

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.user, Some(&self.token))
            .json(&serde_json::json!({ "name": reviewer_handle }))
            .send()
            .await
            .map_err(|e| Self::error(OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(OPERATION, format!("{} - {}", status, body)));
        }
        Ok(())
    }

    async fn transition_to_review(&self, issue_key: &str) -> Result<(), ExternalCallError> {
        const OPERATION: &str = "transition issue";
        let url = format!(
            "{}/rest/api/2/issue/{}/transitions",
            self.base_url, issue_key
        );

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.token))
            .send()
            .await
            .map_err(|e| Self::error(OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(OPERATION, format!("{} - {}", status, body)));
        }

        let transitions: TransitionsResponse = response
            .json()
            .await
            .map_err(|e| Self::error(OPERATION, format!("invalid response body: {}", e)))?;

        let review = transitions
            .transitions
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case("review"))
            .ok_or_else(|| {
                Self::error(
                    OPERATION,
                    format!("issue {} has no 'Review' transition", issue_key),
                )
            })?;

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.token))
            .json(&serde_json::json!({ "transition": { "id": review.id } }))
            .send()
            .await
            .map_err(|e| Self::error(OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(OPERATION, format!("{} - {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn advance_to_review(
        &self,
        issue_key: &str,
        reviewer_handle: &str,
    ) -> Result<(), ExternalCallError> {
        self.assign_issue(issue_key, reviewer_handle).await?;
        self.transition_to_review(issue_key).await?;
        info!(issue = %issue_key, reviewer = %reviewer_handle, "issue moved to review");
        Ok(())
    }
}
