//! GitLab collaborator: merge request lookup and reviewer assignment.
//!
//! The controller talks to the code host through the narrow [`CodeHost`]
//! trait; `GitLabClient` is the production implementation over the GitLab
//! REST API. Merge request locators are validated into a [`MergeRequestRef`]
//! before any network call is made.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::info;

use crate::collaborator::{Collaborator, ExternalCallError};

/// Upper bound on any single GitLab API call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A validated merge request locator: project path plus the MR's iid within
/// that project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestRef {
    pub project_path: String,
    pub iid: u64,
}

impl fmt::Display for MergeRequestRef {
    /// Canonical GitLab reference notation, e.g. `group/project!123`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.project_path, self.iid)
    }
}

/// Why a merge request link could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeRequestLinkError {
    /// Not an http(s) URL.
    NotAUrl,
    /// The URL has no `/-/merge_requests/` segment or no project path.
    NotAMergeRequestPath,
    /// The part after `/-/merge_requests/` is not a numeric iid.
    InvalidIid,
}

impl fmt::Display for MergeRequestLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAUrl => write!(f, "not an http(s) link"),
            Self::NotAMergeRequestPath => {
                write!(f, "link does not point at a merge request")
            }
            Self::InvalidIid => write!(f, "merge request id in the link is not a number"),
        }
    }
}

impl std::error::Error for MergeRequestLinkError {}

impl MergeRequestRef {
    /// Parse a merge request web URL, e.g.
    /// `https://gitlab.example.com/group/project/-/merge_requests/123`.
    ///
    /// Trailing sub-pages (`/diffs`), query strings and fragments are
    /// tolerated; anything else after the iid is rejected.
    pub fn parse(link: &str) -> Result<Self, MergeRequestLinkError> {
        let rest = link
            .strip_prefix("https://")
            .or_else(|| link.strip_prefix("http://"))
            .ok_or(MergeRequestLinkError::NotAUrl)?;

        let (_host, path) = rest
            .split_once('/')
            .ok_or(MergeRequestLinkError::NotAMergeRequestPath)?;

        let (project, tail) = path
            .split_once("/-/merge_requests/")
            .ok_or(MergeRequestLinkError::NotAMergeRequestPath)?;

        let project = project.trim_matches('/');
        if project.is_empty() {
            return Err(MergeRequestLinkError::NotAMergeRequestPath);
        }

        let digits_end = tail
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        if digits_end == 0 {
            return Err(MergeRequestLinkError::InvalidIid);
        }
        match tail[digits_end..].chars().next() {
            None | Some('/') | Some('?') | Some('#') => {}
            Some(_) => return Err(MergeRequestLinkError::InvalidIid),
        }

        let iid = tail[..digits_end]
            .parse::<u64>()
            .map_err(|_| MergeRequestLinkError::InvalidIid)?;

        Ok(Self {
            project_path: project.to_string(),
            iid,
        })
    }
}

/// What the controller needs to know about a merge request before assigning
/// a reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestInfo {
    pub title: String,
    pub author_handle: String,
}

/// Narrow interface to the source-control host.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Fetch the merge request's title and author handle.
    async fn resolve_merge_request(
        &self,
        mr: &MergeRequestRef,
    ) -> Result<MergeRequestInfo, ExternalCallError>;

    /// Record `reviewer_handle` as the assignee of the merge request.
    async fn record_assignment(
        &self,
        mr: &MergeRequestRef,
        reviewer_handle: &str,
    ) -> Result<(), ExternalCallError>;
}

#[derive(Debug, Deserialize)]
struct MergeRequestResponse {
    title: String,
    author: GitLabUser,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct UserSummary {
    id: u64,
}

/// GitLab REST API client.
#[derive(Clone)]
pub struct GitLabClient {
    client: Client,
    base_url: String,
    token: String,
}

impl GitLabClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("Failed to construct GitLab HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// URL-encode a project path for the `/projects/:id` route (slashes
    /// become `%2F`; project paths contain no other reserved characters).
    fn encoded_project(mr: &MergeRequestRef) -> String {
        mr.project_path.replace('/', "%2F")
    }

    fn error(operation: &'static str, detail: impl Into<String>) -> ExternalCallError {
        ExternalCallError::new(Collaborator::GitLab, operation, detail)
    }

    async fn fetch_merge_request(
        &self,
        mr: &MergeRequestRef,
        operation: &'static str,
    ) -> Result<MergeRequestResponse, ExternalCallError> {
        let url = format!(
            "{}/api/v4/projects/{}/merge_requests/{}",
            self.base_url,
            Self::encoded_project(mr),
            mr.iid
        );

        let response = self
            .client
            .get(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| Self::error(operation, e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Self::error(operation, format!("merge request {} not found", mr)));
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(operation, format!("{} - {}", status, body)));
        }

        response
            .json::<MergeRequestResponse>()
            .await
            .map_err(|e| Self::error(operation, format!("invalid response body: {}", e)))
    }

    async fn lookup_user_id(&self, username: &str) -> Result<u64, ExternalCallError> {
        const OPERATION: &str = "look up user";
        let url = format!("{}/api/v4/users", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("username", username)])
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| Self::error(OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(OPERATION, format!("{} - {}", status, body)));
        }

        let users: Vec<UserSummary> = response
            .json()
            .await
            .map_err(|e| Self::error(OPERATION, format!("invalid response body: {}", e)))?;

        users
            .first()
            .map(|u| u.id)
            .ok_or_else(|| Self::error(OPERATION, format!("no GitLab user named '{}'", username)))
    }
}

#[async_trait]
impl CodeHost for GitLabClient {
    async fn resolve_merge_request(
        &self,
        mr: &MergeRequestRef,
    ) -> Result<MergeRequestInfo, ExternalCallError> {
        let response = self.fetch_merge_request(mr, "fetch merge request").await?;
        Ok(MergeRequestInfo {
            title: response.title,
            author_handle: response.author.username,
        })
    }

    async fn record_assignment(
        &self,
        mr: &MergeRequestRef,
        reviewer_handle: &str,
    ) -> Result<(), ExternalCallError> {
        const OPERATION: &str = "assign merge request";

        let assignee_id = self.lookup_user_id(reviewer_handle).await?;

        let url = format!(
            "{}/api/v4/projects/{}/merge_requests/{}",
            self.base_url,
            Self::encoded_project(mr),
            mr.iid
        );

        let response = self
            .client
            .put(&url)
            .header("PRIVATE-TOKEN", &self.token)
            .json(&serde_json::json!({ "assignee_id": assignee_id }))
            .send()
            .await
            .map_err(|e| Self::error(OPERATION, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::error(OPERATION, format!("{} - {}", status, body)));
        }

        info!(merge_request = %mr, reviewer = %reviewer_handle, "assignment recorded on GitLab");
        Ok(())
    }
}
