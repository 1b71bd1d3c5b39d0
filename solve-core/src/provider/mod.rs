//! Provider abstraction (C1): uniform operations over the code-hosting
//! platform. The engine never reaches beneath this trait for platform
//! specifics except to build the closing-keyword reference string, which
//! depends only on whether the head and base repositories match.

pub mod github;
pub mod sourcecraft;

use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Clean,
    Behind,
    Blocked,
    Dirty,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub state: ReviewState,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    CrossReferenced { pr_num: u64, merged: bool },
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub branch: String,
    pub is_draft: bool,
    pub state: PrState,
    pub merge_state: MergeState,
    pub head_owner: String,
    pub base_owner: String,
    pub base_repo: String,
    pub body: String,
}

impl PullRequest {
    /// True when head and base share the same owner — the condition that
    /// decides whether the linking reference uses `#N` or `owner/repo#N`.
    pub fn is_same_repo(&self) -> bool {
        self.head_owner == self.base_owner
    }
}

#[derive(Debug, Clone)]
pub struct CreatePrRequest<'a> {
    pub owner: &'a str,
    pub repo: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentTarget {
    Issue,
    Pr,
}

/// Capability set implemented by each concrete platform adapter.
///
/// Two concrete variants must exist (GitHub, Sourcecraft); selection is by
/// URL hostname (see `crate::url::parse_url`), never by feature-detecting
/// the platform from within a single adapter.
pub trait ProviderGateway {
    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue>;
    fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest>;
    fn create_pull_request(&self, req: CreatePrRequest<'_>) -> Result<PullRequest>;
    fn add_comment(
        &self,
        owner: &str,
        repo: &str,
        target: CommentTarget,
        number: u64,
        body: &str,
    ) -> Result<()>;
    fn list_pr_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Comment>>;
    fn list_pr_reviews(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Review>>;
    fn get_pr_timeline(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<TimelineEvent>>;
    fn fork_repository(&self, owner: &str, repo: &str) -> Result<String>;
    fn get_clone_url(&self, owner: &str, repo: &str, ssh: bool) -> Result<String>;
    fn detect_repository_visibility(&self, owner: &str, repo: &str) -> Result<bool>;
    fn list_issues(&self, owner: &str, repo: &str, label: Option<&str>, limit: u32) -> Result<Vec<u64>>;
    fn check_authentication(&self) -> Result<()>;
    fn check_write_permission(&self, owner: &str, repo: &str, use_fork: bool) -> Result<bool>;
    fn current_identity(&self) -> Result<String>;
    fn set_pr_draft(&self, owner: &str, repo: &str, number: u64, draft: bool) -> Result<()>;
    fn update_pr_body(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()>;
    fn find_pr_for_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PullRequest>>;
    fn upload_paste(&self, content: &str, filename: &str) -> Result<String>;
}
