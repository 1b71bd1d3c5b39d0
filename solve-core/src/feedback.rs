//! Feedback detector (C6): reference-timestamp policy, new-comment
//! counting, uncommitted-change detection, and work-session bracketing.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::process::Command;

use crate::provider::{Comment, CommentTarget, Issue, MergeState, ProviderGateway, PullRequest};

pub const WORK_SESSION_STARTED_MARKER: &str = "🤖 AI Work Session Started";
pub const WORK_SESSION_COMPLETED_MARKER: &str = "🤖 AI Work Session Completed";

#[derive(Debug, Clone)]
pub struct FeedbackSnapshot {
    pub new_pr_comments: Vec<Comment>,
    pub new_issue_comments: Vec<Comment>,
    pub merge_state: MergeState,
    pub uncommitted_changes: Vec<String>,
    pub work_start_time: DateTime<Utc>,
}

impl FeedbackSnapshot {
    /// An empty snapshot — no new comments and a clean tree — terminates
    /// the watch loop when combined with a merged PR.
    pub fn is_empty(&self) -> bool {
        self.new_pr_comments.is_empty()
            && self.new_issue_comments.is_empty()
            && self.uncommitted_changes.is_empty()
    }
}

/// The reference timestamp never uses local wall-clock time — only
/// server-side timestamps the platform itself reports — because clock skew
/// between the engine's host and the platform would cause silent drops or
/// duplicate feedback.
pub fn reference_timestamp(issue: &Issue, pr: &PullRequest, pr_comments: &[Comment]) -> DateTime<Utc> {
    let mut latest = issue.updated_at;
    if let Some(last_issue_comment) = issue.comments.iter().map(|c| c.created_at).max() {
        latest = latest.max(last_issue_comment);
    }
    if let Some(last_pr_comment) = pr_comments.iter().map(|c| c.created_at).max() {
        latest = latest.max(last_pr_comment);
    }
    let _ = pr;
    latest
}

/// `git status --porcelain` on the workspace; one entry per changed path.
pub fn uncommitted_changes(workspace_dir: &Path) -> Result<Vec<String>> {
    let output = Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(workspace_dir)
        .output()
        .context("spawning git status --porcelain")?;
    Ok(output
        .status
        .success()
        .then(|| String::from_utf8_lossy(&output.stdout).into_owned())
        .unwrap_or_default()
        .lines()
        .map(|l| l.to_string())
        .collect())
}

/// Capture a full snapshot as of `reference`. Comments posted by the engine
/// itself (work-session bracket markers) are excluded from the counts so
/// they never appear as "new feedback" on the following iteration.
pub fn capture(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    issue: &Issue,
    pr: &PullRequest,
    reference: DateTime<Utc>,
    workspace_dir: &Path,
) -> Result<FeedbackSnapshot> {
    let pr_comments: Vec<Comment> = gateway
        .list_pr_comments(owner, repo, pr.number, Some(reference))?
        .into_iter()
        .filter(|c| !is_engine_marker(&c.body))
        .collect();

    let issue_comments: Vec<Comment> = issue
        .comments
        .iter()
        .filter(|c| c.created_at > reference && !is_engine_marker(&c.body))
        .cloned()
        .collect();

    Ok(FeedbackSnapshot {
        new_pr_comments: pr_comments,
        new_issue_comments: issue_comments,
        merge_state: pr.merge_state,
        uncommitted_changes: uncommitted_changes(workspace_dir)?,
        work_start_time: reference,
    })
}

fn is_engine_marker(body: &str) -> bool {
    body.contains(WORK_SESSION_STARTED_MARKER) || body.contains(WORK_SESSION_COMPLETED_MARKER)
}

/// Post the "work session started" marker and flip the PR to draft. Called
/// immediately before the reference timestamp is captured so the engine's
/// own comment never counts as feedback on the next iteration.
pub fn post_work_session_started(gateway: &dyn ProviderGateway, owner: &str, repo: &str, pr_number: u64, now: DateTime<Utc>) -> Result<()> {
    let body = format!("{WORK_SESSION_STARTED_MARKER} ({now})");
    gateway.add_comment(owner, repo, CommentTarget::Pr, pr_number, &body)?;
    gateway.set_pr_draft(owner, repo, pr_number, true)?;
    Ok(())
}

/// Post the "work session completed" marker and flip the PR back to ready.
pub fn post_work_session_completed(gateway: &dyn ProviderGateway, owner: &str, repo: &str, pr_number: u64, now: DateTime<Utc>) -> Result<()> {
    let body = format!("{WORK_SESSION_COMPLETED_MARKER} ({now})");
    gateway.add_comment(owner, repo, CommentTarget::Pr, pr_number, &body)?;
    gateway.set_pr_draft(owner, repo, pr_number, false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn comment(body: &str, created: &str) -> Comment {
        Comment {
            id: 1,
            body: body.to_string(),
            created_at: ts(created),
            author: "someone".to_string(),
        }
    }

    #[test]
    fn reference_timestamp_is_the_max_of_all_server_signals() {
        let issue = Issue {
            number: 1,
            url: String::new(),
            title: String::new(),
            body: String::new(),
            updated_at: ts("2024-01-01T00:00:00Z"),
            comments: vec![comment("hi", "2024-01-02T00:00:00Z")],
        };
        let pr = PullRequest {
            number: 1,
            url: String::new(),
            branch: String::new(),
            is_draft: true,
            state: crate::provider::PrState::Open,
            merge_state: MergeState::Clean,
            head_owner: "a".into(),
            base_owner: "a".into(),
            base_repo: "b".into(),
            body: String::new(),
        };
        let pr_comments = vec![comment("feedback", "2024-01-03T00:00:00Z")];
        let reference = reference_timestamp(&issue, &pr, &pr_comments);
        assert_eq!(reference, ts("2024-01-03T00:00:00Z"));
    }

    #[test]
    fn empty_snapshot_has_no_feedback() {
        let snap = FeedbackSnapshot {
            new_pr_comments: vec![],
            new_issue_comments: vec![],
            merge_state: MergeState::Clean,
            uncommitted_changes: vec![],
            work_start_time: Utc.timestamp_opt(0, 0).unwrap(),
        };
        assert!(snap.is_empty());
    }

    #[test]
    fn engine_markers_are_excluded_from_feedback() {
        assert!(is_engine_marker(&format!("{WORK_SESSION_STARTED_MARKER} (now)")));
        assert!(!is_engine_marker("a genuine human comment"));
    }
}
