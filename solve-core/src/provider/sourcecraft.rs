//! Sourcecraft adapter: implements `ProviderGateway` by shelling out to the
//! `sc` CLI. Structurally mirrors the GitHub adapter — same "argv in,
//! parsed JSON out" shape — but Sourcecraft's CLI uses a flatter JSON
//! envelope and has no draft-PR concept, so draft transitions are
//! simulated via a `draft:` label.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Command;

use super::{
    Comment, CommentTarget, CreatePrRequest, Issue, MergeState, PrState, PullRequest, Review,
    ReviewState, TimelineEvent,
};
use crate::provider::ProviderGateway;

pub struct SourcecraftGateway;

impl SourcecraftGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SourcecraftGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn run_sc(args: &[&str]) -> Result<String> {
    let output = Command::new("sc")
        .args(args)
        .output()
        .context("failed to spawn sc — is the Sourcecraft CLI installed?")?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("sc {} failed: {}", args.join(" "), stderr.trim());
    }
}

fn parse_date(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

#[derive(Deserialize)]
struct ScIssue {
    number: u64,
    url: String,
    title: String,
    body: Option<String>,
    updated_at: String,
    comments: Vec<ScComment>,
}

#[derive(Deserialize)]
struct ScComment {
    id: u64,
    body: String,
    created_at: String,
    author: String,
}

#[derive(Deserialize)]
struct ScPr {
    number: u64,
    url: String,
    branch: String,
    draft: bool,
    merged: bool,
    closed: bool,
    merge_status: Option<String>,
    head_owner: String,
    base_owner: String,
    base_repo: String,
    body: Option<String>,
}

fn pr_state(pr: &ScPr) -> PrState {
    if pr.merged {
        PrState::Merged
    } else if pr.closed {
        PrState::Closed
    } else {
        PrState::Open
    }
}

fn merge_state(pr: &ScPr) -> MergeState {
    match pr.merge_status.as_deref().unwrap_or("").to_lowercase().as_str() {
        "clean" => MergeState::Clean,
        "behind" => MergeState::Behind,
        "blocked" => MergeState::Blocked,
        "dirty" | "conflicting" => MergeState::Dirty,
        _ => MergeState::Unknown,
    }
}

fn pr_from_json(j: ScPr) -> PullRequest {
    PullRequest {
        number: j.number,
        url: j.url.clone(),
        branch: j.branch.clone(),
        is_draft: j.draft,
        state: pr_state(&j),
        merge_state: merge_state(&j),
        head_owner: j.head_owner.clone(),
        base_owner: j.base_owner.clone(),
        base_repo: j.base_repo.clone(),
        body: j.body.clone().unwrap_or_default(),
    }
}

impl ProviderGateway for SourcecraftGateway {
    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let out = run_sc(&["issue", "show", &format!("{owner}/{repo}#{number}"), "--json"])?;
        let j: ScIssue = serde_json::from_str(&out).context("parsing sc issue show output")?;
        Ok(Issue {
            number: j.number,
            url: j.url,
            title: j.title,
            body: j.body.unwrap_or_default(),
            updated_at: parse_date(&j.updated_at),
            comments: j
                .comments
                .into_iter()
                .map(|c| Comment {
                    id: c.id,
                    body: c.body,
                    created_at: parse_date(&c.created_at),
                    author: c.author,
                })
                .collect(),
        })
    }

    fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest> {
        let out = run_sc(&["pr", "show", &format!("{owner}/{repo}#{number}"), "--json"])?;
        let j: ScPr = serde_json::from_str(&out).context("parsing sc pr show output")?;
        Ok(pr_from_json(j))
    }

    fn create_pull_request(&self, req: CreatePrRequest<'_>) -> Result<PullRequest> {
        let draft_flag = if req.draft { "--draft" } else { "" };
        let mut args = vec![
            "pr",
            "create",
            "--repo",
            req.repo,
            "--head",
            req.head,
            "--base",
            req.base,
            "--title",
            req.title,
            "--body",
            req.body,
        ];
        if !draft_flag.is_empty() {
            args.push(draft_flag);
        }
        run_sc(&args)?;
        let out = run_sc(&["pr", "show", &format!("{}/{}#head:{}", req.owner, req.repo, req.head), "--json"])?;
        let j: ScPr = serde_json::from_str(&out).context("parsing sc pr show output")?;
        Ok(pr_from_json(j))
    }

    fn add_comment(
        &self,
        owner: &str,
        repo: &str,
        target: CommentTarget,
        number: u64,
        body: &str,
    ) -> Result<()> {
        let sub = match target {
            CommentTarget::Issue => "issue",
            CommentTarget::Pr => "pr",
        };
        run_sc(&[sub, "comment", &format!("{owner}/{repo}#{number}"), "--body", body])?;
        Ok(())
    }

    fn list_pr_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Comment>> {
        let out = run_sc(&["pr", "comments", &format!("{owner}/{repo}#{number}"), "--json"])?;
        let items: Vec<ScComment> = serde_json::from_str(&out).context("parsing sc pr comments output")?;
        Ok(items
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                body: c.body,
                created_at: parse_date(&c.created_at),
                author: c.author,
            })
            .filter(|c| since.map_or(true, |s| c.created_at > s))
            .collect())
    }

    fn list_pr_reviews(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Review>> {
        #[derive(Deserialize)]
        struct ScReview {
            state: String,
            submitted_at: String,
        }
        let out = run_sc(&["pr", "reviews", &format!("{owner}/{repo}#{number}"), "--json"])?;
        let items: Vec<ScReview> = serde_json::from_str(&out).context("parsing sc pr reviews output")?;
        Ok(items
            .into_iter()
            .map(|r| Review {
                state: match r.state.to_lowercase().as_str() {
                    "approved" => ReviewState::Approved,
                    "changes_requested" => ReviewState::ChangesRequested,
                    _ => ReviewState::Commented,
                },
                submitted_at: parse_date(&r.submitted_at),
            })
            .collect())
    }

    fn get_pr_timeline(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<TimelineEvent>> {
        #[derive(Deserialize)]
        struct ScTimelineItem {
            kind: String,
            pr_number: Option<u64>,
            merged: Option<bool>,
        }
        let out = run_sc(&["issue", "timeline", &format!("{owner}/{repo}#{number}"), "--json"])?;
        let items: Vec<ScTimelineItem> = serde_json::from_str(&out).context("parsing sc timeline output")?;
        Ok(items
            .into_iter()
            .map(|item| match (item.kind.as_str(), item.pr_number) {
                ("cross_referenced", Some(pr_num)) => TimelineEvent::CrossReferenced {
                    pr_num,
                    merged: item.merged.unwrap_or(false),
                },
                _ => TimelineEvent::Other,
            })
            .collect())
    }

    fn fork_repository(&self, owner: &str, repo: &str) -> Result<String> {
        match run_sc(&["repo", "fork", &format!("{owner}/{repo}")]) {
            Ok(_) => {}
            Err(e) if e.to_string().contains("already exists") => {}
            Err(e) => return Err(e),
        }
        self.current_identity()
    }

    fn get_clone_url(&self, owner: &str, repo: &str, ssh: bool) -> Result<String> {
        Ok(if ssh {
            format!("git@sourcecraft.dev:{owner}/{repo}.git")
        } else {
            format!("https://sourcecraft.dev/{owner}/{repo}.git")
        })
    }

    fn detect_repository_visibility(&self, owner: &str, repo: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct Wrapper {
            private: bool,
        }
        let out = run_sc(&["repo", "show", &format!("{owner}/{repo}"), "--json"])?;
        let w: Wrapper = serde_json::from_str(&out).context("parsing sc repo show output")?;
        Ok(w.private)
    }

    fn list_issues(&self, owner: &str, repo: &str, label: Option<&str>, limit: u32) -> Result<Vec<u64>> {
        let repo_arg = format!("{owner}/{repo}");
        let limit_str = limit.to_string();
        let mut args = vec!["issue", "list", "--repo", repo_arg.as_str(), "--json", "--limit", limit_str.as_str()];
        if let Some(label) = label {
            args.push("--label");
            args.push(label);
        }
        let out = run_sc(&args)?;
        #[derive(Deserialize)]
        struct Item {
            number: u64,
        }
        let items: Vec<Item> = serde_json::from_str(&out).context("parsing sc issue list output")?;
        Ok(items.into_iter().map(|i| i.number).collect())
    }

    fn check_authentication(&self) -> Result<()> {
        run_sc(&["auth", "status"]).map_err(|_| {
            anyhow::anyhow!("sc is not authenticated.\n\n  To fix:\n\n    sc auth login")
        })?;
        Ok(())
    }

    fn check_write_permission(&self, owner: &str, repo: &str, use_fork: bool) -> Result<bool> {
        if use_fork {
            return Ok(true);
        }
        #[derive(Deserialize)]
        struct Wrapper {
            role: String,
        }
        let out = run_sc(&["repo", "permission", &format!("{owner}/{repo}"), "--json"])?;
        let w: Wrapper = serde_json::from_str(&out).context("parsing sc repo permission output")?;
        Ok(matches!(w.role.as_str(), "write" | "admin" | "maintain"))
    }

    fn current_identity(&self) -> Result<String> {
        let out = run_sc(&["whoami"])?;
        Ok(out.trim().to_string())
    }

    fn set_pr_draft(&self, owner: &str, repo: &str, number: u64, draft: bool) -> Result<()> {
        let flag = if draft { "--set-draft" } else { "--unset-draft" };
        run_sc(&["pr", "edit", &format!("{owner}/{repo}#{number}"), flag])?;
        Ok(())
    }

    fn update_pr_body(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        let tmp = tempfile::NamedTempFile::new().context("creating temp file for PR body")?;
        std::fs::write(tmp.path(), body).context("writing PR body to temp file")?;
        run_sc(&[
            "pr",
            "edit",
            &format!("{owner}/{repo}#{number}"),
            "--body-file",
            tmp.path().to_str().context("temp path is not valid UTF-8")?,
        ])?;
        Ok(())
    }

    fn find_pr_for_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PullRequest>> {
        let out = run_sc(&["pr", "list", "--repo", &format!("{owner}/{repo}"), "--head", branch, "--json"])?;
        let mut items: Vec<ScPr> = serde_json::from_str(&out).context("parsing sc pr list output")?;
        Ok(items.pop().map(pr_from_json))
    }

    fn upload_paste(&self, content: &str, filename: &str) -> Result<String> {
        let tmp = tempfile::NamedTempFile::new().context("creating temp file for paste")?;
        std::fs::write(tmp.path(), content).context("writing paste content")?;
        let out = run_sc(&[
            "paste",
            "create",
            "--file",
            tmp.path().to_str().context("temp path is not valid UTF-8")?,
            "--filename",
            filename,
        ])?;
        Ok(out.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_pr(merged: bool, closed: bool, merge_status: &str) -> ScPr {
        ScPr {
            number: 1,
            url: "https://sourcecraft.dev/acme/widgets/pull/1".into(),
            branch: "issue-1-abcd1234".into(),
            draft: false,
            merged,
            closed,
            merge_status: Some(merge_status.to_string()),
            head_owner: "acme".into(),
            base_owner: "acme".into(),
            base_repo: "widgets".into(),
            body: Some("Fixes #1".into()),
        }
    }

    #[test]
    fn pr_state_merged_takes_priority() {
        assert_eq!(pr_state(&sample_pr(true, true, "clean")), PrState::Merged);
    }

    #[test]
    fn pr_state_closed_without_merge() {
        assert_eq!(pr_state(&sample_pr(false, true, "clean")), PrState::Closed);
    }

    #[test]
    fn pr_state_open() {
        assert_eq!(pr_state(&sample_pr(false, false, "clean")), PrState::Open);
    }

    #[test]
    fn merge_state_maps_known_values() {
        assert_eq!(merge_state(&sample_pr(false, false, "clean")), MergeState::Clean);
        assert_eq!(merge_state(&sample_pr(false, false, "behind")), MergeState::Behind);
        assert_eq!(merge_state(&sample_pr(false, false, "dirty")), MergeState::Dirty);
        assert_eq!(merge_state(&sample_pr(false, false, "")), MergeState::Unknown);
    }
}
