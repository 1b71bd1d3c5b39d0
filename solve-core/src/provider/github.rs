//! GitHub adapter: implements `ProviderGateway` by shelling out to the `gh`
//! CLI. All `gh` invocations request structured JSON output and are parsed
//! with `serde_json`; no text-scraping of human-readable output.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Command;

use super::{
    Comment, CommentTarget, CreatePrRequest, Issue, MergeState, PrState, PullRequest, Review,
    ReviewState, TimelineEvent,
};
use crate::provider::ProviderGateway;

pub struct GitHubGateway;

impl GitHubGateway {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GitHubGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn run_gh(args: &[&str]) -> Result<String> {
    let output = Command::new("gh")
        .args(args)
        .output()
        .context("failed to spawn gh — is the GitHub CLI installed?")?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("gh {} failed: {}", args.join(" "), stderr.trim());
    }
}

/// Resolve a PR's GraphQL node id. The REST-shaped `number` the rest of
/// this adapter works with is not accepted by GraphQL mutations.
fn pr_node_id(owner: &str, repo: &str, number: u64) -> Result<String> {
    #[derive(Deserialize)]
    struct Wrapper {
        id: String,
    }
    let out = run_gh(&[
        "pr",
        "view",
        &number.to_string(),
        "--repo",
        &format!("{owner}/{repo}"),
        "--json",
        "id",
    ])?;
    let w: Wrapper = serde_json::from_str(&out).context("parsing gh pr view output")?;
    Ok(w.id)
}

fn parse_date(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
}

fn parse_pr_state(state: &str, merged_at: Option<&str>) -> PrState {
    if merged_at.is_some_and(|s| !s.is_empty()) {
        PrState::Merged
    } else if state.eq_ignore_ascii_case("closed") {
        PrState::Closed
    } else {
        PrState::Open
    }
}

fn parse_merge_state(mergeable: &str, merge_state_status: &str) -> MergeState {
    if mergeable.eq_ignore_ascii_case("conflicting") {
        return MergeState::Dirty;
    }
    match merge_state_status.to_uppercase().as_str() {
        "CLEAN" => MergeState::Clean,
        "BEHIND" => MergeState::Behind,
        "BLOCKED" | "UNSTABLE" => MergeState::Blocked,
        "DIRTY" => MergeState::Dirty,
        _ => MergeState::Unknown,
    }
}

#[derive(Deserialize)]
struct GhIssueJson {
    number: u64,
    url: String,
    title: String,
    body: Option<String>,
    #[serde(rename = "updatedAt")]
    updated_at: String,
    comments: Vec<GhCommentJson>,
}

#[derive(Deserialize)]
struct GhCommentJson {
    id: u64,
    body: String,
    #[serde(rename = "createdAt")]
    created_at: String,
    author: GhAuthorJson,
}

#[derive(Deserialize)]
struct GhAuthorJson {
    login: String,
}

#[derive(Deserialize)]
struct GhPrJson {
    number: u64,
    url: String,
    #[serde(rename = "headRefName")]
    head_ref_name: String,
    #[serde(rename = "isDraft")]
    is_draft: bool,
    state: String,
    #[serde(rename = "mergedAt")]
    merged_at: Option<String>,
    mergeable: Option<String>,
    #[serde(rename = "mergeStateStatus")]
    merge_state_status: Option<String>,
    #[serde(rename = "headRepositoryOwner")]
    head_repository_owner: Option<GhOwnerJson>,
    #[serde(rename = "baseRepository")]
    base_repository: Option<GhBaseRepoJson>,
    body: Option<String>,
}

#[derive(Deserialize)]
struct GhOwnerJson {
    login: String,
}

#[derive(Deserialize)]
struct GhBaseRepoJson {
    owner: GhOwnerJson,
    name: String,
}

const PR_FIELDS: &str = "number,url,headRefName,isDraft,state,mergedAt,mergeable,mergeStateStatus,headRepositoryOwner,baseRepository,body";

fn pr_from_json(owner: &str, repo: &str, j: GhPrJson) -> PullRequest {
    let head_owner = j
        .head_repository_owner
        .map(|o| o.login)
        .unwrap_or_else(|| owner.to_string());
    let (base_owner, base_repo) = match j.base_repository {
        Some(b) => (b.owner.login, b.name),
        None => (owner.to_string(), repo.to_string()),
    };
    PullRequest {
        number: j.number,
        url: j.url,
        branch: j.head_ref_name,
        is_draft: j.is_draft,
        state: parse_pr_state(&j.state, j.merged_at.as_deref()),
        merge_state: parse_merge_state(
            j.mergeable.as_deref().unwrap_or(""),
            j.merge_state_status.as_deref().unwrap_or(""),
        ),
        head_owner,
        base_owner,
        base_repo,
        body: j.body.unwrap_or_default(),
    }
}

impl ProviderGateway for GitHubGateway {
    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let out = run_gh(&[
            "issue",
            "view",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--json",
            "number,url,title,body,updatedAt,comments",
        ])?;
        let j: GhIssueJson = serde_json::from_str(&out).context("parsing gh issue view output")?;
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
                    author: c.author.login,
                })
                .collect(),
        })
    }

    fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<PullRequest> {
        let out = run_gh(&[
            "pr",
            "view",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--json",
            PR_FIELDS,
        ])?;
        let j: GhPrJson = serde_json::from_str(&out).context("parsing gh pr view output")?;
        Ok(pr_from_json(owner, repo, j))
    }

    fn create_pull_request(&self, req: CreatePrRequest<'_>) -> Result<PullRequest> {
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
        if req.draft {
            args.push("--draft");
        }
        let _url = run_gh(&args)?;
        // `gh pr create` prints the PR URL; re-fetch for the structured form
        // rather than parsing stdout, so one JSON schema is authoritative.
        let out = run_gh(&[
            "pr",
            "view",
            req.head,
            "--repo",
            req.repo,
            "--json",
            PR_FIELDS,
        ])?;
        let j: GhPrJson = serde_json::from_str(&out).context("parsing gh pr view output")?;
        Ok(pr_from_json(req.owner, req.repo, j))
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
        run_gh(&[
            sub,
            "comment",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--body",
            body,
        ])?;
        Ok(())
    }

    fn list_pr_comments(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Comment>> {
        let out = run_gh(&[
            "pr",
            "view",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--json",
            "comments",
        ])?;
        #[derive(Deserialize)]
        struct Wrapper {
            comments: Vec<GhCommentJson>,
        }
        let w: Wrapper = serde_json::from_str(&out).context("parsing gh pr comments output")?;
        Ok(w.comments
            .into_iter()
            .map(|c| Comment {
                id: c.id,
                body: c.body,
                created_at: parse_date(&c.created_at),
                author: c.author.login,
            })
            .filter(|c| since.map_or(true, |s| c.created_at > s))
            .collect())
    }

    fn list_pr_reviews(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Review>> {
        #[derive(Deserialize)]
        struct GhReviewJson {
            state: String,
            #[serde(rename = "submittedAt")]
            submitted_at: Option<String>,
        }
        #[derive(Deserialize)]
        struct Wrapper {
            reviews: Vec<GhReviewJson>,
        }
        let out = run_gh(&[
            "pr",
            "view",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--json",
            "reviews",
        ])?;
        let w: Wrapper = serde_json::from_str(&out).context("parsing gh pr reviews output")?;
        Ok(w.reviews
            .into_iter()
            .filter_map(|r| {
                let state = match r.state.as_str() {
                    "APPROVED" => ReviewState::Approved,
                    "CHANGES_REQUESTED" => ReviewState::ChangesRequested,
                    _ => ReviewState::Commented,
                };
                r.submitted_at.map(|s| Review {
                    state,
                    submitted_at: parse_date(&s),
                })
            })
            .collect())
    }

    fn get_pr_timeline(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<TimelineEvent>> {
        let out = run_gh(&[
            "api",
            &format!("repos/{owner}/{repo}/issues/{number}/timeline"),
            "--paginate",
        ])?;
        #[derive(Deserialize)]
        struct TimelineItem {
            event: String,
            source: Option<TimelineSource>,
        }
        #[derive(Deserialize)]
        struct TimelineSource {
            issue: Option<TimelineIssue>,
        }
        #[derive(Deserialize)]
        struct TimelineIssue {
            number: u64,
            #[serde(default)]
            pull_request: Option<serde_json::Value>,
            state: Option<String>,
        }
        let items: Vec<TimelineItem> =
            serde_json::from_str(&out).context("parsing gh api timeline output")?;
        Ok(items
            .into_iter()
            .map(|item| {
                if item.event == "cross-referenced" {
                    if let Some(issue) = item.source.and_then(|s| s.issue) {
                        if issue.pull_request.is_some() {
                            let merged = issue.state.as_deref() == Some("closed");
                            return TimelineEvent::CrossReferenced {
                                pr_num: issue.number,
                                merged,
                            };
                        }
                    }
                }
                TimelineEvent::Other
            })
            .collect())
    }

    fn fork_repository(&self, owner: &str, repo: &str) -> Result<String> {
        let out = run_gh(&[
            "repo",
            "fork",
            &format!("{owner}/{repo}"),
            "--clone=false",
            "--json",
            "owner",
        ]);
        match out {
            Ok(_) => {}
            Err(e) if e.to_string().contains("already exists") => {}
            Err(e) => return Err(e),
        }
        let me = self.current_identity()?;
        Ok(me)
    }

    fn get_clone_url(&self, owner: &str, repo: &str, ssh: bool) -> Result<String> {
        Ok(if ssh {
            format!("git@github.com:{owner}/{repo}.git")
        } else {
            format!("https://github.com/{owner}/{repo}.git")
        })
    }

    fn detect_repository_visibility(&self, owner: &str, repo: &str) -> Result<bool> {
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(rename = "isPrivate")]
            is_private: bool,
        }
        let out = run_gh(&[
            "repo",
            "view",
            &format!("{owner}/{repo}"),
            "--json",
            "isPrivate",
        ])?;
        let w: Wrapper = serde_json::from_str(&out).context("parsing gh repo view output")?;
        Ok(w.is_private)
    }

    fn list_issues(&self, owner: &str, repo: &str, label: Option<&str>, limit: u32) -> Result<Vec<u64>> {
        let mut args = vec![
            "issue".to_string(),
            "list".to_string(),
            "--repo".to_string(),
            format!("{owner}/{repo}"),
            "--json".to_string(),
            "number".to_string(),
            "--limit".to_string(),
            limit.to_string(),
        ];
        if let Some(label) = label {
            args.push("--label".to_string());
            args.push(label.to_string());
        }
        let args_ref: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        let out = run_gh(&args_ref)?;
        #[derive(Deserialize)]
        struct Item {
            number: u64,
        }
        let items: Vec<Item> = serde_json::from_str(&out).context("parsing gh issue list output")?;
        Ok(items.into_iter().map(|i| i.number).collect())
    }

    fn check_authentication(&self) -> Result<()> {
        run_gh(&["auth", "status"]).map_err(|_| {
            anyhow::anyhow!(
                "gh is not authenticated.\n\n  To fix:\n\n    gh auth login"
            )
        })?;
        Ok(())
    }

    fn check_write_permission(&self, owner: &str, repo: &str, use_fork: bool) -> Result<bool> {
        if use_fork {
            return Ok(true);
        }
        #[derive(Deserialize)]
        struct Wrapper {
            #[serde(rename = "viewerPermission")]
            viewer_permission: String,
        }
        let out = run_gh(&[
            "repo",
            "view",
            &format!("{owner}/{repo}"),
            "--json",
            "viewerPermission",
        ])?;
        let w: Wrapper = serde_json::from_str(&out).context("parsing gh repo view output")?;
        Ok(matches!(
            w.viewer_permission.as_str(),
            "WRITE" | "ADMIN" | "MAINTAIN"
        ))
    }

    fn current_identity(&self) -> Result<String> {
        let out = run_gh(&["api", "user", "--jq", ".login"])?;
        Ok(out.trim().to_string())
    }

    fn set_pr_draft(&self, owner: &str, repo: &str, number: u64, draft: bool) -> Result<()> {
        // `gh pr ready` marks ready; there is no direct "convert to draft"
        // subcommand, so draft conversion goes through the GraphQL API,
        // which needs the PR's node id rather than its number.
        if draft {
            let node_id = pr_node_id(owner, repo, number)?;
            run_gh(&[
                "api",
                "graphql",
                "-f",
                &format!(
                    "query=mutation {{ convertPullRequestToDraft(input: {{pullRequestId: \"{node_id}\"}}) {{ clientMutationId }} }}"
                ),
            ])
            .context("converting PR to draft")?;
        } else {
            run_gh(&[
                "pr",
                "ready",
                number.to_string().as_str(),
                "--repo",
                &format!("{owner}/{repo}"),
            ])?;
        }
        Ok(())
    }

    fn update_pr_body(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        // Write through a temp file rather than interpolating `body` into an
        // argv string: avoids command-length limits and shell-escaping
        // pitfalls for arbitrary agent-authored content.
        let tmp = tempfile::NamedTempFile::new().context("creating temp file for PR body")?;
        std::fs::write(tmp.path(), body).context("writing PR body to temp file")?;
        run_gh(&[
            "pr",
            "edit",
            &number.to_string(),
            "--repo",
            &format!("{owner}/{repo}"),
            "--body-file",
            tmp.path().to_str().context("temp path is not valid UTF-8")?,
        ])?;
        Ok(())
    }

    fn find_pr_for_branch(&self, owner: &str, repo: &str, branch: &str) -> Result<Option<PullRequest>> {
        let out = run_gh(&[
            "pr",
            "list",
            "--repo",
            &format!("{owner}/{repo}"),
            "--head",
            branch,
            "--json",
            PR_FIELDS,
            "--limit",
            "1",
        ])?;
        let mut items: Vec<GhPrJson> =
            serde_json::from_str(&out).context("parsing gh pr list output")?;
        Ok(items.pop().map(|j| pr_from_json(owner, repo, j)))
    }

    fn upload_paste(&self, content: &str, filename: &str) -> Result<String> {
        let out = run_gh(&["gist", "create", "-", "--filename", filename, "--desc", content])?;
        Ok(out.trim().to_string())
    }
}
