//! Workspace manager (C3): temporary directory lifecycle, clone, fork
//! bootstrap, upstream remote wiring, and branch checkout.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::sleep;
use std::time::Duration;

use crate::naming::issue_branch_name;
use crate::provider::ProviderGateway;
use crate::url::RunMode;

/// Name of the extra remote pointing at the original contributor's fork when
/// continuing someone else's cross-fork PR in fork mode.
pub const PR_FORK_REMOTE: &str = "pr-fork";

#[derive(Debug)]
pub struct Workspace {
    pub temp_dir: PathBuf,
    pub repo_to_clone: String,
    pub upstream: Option<String>,
    pub pr_fork_remote: Option<String>,
    pub default_branch: String,
    pub work_branch: String,
    pub is_fork: bool,
}

impl Workspace {
    /// Choose a unique directory. In resume mode the prefix references the
    /// session id so a rerun can find the same checkout.
    pub fn setup_temp_dir(resume_session_id: Option<&str>) -> Result<PathBuf> {
        let prefix = match resume_session_id {
            Some(id) => format!("solve-{id}-"),
            None => "solve-".to_string(),
        };
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir()
            .context("creating temporary workspace directory")?
            .into_path();
        Ok(dir)
    }

    /// Decide the clone target and upstream wiring.
    ///
    /// `use_fork = false`: clone the base repo directly, no upstream.
    /// `use_fork = true`: ensure the current identity has a fork (creating
    /// one if missing), wait for eventual consistency, and treat the fork
    /// as `repo_to_clone` with the base repo as `upstream`. When
    /// `pr_head_owner` names neither the current identity nor the base
    /// owner, an extra remote is recorded so follow-up commits can be
    /// pushed to that third party's fork.
    pub fn setup_repository(
        gateway: &dyn ProviderGateway,
        owner: &str,
        repo: &str,
        use_fork: bool,
        pr_head_owner: Option<&str>,
    ) -> Result<(String, Option<String>, Option<String>)> {
        if !use_fork {
            return Ok((format!("{owner}/{repo}"), None, None));
        }

        let identity = gateway.current_identity()?;
        let fork_owner = gateway
            .fork_repository(owner, repo)
            .context("ensuring a fork exists")?;
        wait_for_fork_consistency(gateway, &fork_owner, repo)?;

        let upstream = format!("{owner}/{repo}");
        let repo_to_clone = format!("{fork_owner}/{repo}");

        let pr_fork_remote = match pr_head_owner {
            Some(head_owner) if head_owner != identity && head_owner != owner => {
                Some(format!("{head_owner}/{repo}"))
            }
            _ => None,
        };

        Ok((repo_to_clone, Some(upstream), pr_fork_remote))
    }

    /// Clone `repo_to_clone` into `temp_dir` via the platform CLI so
    /// authentication is inherited from the caller's existing session.
    pub fn clone(repo_to_clone: &str, temp_dir: &Path, provider_clone_cmd: &str) -> Result<()> {
        let output = Command::new(provider_clone_cmd)
            .args(["repo", "clone", repo_to_clone, "."])
            .current_dir(temp_dir)
            .output()
            .with_context(|| format!("spawning `{provider_clone_cmd} repo clone`"))?;
        if !output.status.success() {
            bail!(
                "{} repo clone {} failed: {}",
                provider_clone_cmd,
                repo_to_clone,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Add `upstream` as a git remote and fetch its default branch into the
    /// fork's local clone.
    pub fn sync_upstream(temp_dir: &Path, upstream_clone_url: &str, default_branch: &str) -> Result<()> {
        run_git(temp_dir, &["remote", "add", "upstream", upstream_clone_url]).ok();
        run_git(temp_dir, &["fetch", "upstream", default_branch])?;
        Ok(())
    }

    /// Detect the default branch from the freshly cloned working tree. Fails
    /// loud on an empty result — an empty repo or unusual remote config.
    pub fn detect_default_branch(temp_dir: &Path) -> Result<String> {
        let out = run_git(temp_dir, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .or_else(|_| run_git(temp_dir, &["rev-parse", "--abbrev-ref", "HEAD"]))?;
        let branch = out
            .trim()
            .rsplit('/')
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if branch.is_empty() {
            bail!("could not detect a default branch — repository may be empty");
        }
        Ok(branch)
    }

    /// `git status --porcelain` must be empty immediately after clone;
    /// anything else is fatal, since it means the clone carried over
    /// unexpected local state.
    pub fn verify_clean_tree(temp_dir: &Path) -> Result<()> {
        let out = run_git(temp_dir, &["status", "--porcelain"])?;
        if !out.trim().is_empty() {
            bail!("working tree is not clean after clone:\n{out}");
        }
        Ok(())
    }

    /// `IssueStart`: create a fresh branch named from the issue number.
    /// `*Continue`: check out the PR's existing head ref, from the
    /// cross-fork remote when the PR belongs to neither the base repo nor
    /// the current fork. After the operation, re-read the checked-out
    /// branch and compare against what was expected; any mismatch is fatal.
    pub fn checkout_or_create_branch(
        temp_dir: &Path,
        mode: &RunMode,
        issue_number: Option<u64>,
        existing_branch: Option<&str>,
        cross_fork_remote: Option<(&str, &str)>,
    ) -> Result<String> {
        let expected = match mode {
            RunMode::IssueStart => {
                let n = issue_number.context("IssueStart requires an issue number")?;
                let name = issue_branch_name(n);
                run_git(temp_dir, &["checkout", "-b", &name])?;
                name
            }
            RunMode::IssueAutoContinue { .. } | RunMode::PrContinue { .. } => {
                let branch = existing_branch.context("continuing a run requires a branch name")?;
                if let Some((remote_name, remote_url)) = cross_fork_remote {
                    run_git(temp_dir, &["remote", "add", remote_name, remote_url]).ok();
                    run_git(temp_dir, &["fetch", remote_name, branch])?;
                    run_git(
                        temp_dir,
                        &["checkout", "-b", branch, &format!("{remote_name}/{branch}")],
                    )?;
                } else {
                    run_git(temp_dir, &["fetch", "origin", branch])?;
                    run_git(temp_dir, &["checkout", branch])?;
                }
                branch.to_string()
            }
        };

        let actual = run_git(temp_dir, &["branch", "--show-current"])?
            .trim()
            .to_string();
        if actual != expected {
            bail!("checked-out branch '{actual}' does not match expected '{expected}'");
        }
        Ok(actual)
    }
}

fn wait_for_fork_consistency(gateway: &dyn ProviderGateway, owner: &str, repo: &str) -> Result<()> {
    let mut delay = Duration::from_secs(2);
    for attempt in 0..5 {
        if gateway.get_clone_url(owner, repo, false).is_ok() {
            return Ok(());
        }
        if attempt == 4 {
            bail!("fork {owner}/{repo} did not become visible after retrying");
        }
        sleep(delay);
        delay *= 2;
    }
    Ok(())
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
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
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn init_repo(dir: &Path) {
        StdCommand::new("git").arg("init").current_dir(dir).output().unwrap();
        StdCommand::new("git")
            .args(["config", "user.email", "test@example.com"])
            .current_dir(dir)
            .output()
            .unwrap();
        StdCommand::new("git")
            .args(["config", "user.name", "test"])
            .current_dir(dir)
            .output()
            .unwrap();
        std::fs::write(dir.join("README.md"), "hello\n").unwrap();
        StdCommand::new("git").args(["add", "."]).current_dir(dir).output().unwrap();
        StdCommand::new("git")
            .args(["commit", "-m", "init"])
            .current_dir(dir)
            .output()
            .unwrap();
    }

    #[test]
    fn clean_tree_after_fresh_commit() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        Workspace::verify_clean_tree(dir.path()).unwrap();
    }

    #[test]
    fn dirty_tree_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        std::fs::write(dir.path().join("scratch.txt"), "uncommitted").unwrap();
        assert!(Workspace::verify_clean_tree(dir.path()).is_err());
    }

    #[test]
    fn checkout_or_create_branch_for_issue_start() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let branch = Workspace::checkout_or_create_branch(
            dir.path(),
            &RunMode::IssueStart,
            Some(42),
            None,
            None,
        )
        .unwrap();
        assert!(branch.starts_with("issue-42-"));
    }

    #[test]
    fn setup_repository_without_fork_targets_base_directly() {
        struct Dummy;
        impl ProviderGateway for Dummy {
            fn get_issue(&self, _: &str, _: &str, _: u64) -> Result<crate::provider::Issue> {
                unimplemented!()
            }
            fn get_pull_request(&self, _: &str, _: &str, _: u64) -> Result<crate::provider::PullRequest> {
                unimplemented!()
            }
            fn create_pull_request(
                &self,
                _: crate::provider::CreatePrRequest<'_>,
            ) -> Result<crate::provider::PullRequest> {
                unimplemented!()
            }
            fn add_comment(
                &self,
                _: &str,
                _: &str,
                _: crate::provider::CommentTarget,
                _: u64,
                _: &str,
            ) -> Result<()> {
                unimplemented!()
            }
            fn list_pr_comments(
                &self,
                _: &str,
                _: &str,
                _: u64,
                _: Option<chrono::DateTime<chrono::Utc>>,
            ) -> Result<Vec<crate::provider::Comment>> {
                unimplemented!()
            }
            fn list_pr_reviews(&self, _: &str, _: &str, _: u64) -> Result<Vec<crate::provider::Review>> {
                unimplemented!()
            }
            fn get_pr_timeline(
                &self,
                _: &str,
                _: &str,
                _: u64,
            ) -> Result<Vec<crate::provider::TimelineEvent>> {
                unimplemented!()
            }
            fn fork_repository(&self, _: &str, _: &str) -> Result<String> {
                unimplemented!()
            }
            fn get_clone_url(&self, _: &str, _: &str, _: bool) -> Result<String> {
                unimplemented!()
            }
            fn detect_repository_visibility(&self, _: &str, _: &str) -> Result<bool> {
                unimplemented!()
            }
            fn list_issues(&self, _: &str, _: &str, _: Option<&str>, _: u32) -> Result<Vec<u64>> {
                unimplemented!()
            }
            fn check_authentication(&self) -> Result<()> {
                unimplemented!()
            }
            fn check_write_permission(&self, _: &str, _: &str, _: bool) -> Result<bool> {
                unimplemented!()
            }
            fn current_identity(&self) -> Result<String> {
                unimplemented!()
            }
            fn set_pr_draft(&self, _: &str, _: &str, _: u64, _: bool) -> Result<()> {
                unimplemented!()
            }
            fn update_pr_body(&self, _: &str, _: &str, _: u64, _: &str) -> Result<()> {
                unimplemented!()
            }
            fn find_pr_for_branch(
                &self,
                _: &str,
                _: &str,
                _: &str,
            ) -> Result<Option<crate::provider::PullRequest>> {
                unimplemented!()
            }
            fn upload_paste(&self, _: &str, _: &str) -> Result<String> {
                unimplemented!()
            }
        }
        let (repo_to_clone, upstream, fork_remote) =
            Workspace::setup_repository(&Dummy, "octo", "cat", false, None).unwrap();
        assert_eq!(repo_to_clone, "octo/cat");
        assert!(upstream.is_none());
        assert!(fork_remote.is_none());
    }
}
