//! Link auto-corrector (C8) — experimental. Independent periodic task that
//! re-asserts the closing-keyword reference in a PR body if an edit
//! removed it.

use anyhow::Result;

use crate::provider::{ProviderGateway, PullRequest};

const KEYWORDS: &[&str] = &["close", "closes", "closed", "fix", "fixes", "fixed", "resolve", "resolves", "resolved"];

/// The textual reference a linked PR must contain: `#N` for a same-repo PR,
/// `owner/repo#N` when the PR's head and base repositories differ.
pub fn expected_reference(pr: &PullRequest, base_owner: &str, base_repo: &str, issue_number: u64) -> String {
    if pr.is_same_repo() {
        format!("#{issue_number}")
    } else {
        format!("{base_owner}/{base_repo}#{issue_number}")
    }
}

/// Check whether `body` already contains a valid closing-keyword reference
/// to `reference` (e.g. `#42` or `acme/widgets#42`), case-insensitively,
/// with a word boundary after the numeric id so `#421` does not match `#42`.
pub fn body_has_valid_link(body: &str, reference: &str) -> bool {
    let body_lower = body.to_lowercase();
    let reference_lower = reference.to_lowercase();

    for keyword in KEYWORDS {
        let mut start = 0;
        loop {
            let Some(rel_pos) = body_lower[start..].find(keyword) else {
                break;
            };
            let abs_pos = start + rel_pos;
            let after_kw = body_lower[abs_pos + keyword.len()..].trim_start_matches(' ');
            if after_kw.starts_with(reference_lower.as_str()) {
                let rest = &after_kw[reference_lower.len()..];
                if rest.is_empty() || !rest.chars().next().unwrap().is_alphanumeric() {
                    return true;
                }
            }
            start = abs_pos + keyword.len();
        }
    }
    false
}

/// Result of one correction-tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickResult {
    /// Body unchanged since last tick; nothing to check.
    Unchanged,
    /// Body changed but the link is already valid.
    StillValid,
    /// Body changed and the link was missing; it has been appended and
    /// written back.
    Corrected { new_body: String },
}

/// One correction tick: re-read the PR body, test the link if it changed,
/// and append the reference if it's missing. Returns what happened so the
/// caller can track the correction counter and decide whether to log.
pub fn tick(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    pr_number: u64,
    last_seen_body: &Option<String>,
    issue_number: u64,
    base_owner: &str,
    base_repo: &str,
) -> Result<(String, TickResult)> {
    let pr = gateway.get_pull_request(owner, repo, pr_number)?;
    if last_seen_body.as_deref() == Some(pr.body.as_str()) {
        return Ok((pr.body, TickResult::Unchanged));
    }

    let reference = expected_reference(&pr, base_owner, base_repo, issue_number);
    if body_has_valid_link(&pr.body, &reference) {
        return Ok((pr.body, TickResult::StillValid));
    }

    let new_body = format!("{}\n\n---\n\nResolves {reference}", pr.body.trim_end());
    gateway.update_pr_body(owner, repo, pr_number, &new_body)?;
    Ok((new_body.clone(), TickResult::Corrected { new_body }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::PrState;

    fn pr(body: &str, head_owner: &str, base_owner: &str) -> PullRequest {
        PullRequest {
            number: 7,
            url: String::new(),
            branch: "issue-42-aaaa1111".to_string(),
            is_draft: true,
            state: PrState::Open,
            merge_state: crate::provider::MergeState::Clean,
            head_owner: head_owner.to_string(),
            base_owner: base_owner.to_string(),
            base_repo: "widgets".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn same_repo_reference_is_bare_hash() {
        let p = pr("", "acme", "acme");
        assert_eq!(expected_reference(&p, "acme", "widgets", 42), "#42");
    }

    #[test]
    fn cross_fork_reference_includes_owner_repo() {
        let p = pr("", "me", "acme");
        assert_eq!(expected_reference(&p, "acme", "widgets", 42), "acme/widgets#42");
    }

    #[test]
    fn recognises_all_keyword_inflections() {
        for kw in ["Closes", "closed", "Fix", "fixes", "Resolved", "resolves"] {
            let body = format!("{kw} #42");
            assert!(body_has_valid_link(&body, "#42"), "failed for {kw}");
        }
    }

    #[test]
    fn rejects_prefix_collision_with_longer_number() {
        assert!(!body_has_valid_link("Fixes #421", "#42"));
    }

    #[test]
    fn recognises_cross_repo_reference() {
        assert!(body_has_valid_link("Fixes acme/widgets#42", "acme/widgets#42"));
    }

    #[test]
    fn missing_link_gets_corrected_and_counted() {
        struct Stub;
        impl ProviderGateway for Stub {
            fn get_issue(&self, _: &str, _: &str, _: u64) -> Result<crate::provider::Issue> {
                unimplemented!()
            }
            fn get_pull_request(&self, _: &str, _: &str, _: u64) -> Result<PullRequest> {
                Ok(pr("Some description with no reference.", "acme", "acme"))
            }
            fn create_pull_request(&self, _: crate::provider::CreatePrRequest<'_>) -> Result<PullRequest> {
                unimplemented!()
            }
            fn add_comment(&self, _: &str, _: &str, _: crate::provider::CommentTarget, _: u64, _: &str) -> Result<()> {
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
            fn get_pr_timeline(&self, _: &str, _: &str, _: u64) -> Result<Vec<crate::provider::TimelineEvent>> {
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
            fn update_pr_body(&self, _: &str, _: &str, _: u64, body: &str) -> Result<()> {
                assert!(body.contains("Resolves #42"));
                Ok(())
            }
            fn find_pr_for_branch(&self, _: &str, _: &str, _: &str) -> Result<Option<PullRequest>> {
                unimplemented!()
            }
            fn upload_paste(&self, _: &str, _: &str) -> Result<String> {
                unimplemented!()
            }
        }

        let (_, result) = tick(&Stub, "acme", "widgets", 7, &None, 42, "acme", "widgets").unwrap();
        assert!(matches!(result, TickResult::Corrected { .. }));
    }
}
