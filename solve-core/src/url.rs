//! `TargetUrl` parsing and `RunMode` resolution.
//!
//! No general-purpose URL crate is pulled in for this — the grammar this
//! system accepts is narrow (`<owner>[/<repo>[/<kind>/<id>]]`) and is
//! cheaper and more testable as a hand-rolled splitter than as a generic
//! `Url` object with platform-specific post-processing.

use anyhow::{bail, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    Sourcecraft,
}

impl Provider {
    pub fn host(self) -> &'static str {
        match self {
            Provider::GitHub => "github.com",
            Provider::Sourcecraft => "sourcecraft.dev",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    Issue,
    Pull,
    Repo,
    Owner,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUrl {
    pub provider: Provider,
    pub kind: UrlKind,
    pub owner: String,
    pub repo: Option<String>,
    pub number: Option<u64>,
    pub slug: Option<String>,
    pub normalized: String,
}

impl TargetUrl {
    /// Invariant required to enter the solve lifecycle.
    pub fn is_solvable(&self) -> bool {
        matches!(self.kind, UrlKind::Issue | UrlKind::Pull)
    }
}

/// Parse a target URL into its components.
///
/// Accepts `<owner>`, `<owner>/<repo>`, `<owner>/<repo>/<kind>/<id>`,
/// bare or with a scheme and host. Rejects whitespace and leading
/// non-ASCII punctuation. `http://` is normalised to `https://`, trailing
/// slashes are stripped, numeric ids are coerced to `u64`, slug ids are
/// preserved verbatim.
pub fn parse_url(input: &str) -> Result<TargetUrl> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("empty target URL");
    }
    if trimmed.chars().any(|c| c.is_whitespace()) {
        bail!("target URL must not contain whitespace: {trimmed:?}");
    }
    if let Some(first) = trimmed.chars().next() {
        if !first.is_ascii_alphanumeric() && first != '#' {
            bail!("target URL must not start with punctuation: {trimmed:?}");
        }
    }

    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .unwrap_or(trimmed);
    let rest = rest.trim_end_matches('/');

    let (host, path) = match rest.split_once('/') {
        Some((h, p)) if h.contains('.') => (h, p),
        _ => (Provider::GitHub.host(), rest),
    };

    let provider = if host.eq_ignore_ascii_case(Provider::Sourcecraft.host()) {
        Provider::Sourcecraft
    } else {
        Provider::GitHub
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let (kind, owner, repo, number, slug) = match segments.as_slice() {
        [owner] => (UrlKind::Owner, owner.to_string(), None, None, None),
        [owner, repo] => (
            UrlKind::Repo,
            owner.to_string(),
            Some(repo.to_string()),
            None,
            None,
        ),
        [owner, repo, kind_seg, id] => {
            let kind = match *kind_seg {
                "issues" => UrlKind::Issue,
                "pull" | "pullrequests" => UrlKind::Pull,
                _ => UrlKind::Other,
            };
            let (number, slug) = match id.parse::<u64>() {
                Ok(n) => (Some(n), None),
                Err(_) => (None, Some(id.to_string())),
            };
            (kind, owner.to_string(), Some(repo.to_string()), number, slug)
        }
        _ => bail!("unrecognised target URL shape: {trimmed:?}"),
    };

    let normalized = match (&repo, &kind, number, &slug) {
        (Some(repo), UrlKind::Issue, Some(n), _) => {
            format!("https://{}/{}/{}/issues/{}", host, owner, repo, n)
        }
        (Some(repo), UrlKind::Pull, Some(n), _) => {
            format!("https://{}/{}/{}/pull/{}", host, owner, repo, n)
        }
        (Some(repo), UrlKind::Issue, None, Some(s)) => {
            format!("https://{}/{}/{}/issues/{}", host, owner, repo, s)
        }
        (Some(repo), UrlKind::Pull, None, Some(s)) => {
            format!("https://{}/{}/{}/pull/{}", host, owner, repo, s)
        }
        (Some(repo), _, _, _) => format!("https://{}/{}/{}", host, owner, repo),
        (None, _, _, _) => format!("https://{}/{}", host, owner),
    };

    Ok(TargetUrl {
        provider,
        kind,
        owner,
        repo,
        number,
        slug,
        normalized,
    })
}

/// One `(issue | pr) → pull-request → merged` run's derived mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// URL points to an issue, no existing PR identified yet.
    IssueStart,
    /// URL points to an issue, a PR authored by the current identity
    /// referencing it exists and is chosen to continue.
    IssueAutoContinue { pr_number: u64 },
    /// URL points to a PR; linked issue inferred from its body.
    PrContinue { issue_number: Option<u64> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_issue_path() {
        let t = parse_url("acme/widgets/issues/42").unwrap();
        assert_eq!(t.provider, Provider::GitHub);
        assert_eq!(t.kind, UrlKind::Issue);
        assert_eq!(t.owner, "acme");
        assert_eq!(t.repo.as_deref(), Some("widgets"));
        assert_eq!(t.number, Some(42));
        assert!(t.is_solvable());
    }

    #[test]
    fn parses_full_https_pull_url() {
        let t = parse_url("https://github.com/acme/widgets/pull/57").unwrap();
        assert_eq!(t.kind, UrlKind::Pull);
        assert_eq!(t.number, Some(57));
        assert_eq!(t.normalized, "https://github.com/acme/widgets/pull/57");
    }

    #[test]
    fn normalizes_http_to_https() {
        let t = parse_url("http://github.com/acme/widgets/issues/1").unwrap();
        assert!(t.normalized.starts_with("https://"));
    }

    #[test]
    fn strips_trailing_slash() {
        let t = parse_url("https://github.com/acme/widgets/issues/1/").unwrap();
        assert_eq!(t.number, Some(1));
    }

    #[test]
    fn pull_requests_alias_maps_to_pull_kind() {
        let t = parse_url("acme/widgets/pullrequests/9").unwrap();
        assert_eq!(t.kind, UrlKind::Pull);
    }

    #[test]
    fn preserves_slug_ids() {
        let t = parse_url("acme/widgets/issues/not-a-number").unwrap();
        assert_eq!(t.number, None);
        assert_eq!(t.slug.as_deref(), Some("not-a-number"));
    }

    #[test]
    fn owner_only_is_not_solvable() {
        let t = parse_url("acme").unwrap();
        assert_eq!(t.kind, UrlKind::Owner);
        assert!(!t.is_solvable());
    }

    #[test]
    fn repo_only_is_not_solvable() {
        let t = parse_url("acme/widgets").unwrap();
        assert_eq!(t.kind, UrlKind::Repo);
        assert!(!t.is_solvable());
    }

    #[test]
    fn rejects_whitespace() {
        assert!(parse_url("acme/widgets issues/1").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_url("").is_err());
        assert!(parse_url("   ").is_err());
    }

    #[test]
    fn rejects_leading_punctuation() {
        assert!(parse_url("!acme/widgets").is_err());
    }

    #[test]
    fn sourcecraft_host_is_recognised() {
        let t = parse_url("https://sourcecraft.dev/acme/widgets/issues/3").unwrap();
        assert_eq!(t.provider, Provider::Sourcecraft);
    }

    #[test]
    fn round_trip_normalized_is_stable() {
        let first = parse_url("acme/widgets/issues/42").unwrap();
        let second = parse_url(&first.normalized).unwrap();
        assert_eq!(second.normalized, first.normalized);
    }
}
