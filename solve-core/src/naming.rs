//! Branch name generation.
//!
//! Branch name policy: `issue-<N>-<8-hex>`, where the suffix is
//! cryptographically random so that two engines racing on the same issue
//! never collide on a branch name.

use uuid::Uuid;

/// Generate a fresh branch name for a newly started issue.
pub fn issue_branch_name(issue_number: u64) -> String {
    format!("issue-{issue_number}-{}", random_hex_suffix())
}

/// 8 lowercase hex characters drawn from a UUIDv4 (122 bits of randomness,
/// truncated — plenty for collision avoidance within one issue's branch
/// namespace).
fn random_hex_suffix() -> String {
    let id = Uuid::new_v4();
    let hex = id.simple().to_string();
    hex[..8].to_string()
}

/// Parse `issue-<N>-<hex>` back into its issue number, if the branch
/// follows the naming policy. Used when checking out an existing branch
/// to confirm it references the expected issue.
pub fn parse_issue_branch(branch: &str) -> Option<u64> {
    let rest = branch.strip_prefix("issue-")?;
    let (num, suffix) = rest.split_once('-')?;
    if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    num.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_has_expected_shape() {
        let name = issue_branch_name(42);
        assert!(name.starts_with("issue-42-"));
        let suffix = name.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn branch_names_are_not_repeated() {
        let a = issue_branch_name(1);
        let b = issue_branch_name(1);
        assert_ne!(a, b);
    }

    #[test]
    fn parses_valid_branch() {
        assert_eq!(parse_issue_branch("issue-42-abcd1234"), Some(42));
    }

    #[test]
    fn rejects_non_hex_suffix() {
        assert_eq!(parse_issue_branch("issue-42-not-hex-zzzz"), None);
    }

    #[test]
    fn rejects_missing_prefix() {
        assert_eq!(parse_issue_branch("feature-42-abcd1234"), None);
    }

    #[test]
    fn round_trips_generated_name() {
        let name = issue_branch_name(99);
        assert_eq!(parse_issue_branch(&name), Some(99));
    }
}
