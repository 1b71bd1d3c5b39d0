//! Result verifier & session summary (C9): confirms a PR exists, composes
//! the human summary, decides how to attach the session log, and removes
//! `AGENT.md` once the task is done.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;

use crate::agent::AgentSession;
use crate::provider::ProviderGateway;
use crate::sanitize::sanitize;

/// Platform comment-body size limits vary; this is GitHub's documented
/// ceiling and doubles as the threshold past which the log is uploaded as
/// a paste instead of inlined.
pub const INLINE_LOG_LIMIT_BYTES: usize = 65_536;

/// Look up the PR for `branch`, tried first against the one C4 created (if
/// any), then by asking the gateway to find one by branch — covers the
/// case where the agent itself opened the PR.
pub fn find_result_pr(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    branch: &str,
) -> Result<Option<crate::provider::PullRequest>> {
    gateway.find_pr_for_branch(owner, repo, branch)
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Option<String>,
    pub assistant_messages: u64,
    pub tool_uses: u64,
    pub cost_usd: f64,
    pub unpriced_models: Vec<String>,
    pub duration: Option<chrono::Duration>,
    pub limit_reached: bool,
    pub pr_found: bool,
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Session: {}", self.session_id.as_deref().unwrap_or("(none)"))?;
        writeln!(f, "Messages: {}  Tool uses: {}", self.assistant_messages, self.tool_uses)?;
        if self.unpriced_models.is_empty() {
            writeln!(f, "Cost: ${:.4}", self.cost_usd)?;
        } else {
            writeln!(
                f,
                "Cost: ${:.4} (unpriced models ignored: {})",
                self.cost_usd,
                self.unpriced_models.join(", ")
            )?;
        }
        if let Some(d) = self.duration {
            writeln!(f, "Duration: {}s", d.num_seconds())?;
        }
        if self.limit_reached {
            writeln!(f, "Usage limit reached during this session.")?;
        }
        if !self.pr_found {
            writeln!(f, "warning: no PR found for this branch.")?;
        }
        Ok(())
    }
}

pub fn compose_summary(
    session: &AgentSession,
    table: &crate::agent::pricing::PricingTable,
    pr_found: bool,
) -> SessionSummary {
    let (cost_usd, unpriced_models) = session.cost_usd(table);
    let duration = match (session.started_at, session.ended_at) {
        (Some(start), Some(end)) => Some(end - start),
        _ => None,
    };
    SessionSummary {
        session_id: session.session_id.clone(),
        assistant_messages: session.assistant_messages,
        tool_uses: session.tool_uses,
        cost_usd,
        unpriced_models,
        duration,
        limit_reached: session.limit_reached,
        pr_found,
    }
}

/// Where the sanitised log should go: inline in the comment body, or
/// uploaded as a platform paste with a link left in the comment instead.
pub enum LogAttachment {
    Inline(String),
    Paste { url: String },
}

/// Decide and perform the log attachment. Tokens are masked before leaving
/// the process regardless of which path is taken.
pub fn attach_log(
    gateway: &dyn ProviderGateway,
    raw_log: &str,
    known_tokens: &[String],
    session_id: Option<&str>,
) -> Result<LogAttachment> {
    let sanitised = sanitize(raw_log, known_tokens);
    if sanitised.len() <= INLINE_LOG_LIMIT_BYTES {
        return Ok(LogAttachment::Inline(sanitised));
    }
    let filename = format!("{}.log", session_id.unwrap_or("solve-session"));
    let url = gateway.upload_paste(&sanitised, &filename)?;
    Ok(LogAttachment::Paste { url })
}

/// Compose the comment body for a failed session, prefixed with the
/// failure reason ahead of the (possibly pasted) log attachment.
pub fn failure_comment(reason: &str, attachment: &LogAttachment) -> String {
    match attachment {
        LogAttachment::Inline(log) => format!("{reason}\n\n<details><summary>log</summary>\n\n```\n{log}\n```\n</details>"),
        LogAttachment::Paste { url } => format!("{reason}\n\nFull log: {url}"),
    }
}

/// Remove `AGENT.md` from the branch in one commit. Skipped when the task
/// is explicitly marked incomplete — its absence is the in-progress signal
/// for anyone inspecting the branch mid-session.
pub fn remove_agent_md(workspace_dir: &Path, task_complete: bool) -> Result<()> {
    if !task_complete {
        return Ok(());
    }
    let agent_md = workspace_dir.join("AGENT.md");
    if !agent_md.exists() {
        return Ok(());
    }
    run_git(workspace_dir, &["rm", "AGENT.md"])?;
    run_git(workspace_dir, &["commit", "-m", "Remove AGENT.md"])?;
    Ok(())
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawning git {}", args.join(" ")))?;
    if !output.status.success() {
        anyhow::bail!(
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
    use crate::agent::pricing::PricingTable;

    #[test]
    fn short_log_is_inlined() {
        let attachment = LogAttachment::Inline("short log".to_string());
        let comment = failure_comment("agent exited non-zero", &attachment);
        assert!(comment.contains("short log"));
        assert!(comment.starts_with("agent exited non-zero"));
    }

    #[test]
    fn paste_attachment_links_instead_of_inlining() {
        let attachment = LogAttachment::Paste {
            url: "https://example.com/paste/1".to_string(),
        };
        let comment = failure_comment("agent exited non-zero", &attachment);
        assert!(comment.contains("https://example.com/paste/1"));
        assert!(!comment.contains("```"));
    }

    #[test]
    fn summary_reports_unpriced_models() {
        let mut session = AgentSession::default();
        session.tokens.record(
            "mystery-model",
            &crate::agent::events::Usage {
                input_tokens: 100,
                ..Default::default()
            },
        );
        let table = PricingTable::builtin();
        let summary = compose_summary(&session, &table, true);
        assert_eq!(summary.unpriced_models, vec!["mystery-model".to_string()]);
        assert_eq!(summary.cost_usd, 0.0);
    }

    #[test]
    fn summary_without_pr_warns_in_display() {
        let session = AgentSession::default();
        let table = PricingTable::builtin();
        let summary = compose_summary(&session, &table, false);
        assert!(format!("{summary}").contains("no PR found"));
    }
}
