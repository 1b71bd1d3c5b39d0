//! Agent session driver (C5): spawns the agent CLI, consumes its
//! line-delimited JSON event stream, and accumulates token usage and cost.

pub mod events;
pub mod pricing;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::agent::events::{parse_line, AgentEvent, ContentBlock};
use crate::agent::pricing::{PricingTable, TokenAccount};
use crate::log::Logger;
use crate::subprocess::{self, EventConsumer, ExitOutcome, SpawnSpec, StdinMode};

/// Default binary name for the agent CLI; overridable for tests and for
/// deployments that alias it differently.
pub const DEFAULT_AGENT_BIN: &str = "claude";

const OVERLOAD_RETRY_LIMIT: u32 = 3;
const OVERLOAD_BACKOFF_BASE_SECS: u64 = 5;
const OVERLOAD_BACKOFF_FACTOR: u64 = 2;

#[derive(Debug, Clone, Default)]
pub struct AgentSession {
    pub session_id: Option<String>,
    pub model: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub assistant_messages: u64,
    pub tool_uses: u64,
    pub tokens: TokenAccount,
    pub limit_reached: bool,
    pub limit_reset_at: Option<DateTime<Utc>>,
    pub overloaded_retries: u32,
}

impl AgentSession {
    pub fn cost_usd(&self, table: &PricingTable) -> (f64, Vec<String>) {
        self.tokens.cost_usd(table)
    }
}

/// The two halves of the prompt sent to the agent. In resume mode only
/// `task` (the feedback delta) is sent and the agent is asked to continue
/// its prior session instead.
pub struct Prompt {
    pub system: String,
    pub task: String,
}

/// Steady system-section instructions: platform context, linking rules, the
/// commit-message template, and a pointer to where feedback will arrive.
pub fn build_system_prompt(linking_reference: &str) -> String {
    format!(
        "You are working inside a git repository on a dedicated branch.\n\
         Commit after each logical unit of work and push as you go.\n\
         The pull request body must always contain the linking reference \
         `{linking_reference}` so the hosting platform closes the issue on merge.\n\
         When new review or issue feedback arrives you will be told about it \
         explicitly; do not go looking for it yourself.\n\
         When all work is complete, mark the pull request ready for review."
    )
}

/// The task-section for a fresh `IssueStart` session.
pub fn build_task_prompt(issue_url: &str, branch: &str, working_dir: &Path, fork: Option<(&str, &str)>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Issue: {issue_url}\n"));
    out.push_str(&format!("Branch: {branch}\n"));
    out.push_str(&format!("Working directory: {}\n", working_dir.display()));
    if let Some((fork_repo, upstream_repo)) = fork {
        out.push_str(&format!("Fork: {fork_repo}\n"));
        out.push_str(&format!("Upstream: {upstream_repo}\n"));
    }
    out
}

/// The minimal task-section used on resume: just the feedback delta.
pub fn build_resume_prompt(feedback_summary: &str) -> String {
    feedback_summary.to_string()
}

/// A consumer that updates `AgentSession` counters as events stream by,
/// renaming the log file the first time a session id is observed.
pub struct SessionTracker<'a> {
    pub session: AgentSession,
    pub log_dir: PathBuf,
    pub current_log_path: PathBuf,
    pub logger: &'a Logger,
    renamed: bool,
}

impl<'a> SessionTracker<'a> {
    pub fn new(log_dir: PathBuf, initial_log_path: PathBuf, logger: &'a Logger) -> Self {
        Self {
            session: AgentSession::default(),
            log_dir,
            current_log_path: initial_log_path,
            logger,
            renamed: false,
        }
    }

    fn observe_session_id(&mut self, session_id: &str) {
        if self.session.session_id.is_some() {
            return;
        }
        self.session.session_id = Some(session_id.to_string());
        if !self.renamed {
            let new_path = self.log_dir.join(format!("{session_id}.log"));
            if std::fs::rename(&self.current_log_path, &new_path).is_ok() {
                self.current_log_path = new_path;
                self.renamed = true;
            }
            self.logger.info(format!("session id: {session_id}"));
        }
    }

    fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::System(s) => {
                if let Some(id) = s.session_id {
                    self.observe_session_id(&id);
                }
            }
            AgentEvent::Assistant(m) | AgentEvent::User(m) => {
                if let Some(id) = &m.session_id {
                    self.observe_session_id(id);
                }
                if let Some(body) = m.message {
                    if let Some(model) = &body.model {
                        self.session.model.get_or_insert_with(|| model.clone());
                    }
                    self.session.assistant_messages += 1;
                    for block in &body.content {
                        if let ContentBlock::ToolUse { .. } = block {
                            self.session.tool_uses += 1;
                        }
                    }
                    if let Some(usage) = &body.usage {
                        let model = body.model.as_deref().unwrap_or("unknown");
                        self.session.tokens.record(model, usage);
                    }
                }
            }
            AgentEvent::Result(r) => {
                if let Some(id) = &r.session_id {
                    self.observe_session_id(id);
                }
                if events::is_limit_reached(&r) {
                    self.session.limit_reached = true;
                }
            }
            AgentEvent::Unknown => {}
        }
    }
}

impl<'a> EventConsumer for SessionTracker<'a> {
    fn on_stdout_line(&mut self, line: &str) {
        if events::is_overloaded_line(line) {
            self.session.overloaded_retries += 1;
            return;
        }
        if let Some(event) = parse_line(line) {
            self.handle_event(event);
        }
    }

    fn on_stderr_line(&mut self, _line: &str) {}

    fn on_exit(&mut self, outcome: &ExitOutcome) {
        self.session.ended_at = Some(Utc::now());
        self.session.exit_code = outcome.code();
    }
}

/// Spawn the agent, wiring model/prompt/resume flags, and stream its
/// events into `tracker` until exit. Returns the final `ExitOutcome`
/// alongside the `AgentSession` the tracker accumulated.
pub fn run_session(
    agent_bin: &str,
    model: Option<&str>,
    prompt: &Prompt,
    resume_session_id: Option<&str>,
    working_dir: &Path,
    log_path: &Path,
    tracker: SessionTracker<'_>,
) -> Result<(ExitOutcome, AgentSession)> {
    let mut spec = SpawnSpec::new(agent_bin).cwd(working_dir.to_path_buf());
    if let Some(m) = model {
        spec = spec.arg("--model").arg(m);
    }
    spec = match resume_session_id {
        Some(id) => spec.arg("--resume").arg(id).arg("-p").arg(prompt.task.as_str()),
        None => spec
            .arg("--append-system-prompt")
            .arg(prompt.system.as_str())
            .arg("-p")
            .arg(prompt.task.as_str()),
    };

    let handle = subprocess::spawn(spec, StdinMode::Ignore, Some(log_path))?;
    let (outcome, tracker) = handle.subscribe(tracker);
    Ok((outcome, tracker.session))
}

/// Exponential backoff schedule for `Overloaded` retries: base 5s, factor
/// 2, bounded at 3 attempts.
pub fn overload_backoff(attempt: u32) -> Option<std::time::Duration> {
    if attempt >= OVERLOAD_RETRY_LIMIT {
        return None;
    }
    let secs = OVERLOAD_BACKOFF_BASE_SECS * OVERLOAD_BACKOFF_FACTOR.pow(attempt);
    Some(std::time::Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overload_backoff_doubles_each_attempt_then_stops() {
        assert_eq!(overload_backoff(0), Some(std::time::Duration::from_secs(5)));
        assert_eq!(overload_backoff(1), Some(std::time::Duration::from_secs(10)));
        assert_eq!(overload_backoff(2), Some(std::time::Duration::from_secs(20)));
        assert_eq!(overload_backoff(3), None);
    }

    #[test]
    fn session_tracker_records_assistant_usage() {
        let (logger, _buf) = Logger::capturing(false);
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("pending.log");
        std::fs::write(&log_path, "").unwrap();
        let mut tracker = SessionTracker::new(dir.path().to_path_buf(), log_path, &logger);
        tracker.on_stdout_line(
            r#"{"type":"assistant","session_id":"sess-xyz","message":{"model":"claude-sonnet-4","content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":10,"output_tokens":2}}}"#,
        );
        assert_eq!(tracker.session.session_id.as_deref(), Some("sess-xyz"));
        assert_eq!(tracker.session.assistant_messages, 1);
        assert!(dir.path().join("sess-xyz.log").exists());
    }

    #[test]
    fn session_tracker_flags_overloaded_lines_without_parsing_them_as_events() {
        let (logger, _buf) = Logger::capturing(false);
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("pending.log");
        std::fs::write(&log_path, "").unwrap();
        let mut tracker = SessionTracker::new(dir.path().to_path_buf(), log_path, &logger);
        tracker.on_stdout_line(r#"{"type":"error","error":{"message":"Overloaded"}}"#);
        assert_eq!(tracker.session.overloaded_retries, 1);
        assert!(tracker.session.session_id.is_none());
    }

    #[test]
    fn build_task_prompt_includes_fork_coordinates() {
        let prompt = build_task_prompt(
            "https://github.com/acme/widgets/issues/42",
            "issue-42-aaaa1111",
            Path::new("/work"),
            Some(("me/widgets", "acme/widgets")),
        );
        assert!(prompt.contains("Fork: me/widgets"));
    }
}
