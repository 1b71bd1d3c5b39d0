use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drives an external agent CLI to resolve a GitHub-like issue into a
/// merged pull request.
#[derive(Parser, Debug)]
#[command(name = "solve", version = VERSION, about = "Resolve an issue into a merged pull request")]
pub struct Cli {
    /// Target URL: an issue or pull request on a supported hosting platform.
    pub target: String,

    /// Model id passed to the agent subprocess.
    #[arg(long)]
    pub model: Option<String>,

    /// Switch the workspace to the fork-and-PR workflow.
    #[arg(long)]
    pub fork: bool,

    /// Override the default base branch.
    #[arg(long = "base-branch")]
    pub base_branch: Option<String>,

    /// Enable automatic draft-PR creation (C4). Default on.
    #[arg(long = "auto-pull-request-creation", default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_pull_request_creation: bool,

    /// Enable `IssueAutoContinue` — pick up an existing PR for this issue
    /// authored by the current identity.
    #[arg(long = "auto-continue")]
    pub auto_continue: bool,

    /// Schedule a resume at the rate-limit reset time instead of exiting.
    #[arg(long = "auto-continue-limit")]
    pub auto_continue_limit: bool,

    /// Attach the sanitised session log to the PR on completion (C9).
    #[arg(long = "attach-logs")]
    pub attach_logs: bool,

    /// Run a permanent watch loop (C7) after the initial session.
    #[arg(long)]
    pub watch: bool,

    /// Polling interval in seconds for `--watch`.
    #[arg(long = "watch-interval", default_value_t = solve_core::config::DEFAULT_WATCH_INTERVAL_SECS)]
    pub watch_interval: u64,

    /// Iteration cap for the temporary watch entered when the agent leaves
    /// uncommitted changes behind.
    #[arg(
        long = "auto-restart-max-iterations",
        default_value_t = solve_core::config::DEFAULT_AUTO_RESTART_MAX_ITERATIONS
    )]
    pub auto_restart_max_iterations: u32,

    /// Force resume from a specific agent session id.
    #[arg(long)]
    pub resume: Option<String>,

    /// Use session resume across temporary-watch restarts.
    #[arg(long = "resume-on-auto-restart")]
    pub resume_on_auto_restart: bool,

    /// Arm the link auto-corrector (C8).
    #[arg(long = "pull-request-issue-link-auto-correction")]
    pub pull_request_issue_link_auto_correction: bool,

    /// Build the prompt and exit without invoking the agent or the
    /// provider.
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Elevated logging.
    #[arg(long)]
    pub verbose: bool,

    /// Directory the session log is written under.
    #[arg(long = "log-dir")]
    pub log_dir: Option<std::path::PathBuf>,
}

impl Cli {
    /// Mutually exclusive / nonsensical combinations are an Operator-class
    /// error, caught before anything touches the network or filesystem.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.resume.is_some() && self.auto_continue {
            anyhow::bail!("--resume and --auto-continue are mutually exclusive");
        }
        if self.resume_on_auto_restart && self.resume.is_none() && !self.auto_continue {
            anyhow::bail!("--resume-on-auto-restart requires --resume or --auto-continue");
        }
        Ok(())
    }
}
