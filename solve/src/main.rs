use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;

use solve_core::agent::pricing::PricingTable;
use solve_core::agent::{self, AgentSession, Prompt, SessionTracker};
use solve_core::config::EngineConfig;
use solve_core::error::{EngineError, ErrorClass};
use solve_core::log::Logger;
use solve_core::provider::github::GitHubGateway;
use solve_core::provider::sourcecraft::SourcecraftGateway;
use solve_core::provider::{CommentTarget, ProviderGateway, PullRequest};
use solve_core::url::{self, Provider, RunMode, TargetUrl, UrlKind};
use solve_core::workspace::{self, Workspace};
use solve_core::{bootstrap, feedback, linker, summary};

mod cli;
use cli::Cli;

fn main() {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.class.exit_code());
        }
    }
}

/// Build the merged configuration, then drive the full lifecycle. Returns
/// the process exit code on success; any fatal path is reported through
/// `EngineError` so `main` can map it to the mandated exit code.
fn run(cli: Cli) -> Result<i32, EngineError> {
    cli.validate().map_err(EngineError::operator)?;

    let mut config = EngineConfig::from_env();
    apply_cli_overrides(&mut config, &cli);
    let log = Logger::new(config.verbose);

    let target = url::parse_url(&cli.target).map_err(EngineError::operator)?;
    if !target.is_solvable() {
        return Err(EngineError::operator(anyhow::anyhow!(
            "{} is not an issue or pull request — nothing to solve",
            target.normalized
        )));
    }

    let owner = target.owner.clone();
    let repo = target
        .repo
        .clone()
        .context("target must include a repository")
        .map_err(EngineError::operator)?;
    let number = target
        .number
        .context("target must resolve to a numeric issue or PR id")
        .map_err(EngineError::operator)?;

    if config.dry_run {
        return run_dry(&config, &log, &target, &owner, number);
    }

    let gateway: Box<dyn ProviderGateway> = match target.provider {
        Provider::GitHub => Box::new(GitHubGateway::new()),
        Provider::Sourcecraft => Box::new(SourcecraftGateway::new()),
    };
    gateway
        .check_authentication()
        .map_err(EngineError::environmental)?;

    let mode = resolve_run_mode(gateway.as_ref(), &target, &owner, &repo, number, &config)
        .map_err(EngineError::environmental)?;

    solve(gateway.as_ref(), &config, &log, &target, &owner, &repo, number, mode)
}

fn apply_cli_overrides(config: &mut EngineConfig, cli: &Cli) {
    if cli.model.is_some() {
        config.model = cli.model.clone();
    }
    config.fork = config.fork || cli.fork;
    if cli.base_branch.is_some() {
        config.base_branch = cli.base_branch.clone();
    }
    config.auto_pull_request_creation = cli.auto_pull_request_creation;
    config.auto_continue = config.auto_continue || cli.auto_continue;
    config.auto_continue_limit = config.auto_continue_limit || cli.auto_continue_limit;
    config.attach_logs = config.attach_logs || cli.attach_logs;
    config.watch = config.watch || cli.watch;
    config.watch_interval = std::time::Duration::from_secs(cli.watch_interval);
    config.auto_restart_max_iterations = cli.auto_restart_max_iterations;
    if cli.resume.is_some() {
        config.resume = cli.resume.clone();
    }
    config.resume_on_auto_restart = config.resume_on_auto_restart || cli.resume_on_auto_restart;
    config.pull_request_issue_link_auto_correction =
        config.pull_request_issue_link_auto_correction || cli.pull_request_issue_link_auto_correction;
    config.dry_run = config.dry_run || cli.dry_run;
    config.verbose = config.verbose || cli.verbose;
    if let Some(dir) = &cli.log_dir {
        config.log_dir = dir.clone();
    }
}

/// Work out which PR (if any) already services this issue, or which issue a
/// PR closes.
///
/// `find_pr_for_branch` only matches an exact branch name, and branch names
/// carry a random suffix by policy (see `naming::issue_branch_name`), so an
/// issue target can never be rediscovered from the issue number alone.
/// `--auto-continue` against an issue URL therefore still starts a fresh
/// branch here; picking up a prior run needs the PR URL directly (`--resume`
/// supplies the agent session id, not the branch).
fn resolve_run_mode(
    gateway: &dyn ProviderGateway,
    target: &TargetUrl,
    owner: &str,
    repo: &str,
    number: u64,
    _config: &EngineConfig,
) -> Result<RunMode> {
    match target.kind {
        UrlKind::Issue => Ok(RunMode::IssueStart),
        UrlKind::Pull => {
            let pr = gateway.get_pull_request(owner, repo, number)?;
            Ok(RunMode::PrContinue {
                issue_number: extract_issue_number(&pr.body),
            })
        }
        _ => unreachable!("is_solvable() already filtered to Issue | Pull"),
    }
}

/// Pull the issue number out of a PR body's closing-keyword reference, if
/// one is present. Best-effort: an absent or unrecognised reference just
/// means the link auto-corrector (C8) has nothing to compare against yet.
fn extract_issue_number(body: &str) -> Option<u64> {
    body.split(['#']).nth(1).and_then(|rest| {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    })
}

fn run_dry(config: &EngineConfig, log: &Logger, target: &TargetUrl, owner: &str, number: u64) -> Result<i32, EngineError> {
    log.info(format!("dry run: {}", target.normalized));
    let branch = solve_core::naming::issue_branch_name(number);
    let reference = format!("#{number}");
    let system = agent::build_system_prompt(&reference);
    let task = agent::build_task_prompt(
        &target.normalized,
        &branch,
        std::path::Path::new("."),
        if config.fork { Some(("<fork>", owner)) } else { None },
    );
    println!("--- system prompt ---\n{system}\n--- task prompt ---\n{task}");
    Ok(0)
}

/// Drive one full issue-to-merged-PR run: workspace setup (C3), bootstrap
/// (C4) when starting fresh, the agent session (C5), feedback capture (C6),
/// the watch loop (C7) when armed, link auto-correction (C8), and the final
/// summary (C9).
#[allow(clippy::too_many_arguments)]
fn solve(
    gateway: &dyn ProviderGateway,
    config: &EngineConfig,
    log: &Logger,
    target: &TargetUrl,
    owner: &str,
    repo: &str,
    number: u64,
    mode: RunMode,
) -> Result<i32, EngineError> {
    let issue_number = match &mode {
        RunMode::IssueStart | RunMode::IssueAutoContinue { .. } => Some(number),
        RunMode::PrContinue { issue_number } => *issue_number,
    };

    let temp_dir = Workspace::setup_temp_dir(config.resume.as_deref()).map_err(EngineError::environmental)?;
    let pr_head_owner = match &mode {
        RunMode::PrContinue { .. } => Some(owner),
        _ => None,
    };
    let (repo_to_clone, upstream, pr_fork_remote) =
        Workspace::setup_repository(gateway, owner, repo, config.fork, pr_head_owner)
            .map_err(EngineError::environmental)?;

    let clone_cmd = match target.provider {
        Provider::GitHub => "gh",
        Provider::Sourcecraft => "sc",
    };
    Workspace::clone(&repo_to_clone, &temp_dir, clone_cmd).map_err(EngineError::environmental)?;

    let resolved_base_branch = match &config.base_branch {
        Some(b) => b.clone(),
        None => Workspace::detect_default_branch(&temp_dir).map_err(EngineError::environmental)?,
    };
    let default_branch = if let Some(upstream_repo) = &upstream {
        let (up_owner, up_repo) = upstream_repo.split_once('/').unwrap_or((owner, repo));
        let upstream_clone_url = gateway
            .get_clone_url(up_owner, up_repo, false)
            .map_err(EngineError::environmental)?;
        Workspace::sync_upstream(&temp_dir, &upstream_clone_url, &resolved_base_branch)
            .map_err(EngineError::environmental)?;
        resolved_base_branch
    } else {
        resolved_base_branch
    };
    Workspace::verify_clean_tree(&temp_dir).map_err(EngineError::environmental)?;

    let existing_branch = match &mode {
        RunMode::IssueStart => None,
        RunMode::IssueAutoContinue { pr_number } => Some(
            gateway
                .get_pull_request(owner, repo, *pr_number)
                .map_err(EngineError::environmental)?
                .branch,
        ),
        RunMode::PrContinue { .. } => Some(
            gateway
                .get_pull_request(owner, repo, number)
                .map_err(EngineError::environmental)?
                .branch,
        ),
    };
    let cross_fork_url = match &pr_fork_remote {
        Some(remote_repo) => {
            let (remote_owner, remote_repo_name) = remote_repo.split_once('/').unwrap_or((owner, repo));
            Some(
                gateway
                    .get_clone_url(remote_owner, remote_repo_name, false)
                    .map_err(EngineError::environmental)?,
            )
        }
        None => None,
    };
    let cross_fork_remote = cross_fork_url.as_deref().map(|url| (workspace::PR_FORK_REMOTE, url));
    let branch = Workspace::checkout_or_create_branch(
        &temp_dir,
        &mode,
        issue_number,
        existing_branch.as_deref(),
        cross_fork_remote,
    )
    .map_err(EngineError::environmental)?;

    let pr = match &mode {
        RunMode::IssueStart if config.auto_pull_request_creation => {
            let issue_number = issue_number.expect("IssueStart always carries an issue number");
            let issue = gateway
                .get_issue(owner, repo, issue_number)
                .map_err(EngineError::environmental)?;
            let fork = pr_fork_remote.as_deref().map(|r| (r, owner));
            let contents = bootstrap::agent_md_contents(&issue.url, &branch, &temp_dir, fork);
            bootstrap::commit_agent_md(&temp_dir, issue_number, &contents).map_err(EngineError::environmental)?;
            bootstrap::push_branch(&temp_dir, "origin", &branch, config.fork).map_err(EngineError::environmental)?;
            bootstrap::wait_for_branch_visible(gateway, owner, repo, &branch, log)
                .map_err(EngineError::environmental)?;

            let fork_head_owner = if config.fork {
                repo_to_clone.split_once('/').map(|(o, _)| o)
            } else {
                None
            };
            let (title, body) = bootstrap::compose_pr(
                bootstrap::issue_title(&issue),
                issue_number,
                owner,
                repo,
                fork_head_owner,
            );
            let head_ref = match fork_head_owner {
                Some(fork_owner) => format!("{fork_owner}:{branch}"),
                None => branch.clone(),
            };
            let created = bootstrap::create_draft_pr(gateway, owner, repo, &head_ref, &default_branch, &title, &body)
                .map_err(EngineError::environmental)?;
            bootstrap::verify_server_side_link(gateway, owner, repo, created.number, issue_number, &body, log)
                .map_err(EngineError::environmental)?;
            Some(created)
        }
        RunMode::IssueAutoContinue { pr_number } => {
            Some(gateway.get_pull_request(owner, repo, *pr_number).map_err(EngineError::environmental)?)
        }
        RunMode::PrContinue { .. } => Some(gateway.get_pull_request(owner, repo, number).map_err(EngineError::environmental)?),
        RunMode::IssueStart => None,
    };

    std::fs::create_dir_all(&config.log_dir).map_err(|e| EngineError::environmental(e.into())).ok();
    let pending_log = config.log_dir.join("pending.log");
    std::fs::write(&pending_log, "").map_err(|e| EngineError::environmental(e.into())).ok();

    let linking_reference = issue_number
        .map(|n| format!("#{n}"))
        .unwrap_or_else(|| "the linked issue".to_string());
    let system_prompt = agent::build_system_prompt(&linking_reference);
    let fork = pr_fork_remote.as_deref().map(|r| (r, owner));
    let task_prompt = match &mode {
        RunMode::IssueStart => {
            let issue = gateway
                .get_issue(owner, repo, issue_number.unwrap())
                .map_err(EngineError::environmental)?;
            agent::build_task_prompt(&issue.url, &branch, &temp_dir, fork)
        }
        _ => agent::build_resume_prompt("Continue the existing pull request; see platform feedback below."),
    };
    let prompt = Prompt {
        system: system_prompt,
        task: task_prompt,
    };

    let pricing = PricingTable::builtin();
    let target_comment = comment_target(pr.as_ref(), issue_number);
    let mut session = run_agent_once(
        gateway,
        owner,
        repo,
        target_comment,
        &config.model,
        &prompt,
        config.resume.as_deref(),
        &temp_dir,
        &config.log_dir,
        &pending_log,
        log,
    )?;

    if session.limit_reached {
        session = resolve_usage_limit(gateway, owner, repo, target_comment, config, log, &temp_dir, &config.log_dir, session)?;
    }

    if config.watch || (!session.limit_reached && session_left_dirty_tree(&temp_dir)) {
        session = run_watch_loop(
            gateway,
            config,
            log,
            owner,
            repo,
            &mode,
            pr.as_ref(),
            issue_number,
            &temp_dir,
            &config.log_dir,
            &pricing,
            session,
        )?;
    }

    if session.limit_reached {
        log.info(format!(
            "usage limit reached; resume later with: solve --resume {} {}",
            session.session_id.as_deref().unwrap_or("<session id>"),
            target.normalized
        ));
        return Ok(0);
    }

    let pr_found = pr.is_some();
    let summary = summary::compose_summary(&session, &pricing, pr_found);
    log.info(summary.to_string());

    if let Some(pr) = &pr {
        if config.pull_request_issue_link_auto_correction {
            if let Some(issue_number) = issue_number {
                let (_, result) = linker::tick(gateway, owner, repo, pr.number, &None, issue_number, owner, repo)
                    .map_err(EngineError::environmental)?;
                if matches!(result, linker::TickResult::Corrected { .. }) {
                    log.info("link auto-corrector restored the issue reference");
                }
            }
        }
        if config.attach_logs {
            let raw_log = std::fs::read_to_string(&pending_log).unwrap_or_default();
            match summary::attach_log(gateway, &raw_log, &[], session.session_id.as_deref()) {
                Ok(attachment) => {
                    let body = summary::failure_comment("Session log", &attachment);
                    match gateway.add_comment(owner, repo, CommentTarget::Pr, pr.number, &body) {
                        Ok(()) => log.info("session log attached to PR"),
                        Err(e) => log.warn(format!("failed to attach session log: {e:#}")),
                    }
                }
                Err(e) => log.warn(format!("failed to prepare session log attachment: {e:#}")),
            }
        }
        summary::remove_agent_md(&temp_dir, !session.limit_reached).map_err(EngineError::environmental)?;
    }

    Ok(0)
}

/// Where to post a comment about this run's progress: the PR if one
/// exists, otherwise the originating issue.
fn comment_target(pr: Option<&PullRequest>, issue_number: Option<u64>) -> Option<(CommentTarget, u64)> {
    match (pr, issue_number) {
        (Some(pr), _) => Some((CommentTarget::Pr, pr.number)),
        (None, Some(n)) => Some((CommentTarget::Issue, n)),
        (None, None) => None,
    }
}

/// Sleep until `limit_reset_at` and run one more agent session picking up
/// where the last one left off, if `--auto-continue-limit` asked for it.
#[allow(clippy::too_many_arguments)]
fn resolve_usage_limit(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    comment_target: Option<(CommentTarget, u64)>,
    config: &EngineConfig,
    log: &Logger,
    working_dir: &std::path::Path,
    log_dir: &std::path::Path,
    session: AgentSession,
) -> Result<AgentSession, EngineError> {
    if !config.auto_continue_limit {
        return Ok(session);
    }
    let Some(reset_at) = session.limit_reset_at else {
        log.warn("usage limit reached but no reset time reported; cannot auto-continue");
        return Ok(session);
    };
    let wait = (reset_at - Utc::now()).to_std().unwrap_or(std::time::Duration::ZERO);
    log.info(format!("usage limit reached; sleeping {wait:?} until reset at {reset_at}"));
    std::thread::sleep(wait);

    let prompt = Prompt {
        system: agent::build_system_prompt("the linked issue"),
        task: agent::build_resume_prompt("Rate limit reset; continue where you left off."),
    };
    let pending_log = log_dir.join("pending.log");
    std::fs::write(&pending_log, "").ok();
    run_agent_once(
        gateway,
        owner,
        repo,
        comment_target,
        &config.model,
        &prompt,
        session.session_id.as_deref(),
        working_dir,
        log_dir,
        &pending_log,
        log,
    )
}

#[allow(clippy::too_many_arguments)]
fn run_agent_once(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    comment_target: Option<(CommentTarget, u64)>,
    model: &Option<String>,
    prompt: &Prompt,
    resume: Option<&str>,
    working_dir: &std::path::Path,
    log_dir: &std::path::Path,
    log_path: &std::path::Path,
    log: &Logger,
) -> Result<AgentSession, EngineError> {
    let tracker = SessionTracker::new(log_dir.to_path_buf(), log_path.to_path_buf(), log);
    let (outcome, session) = agent::run_session(
        agent::DEFAULT_AGENT_BIN,
        model.as_deref(),
        prompt,
        resume,
        working_dir,
        log_path,
        tracker,
    )
    .map_err(EngineError::environmental)?;

    if !outcome.success() && !session.limit_reached {
        let reason = format!("agent session exited with {:?}", outcome.code());
        log.warn(&reason);
        if let Some((target, number)) = comment_target {
            let raw_log = std::fs::read_to_string(log_path).unwrap_or_default();
            if let Err(e) = post_failure_comment(gateway, owner, repo, target, number, &reason, &raw_log, session.session_id.as_deref()) {
                log.warn(format!("failed to post failure comment: {e:#}"));
            }
        }
        return Err(EngineError::new(ErrorClass::Unexpected, anyhow::anyhow!(reason)));
    }
    Ok(session)
}

/// Attach the (sanitised) session log to a failure comment and post it.
#[allow(clippy::too_many_arguments)]
fn post_failure_comment(
    gateway: &dyn ProviderGateway,
    owner: &str,
    repo: &str,
    target: CommentTarget,
    number: u64,
    reason: &str,
    raw_log: &str,
    session_id: Option<&str>,
) -> Result<()> {
    let attachment = summary::attach_log(gateway, raw_log, &[], session_id)?;
    let body = summary::failure_comment(reason, &attachment);
    gateway.add_comment(owner, repo, target, number, &body)
}

/// Loop through C7 until the watch state machine decides to stop, spawning
/// one agent session per `Run` tick.
#[allow(clippy::too_many_arguments)]
fn run_watch_loop(
    gateway: &dyn ProviderGateway,
    config: &EngineConfig,
    log: &Logger,
    owner: &str,
    repo: &str,
    mode: &RunMode,
    pr: Option<&PullRequest>,
    issue_number: Option<u64>,
    temp_dir: &std::path::Path,
    log_dir: &std::path::Path,
    pricing: &PricingTable,
    mut session: AgentSession,
) -> Result<AgentSession, EngineError> {
    use solve_core::watch::{Decision, WatchLoop};

    let mut watch_loop = if config.watch {
        WatchLoop::ordinary(config.watch_interval)
    } else {
        WatchLoop::temporary(config.auto_restart_max_iterations)
    };

    let Some(pr) = pr else {
        return Ok(session);
    };

    loop {
        let issue = match issue_number {
            Some(n) => gateway.get_issue(owner, repo, n).map_err(EngineError::environmental)?,
            None => solve_core::provider::Issue {
                number: pr.number,
                url: String::new(),
                title: String::new(),
                body: String::new(),
                updated_at: Utc::now(),
                comments: vec![],
            },
        };
        let reference = feedback::reference_timestamp(&issue, pr, &[]);
        let pr_now = gateway.get_pull_request(owner, repo, pr.number).map_err(EngineError::environmental)?;
        let snapshot = feedback::capture(gateway, owner, repo, &issue, &pr_now, reference, temp_dir)
            .map_err(EngineError::environmental)?;

        let merged = matches!(pr_now.state, solve_core::provider::PrState::Merged);
        let decision = watch_loop.tick(merged, &snapshot);
        match decision {
            Decision::StopMerged | Decision::StopCommitted | Decision::StopMaxIterations => {
                log.debug(format!("watch loop stopping: {decision:?}"));
                return Ok(session);
            }
            Decision::Idle => {
                log.debug(format!("watch loop idle, polling again in {:?}", watch_loop.interval));
                std::thread::sleep(watch_loop.interval);
            }
            Decision::Run => {
                let now = Utc::now();
                feedback::post_work_session_started(gateway, owner, repo, pr.number, now).ok();
                let prompt = Prompt {
                    system: agent::build_system_prompt(&format!("#{}", pr.number)),
                    task: agent::build_resume_prompt("New platform feedback arrived; address it."),
                };
                let pending_log = log_dir.join("pending.log");
                std::fs::write(&pending_log, "").ok();
                session = run_agent_once(
                    gateway,
                    owner,
                    repo,
                    Some((CommentTarget::Pr, pr.number)),
                    &config.model,
                    &prompt,
                    watch_loop.previous_session_id.as_deref().filter(|_| config.resume_on_auto_restart),
                    temp_dir,
                    log_dir,
                    &pending_log,
                    log,
                )?;
                feedback::post_work_session_completed(gateway, owner, repo, pr.number, Utc::now()).ok();
                let sleep_for = watch_loop.finish_run(session.session_id.clone());
                let (cost, _) = session.cost_usd(pricing);
                log.debug(format!("watch iteration cost so far: ${cost:.4}"));
                if session.limit_reached {
                    return Ok(session);
                }
                if matches!(mode, RunMode::IssueStart | RunMode::IssueAutoContinue { .. }) && !config.watch {
                    watch_loop.record_restart();
                }
                if config.watch && !sleep_for.is_zero() {
                    std::thread::sleep(sleep_for);
                }
            }
        }
    }
}

fn session_left_dirty_tree(workspace_dir: &std::path::Path) -> bool {
    feedback::uncommitted_changes(workspace_dir)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}
