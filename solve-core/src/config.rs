//! Engine configuration: defaults, overridden by environment variables,
//! overridden again by explicit CLI flags. Mirrors the layering order of
//! the worker's own config loader, applied to the solve engine's surface.

use std::time::Duration;

pub const DEFAULT_WATCH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_AUTO_RESTART_MAX_ITERATIONS: u32 = 10;
pub const DEFAULT_AUTO_CONTINUE_LIMIT_BACKOFF: Duration = Duration::from_secs(8);

/// Runtime configuration for one `solve` invocation.
///
/// Built by `EngineConfig::from_env`, then overridden field-by-field with
/// whatever the CLI parser collected — flags always win over environment,
/// environment always wins over the built-in default.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub model: Option<String>,
    pub fork: bool,
    pub base_branch: Option<String>,
    pub auto_pull_request_creation: bool,
    pub auto_continue: bool,
    pub auto_continue_limit: bool,
    pub attach_logs: bool,
    pub watch: bool,
    pub watch_interval: Duration,
    pub auto_restart_max_iterations: u32,
    pub resume: Option<String>,
    pub resume_on_auto_restart: bool,
    pub pull_request_issue_link_auto_correction: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub log_dir: std::path::PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: None,
            fork: false,
            base_branch: None,
            auto_pull_request_creation: true,
            auto_continue: false,
            auto_continue_limit: false,
            attach_logs: false,
            watch: false,
            watch_interval: Duration::from_secs(DEFAULT_WATCH_INTERVAL_SECS),
            auto_restart_max_iterations: DEFAULT_AUTO_RESTART_MAX_ITERATIONS,
            resume: None,
            resume_on_auto_restart: false,
            pull_request_issue_link_auto_correction: false,
            dry_run: false,
            verbose: false,
            log_dir: default_log_dir(),
        }
    }
}

impl EngineConfig {
    /// Apply environment-variable overrides on top of the built-in
    /// defaults. CLI flags are layered on afterward by the binary's
    /// argument parser, which simply writes into the struct's public
    /// fields once clap has resolved them.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("SOLVE_MODEL") {
            cfg.model = Some(v);
        }
        if let Ok(v) = std::env::var("SOLVE_WATCH_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                cfg.watch_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("SOLVE_AUTO_RESTART_MAX_ITERATIONS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.auto_restart_max_iterations = n;
            }
        }
        if let Ok(v) = std::env::var("SOLVE_LOG_DIR") {
            cfg.log_dir = v.into();
        }
        if std::env::var("SOLVE_VERBOSE").is_ok() {
            cfg.verbose = true;
        }

        cfg
    }
}

fn default_log_dir() -> std::path::PathBuf {
    std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".solve")
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_auto_pr_creation() {
        let cfg = EngineConfig::default();
        assert!(cfg.auto_pull_request_creation);
        assert!(!cfg.watch);
        assert!(!cfg.dry_run);
    }

    #[test]
    fn env_override_sets_model() {
        std::env::set_var("SOLVE_MODEL", "claude-test-model");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.model.as_deref(), Some("claude-test-model"));
        std::env::remove_var("SOLVE_MODEL");
    }

    #[test]
    fn env_override_sets_watch_interval() {
        std::env::set_var("SOLVE_WATCH_INTERVAL", "45");
        let cfg = EngineConfig::from_env();
        assert_eq!(cfg.watch_interval, Duration::from_secs(45));
        std::env::remove_var("SOLVE_WATCH_INTERVAL");
    }
}
