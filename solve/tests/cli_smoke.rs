//! Binary smoke tests for the `solve` CLI.
//!
//! These run the actual compiled binary so a broken flag, a broken
//! `--dry-run` path, or a validation regression shows up the same way it
//! would for a user running the command directly.

use assert_cmd::Command;
use predicates::prelude::*;

#[allow(deprecated)] // cargo_bin works fine for our use case
fn solve() -> Command {
    Command::cargo_bin("solve").unwrap()
}

// ── Binary builds and runs ──────────────────────────────────────────────────

#[test]
fn binary_exists() {
    solve();
}

// ── Help / version ──────────────────────────────────────────────────────────

#[test]
fn help_flag() {
    solve()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolve an issue into a merged pull request"));
}

#[test]
fn version_flag() {
    solve().arg("--version").assert().success().stdout(predicate::str::starts_with("solve "));
}

#[test]
fn missing_target_fails() {
    solve().assert().failure();
}

// ── URL parsing ──────────────────────────────────────────────────────────────

#[test]
fn unparseable_target_is_an_operator_error() {
    solve()
        .arg("not a url")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("whitespace"));
}

#[test]
fn non_issue_non_pull_target_is_rejected() {
    solve()
        .arg("https://github.com/acme/widgets")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not an issue or pull request"));
}

// ── Flag validation (Operator-class, caught before any network/fs work) ────

#[test]
fn resume_and_auto_continue_are_mutually_exclusive() {
    solve()
        .args([
            "https://github.com/acme/widgets/pull/57",
            "--resume",
            "sess-1",
            "--auto-continue",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn resume_on_auto_restart_requires_resume_or_auto_continue() {
    solve()
        .args([
            "https://github.com/acme/widgets/issues/42",
            "--resume-on-auto-restart",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("requires --resume or --auto-continue"));
}

// ── --dry-run ───────────────────────────────────────────────────────────────
//
// Dry runs never touch a provider gateway, so these need no `gh`/`sc`
// installed or authenticated.

#[test]
fn dry_run_prints_prompt_without_provider_access() {
    solve()
        .args(["https://github.com/acme/widgets/issues/42", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("system prompt"))
        .stdout(predicate::str::contains("Issue: https://github.com/acme/widgets/issues/42"));
}

#[test]
fn dry_run_includes_fork_coordinates_when_forking() {
    solve()
        .args([
            "https://github.com/acme/widgets/issues/42",
            "--dry-run",
            "--fork",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fork:"));
}

#[test]
fn dry_run_on_pull_request_target_still_builds_a_prompt() {
    solve()
        .args(["https://github.com/acme/widgets/pull/57", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("task prompt"));
}
