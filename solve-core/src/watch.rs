//! Watch loop (C7): single-threaded cooperative polling of PR state that
//! triggers repeat agent sessions and enforces a bounded auto-restart.

use std::time::Duration;

use crate::feedback::FeedbackSnapshot;

pub const DEFAULT_TEMPORARY_WATCH_CEILING: u32 = 3;

/// Whether this is an ordinary (operator-requested `--watch`) loop or a
/// temporary one entered automatically because the agent left uncommitted
/// changes behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    Ordinary,
    Temporary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Polling,
    Running,
}

/// The decision made at the end of a `Polling` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    StopMerged,
    StopCommitted,
    StopMaxIterations,
    /// Ordinary watch only: no new feedback this tick. Not terminal — the
    /// caller sleeps `interval` and polls again.
    Idle,
    Run,
}

/// One tick's inputs: what the platform and workspace report right now.
pub struct TickInputs<'a> {
    pub merged: bool,
    pub feedback: &'a FeedbackSnapshot,
    pub iteration: u32,
    pub ceiling: u32,
    pub is_first_temporary_tick: bool,
}

/// Pure decision function for the `Polling` state, given `kind` and the
/// platform/workspace observations for this tick.
pub fn decide(kind: WatchKind, inputs: &TickInputs<'_>) -> Decision {
    if inputs.merged {
        return Decision::StopMerged;
    }
    match kind {
        WatchKind::Temporary => {
            if inputs.feedback.uncommitted_changes.is_empty() {
                return Decision::StopCommitted;
            }
            if inputs.iteration >= inputs.ceiling {
                return Decision::StopMaxIterations;
            }
            if inputs.is_first_temporary_tick || !inputs.feedback.is_empty() {
                Decision::Run
            } else {
                Decision::StopCommitted
            }
        }
        WatchKind::Ordinary => {
            if inputs.feedback.is_empty() {
                // No new feedback: stay idle, sleep, and poll again later —
                // the caller loops back to Polling rather than stopping.
                Decision::Idle
            } else {
                Decision::Run
            }
        }
    }
}

/// Tracks the state machine across ticks for one watch loop instance.
pub struct WatchLoop {
    pub kind: WatchKind,
    pub phase: Phase,
    pub iteration: u32,
    pub ceiling: u32,
    pub interval: Duration,
    pub restart_count: u32,
    pub previous_session_id: Option<String>,
}

impl WatchLoop {
    pub fn ordinary(interval: Duration) -> Self {
        Self {
            kind: WatchKind::Ordinary,
            phase: Phase::Idle,
            iteration: 0,
            ceiling: u32::MAX,
            interval,
            restart_count: 0,
            previous_session_id: None,
        }
    }

    pub fn temporary(ceiling: u32) -> Self {
        Self {
            kind: WatchKind::Temporary,
            phase: Phase::Idle,
            iteration: 0,
            ceiling,
            interval: Duration::ZERO,
            restart_count: 0,
            previous_session_id: None,
        }
    }

    /// Advance `Idle → Polling`, evaluate the decision, and advance to
    /// `Running` if the tick decided to run. Returns the decision so the
    /// caller can act on `Stop*` variants or spawn an agent session for
    /// `Run`.
    pub fn tick(&mut self, merged: bool, feedback: &FeedbackSnapshot) -> Decision {
        self.phase = Phase::Polling;
        let inputs = TickInputs {
            merged,
            feedback,
            iteration: self.iteration,
            ceiling: self.ceiling,
            is_first_temporary_tick: self.kind == WatchKind::Temporary && self.iteration == 0,
        };
        let decision = decide(self.kind, &inputs);
        match decision {
            Decision::Run => {
                self.phase = Phase::Running;
                self.iteration += 1;
            }
            Decision::Idle => self.phase = Phase::Idle,
            Decision::StopMerged | Decision::StopCommitted | Decision::StopMaxIterations => {}
        }
        decision
    }

    /// Called when the agent session for this tick has ended. Records the
    /// session id for resume, returns to `Idle`, and reports how long the
    /// caller should sleep before the next tick (zero in temporary watch).
    pub fn finish_run(&mut self, session_id: Option<String>) -> Duration {
        self.phase = Phase::Idle;
        if session_id.is_some() {
            self.previous_session_id = session_id;
        }
        match self.kind {
            WatchKind::Ordinary => self.interval,
            WatchKind::Temporary => Duration::ZERO,
        }
    }

    pub fn record_restart(&mut self) {
        self.restart_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn empty_snapshot() -> FeedbackSnapshot {
        FeedbackSnapshot {
            new_pr_comments: vec![],
            new_issue_comments: vec![],
            merge_state: crate::provider::MergeState::Clean,
            uncommitted_changes: vec![],
            work_start_time: Utc::now(),
        }
    }

    fn dirty_snapshot() -> FeedbackSnapshot {
        let mut s = empty_snapshot();
        s.uncommitted_changes = vec!["M src/lib.rs".to_string()];
        s
    }

    #[test]
    fn merged_pr_stops_regardless_of_kind() {
        let snap = empty_snapshot();
        let inputs = TickInputs {
            merged: true,
            feedback: &snap,
            iteration: 0,
            ceiling: 3,
            is_first_temporary_tick: false,
        };
        assert_eq!(decide(WatchKind::Ordinary, &inputs), Decision::StopMerged);
        assert_eq!(decide(WatchKind::Temporary, &inputs), Decision::StopMerged);
    }

    #[test]
    fn temporary_watch_stops_when_tree_becomes_clean() {
        let snap = empty_snapshot();
        let inputs = TickInputs {
            merged: false,
            feedback: &snap,
            iteration: 1,
            ceiling: 3,
            is_first_temporary_tick: false,
        };
        assert_eq!(decide(WatchKind::Temporary, &inputs), Decision::StopCommitted);
    }

    #[test]
    fn temporary_watch_stops_at_max_iterations_with_residual_dirty_tree() {
        let snap = dirty_snapshot();
        let inputs = TickInputs {
            merged: false,
            feedback: &snap,
            iteration: 3,
            ceiling: 3,
            is_first_temporary_tick: false,
        };
        assert_eq!(decide(WatchKind::Temporary, &inputs), Decision::StopMaxIterations);
    }

    #[test]
    fn temporary_watch_always_runs_its_first_tick() {
        let snap = empty_snapshot();
        let inputs = TickInputs {
            merged: false,
            feedback: &snap,
            iteration: 0,
            ceiling: 3,
            is_first_temporary_tick: true,
        };
        assert_eq!(decide(WatchKind::Temporary, &inputs), Decision::Run);
    }

    #[test]
    fn ordinary_watch_runs_only_on_nonempty_feedback() {
        let empty = empty_snapshot();
        let dirty = dirty_snapshot();
        let empty_inputs = TickInputs {
            merged: false,
            feedback: &empty,
            iteration: 0,
            ceiling: u32::MAX,
            is_first_temporary_tick: false,
        };
        let dirty_inputs = TickInputs {
            merged: false,
            feedback: &dirty,
            iteration: 0,
            ceiling: u32::MAX,
            is_first_temporary_tick: false,
        };
        assert_eq!(decide(WatchKind::Ordinary, &empty_inputs), Decision::Idle);
        assert_eq!(decide(WatchKind::Ordinary, &dirty_inputs), Decision::Run);
    }

    #[test]
    fn finish_run_skips_sleep_in_temporary_watch() {
        let mut wl = WatchLoop::temporary(3);
        assert_eq!(wl.finish_run(Some("sess-1".to_string())), Duration::ZERO);
        assert_eq!(wl.previous_session_id.as_deref(), Some("sess-1"));
    }

    #[test]
    fn finish_run_sleeps_the_interval_in_ordinary_watch() {
        let mut wl = WatchLoop::ordinary(Duration::from_secs(60));
        assert_eq!(wl.finish_run(None), Duration::from_secs(60));
    }
}
