//! Core library for the solve engine.
//!
//! Domain model:
//!   - `url`        — `TargetUrl` parsing and `RunMode` resolution
//!   - `provider`    — trait boundary over the code-hosting platform (C1)
//!   - `subprocess`  — child-process spawn/stream/cancel contract (C2)
//!   - `sanitize`    — credential-masking pure functions
//!   - `naming`      — branch-name generation
//!   - `workspace`   — temp-dir/clone/fork/branch lifecycle (C3)
//!   - `bootstrap`   — initial commit + draft PR creation (C4)
//!   - `agent`       — agent subprocess driver, event parsing, pricing (C5)
//!   - `feedback`    — reference-timestamp feedback detection (C6)
//!   - `watch`       — watch-loop state machine (C7)
//!   - `linker`      — link auto-correction monitor (C8)
//!   - `summary`     — result verification and session summary (C9)
//!   - `config`      — `EngineConfig` value object, env/flag layering
//!   - `error`       — `ErrorClass` taxonomy for exit-code mapping
//!   - `log`         — injected logger context

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod feedback;
pub mod linker;
pub mod log;
pub mod naming;
pub mod provider;
pub mod sanitize;
pub mod subprocess;
pub mod summary;
pub mod url;
pub mod watch;
pub mod workspace;
