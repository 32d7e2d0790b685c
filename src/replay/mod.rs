//! Differential replay: re-issue captured traffic against two environments
//! and compare the responses

mod diff;
mod engine;
mod report;

pub use diff::{diff, has_changes, normalize, parse_body, DiffKind, DiffSegment};
pub use engine::{ReplayEngine, ReplayEvent, ReplayResult, RunSummary};
pub use report::Reporter;

/// User-agent announced by replayed requests
pub const REPLAY_USER_AGENT: &str = "retrace-replayer/0.1";
