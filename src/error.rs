//! Crate-wide error types.
//!
//! Everything here is a hard stop: malformed trace data or a broken composition. Missing
//! data that a report should simply show as absent goes through [`crate::Failable`].

use thiserror::Error;

use crate::{HeapId, StageId};

pub type GcJoinResult<T> = Result<T, GcJoinError>;

#[derive(Debug, Error)]
pub enum GcJoinError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid join id {0}")]
    InvalidStage(i32),

    #[error("invalid join type {0}")]
    InvalidJoinType(i32),

    #[error("invalid join time {0}")]
    InvalidJoinTime(i32),

    #[error("unbalanced join events on heap {heap} at event {index}: {message}")]
    Unbalanced {
        heap: HeapId,
        index: usize,
        message: String,
    },

    #[error("join end for {found:?} does not match start of {expected:?} on heap {heap}")]
    StageMismatch {
        heap: HeapId,
        expected: StageId,
        found: StageId,
    },

    #[error("stage {stage:?} on heap {heap} never ended before the trace did")]
    Truncated { heap: HeapId, stage: StageId },

    #[error("clock mismatch on heap {heap} {stage:?}: abs {absolute_ms}ms, rel {relative_ms}ms")]
    ClockMismatch {
        stage: StageId,
        heap: HeapId,
        absolute_ms: f64,
        relative_ms: f64,
    },

    #[error("heap {0} has more than one event history")]
    DuplicateHeap(HeapId),

    #[error("duplicate {kind} name {name:?}")]
    DuplicateName { kind: &'static str, name: String },

    #[error("unknown metric {0:?}")]
    UnknownMetric(String),

    #[error("stage {stage:?} listed under both {first:?} and {second:?}")]
    PhaseTable {
        stage: StageId,
        first: crate::PhaseId,
        second: crate::PhaseId,
    },
}
