//! Crate-level error types.
//!
//! Each subsystem owns a [`thiserror`]-derived error enum scoped to its
//! own failure modes; [`AgenticError`] composes them via `#[from]` so the
//! public entry points (`plan`, `plan_for_type`, `execute`) return a single
//! `Result` type. The classifier has no failure mode and does not appear
//! here (see [`crate::classifier`]).

use thiserror::Error;

use crate::config::ConfigError;
use crate::executor::ExecutorError;
use crate::planner::PlannerError;

/// Crate-level error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgenticError {
    #[error("planner error: {0}")]
    Planner(#[from] PlannerError),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AgenticResult<T> = Result<T, AgenticError>;
