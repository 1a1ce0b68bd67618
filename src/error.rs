//! Error taxonomy for the scheduling engine (see spec §7).
//!
//! Recoverable failures (`FilterFailure`) are caught and logged by the
//! component that can recover from them; every other variant propagates to
//! the solve entry point and becomes part of the structured result. The
//! core never panics on bad data -- only `Internal` represents a
//! programmer error.

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("input validation failed: {message}")]
    InputValidation { message: String },

    #[error("model consistency violated: {message} (entities: {entity_ids:?})")]
    ModelConsistency {
        message: String,
        entity_ids: Vec<Uuid>,
    },

    #[error("no schedulable exams remain after phantom-exam filtering")]
    NoSchedulableExams,

    #[error("lock conflict: {message}")]
    LockConflict { message: String },

    #[error("GA variable filter failed: {message}")]
    FilterFailure { message: String },

    #[error("solver timed out after {elapsed_secs:.1}s with no usable solution")]
    SolverTimeout { elapsed_secs: f64 },

    #[error("solver proved the problem infeasible")]
    SolverInfeasible,

    #[error("internal invariant violated: {message}")]
    Internal { message: String },
}

impl ScheduleError {
    /// Maps an error to the CLI exit code defined in spec §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScheduleError::SolverInfeasible => 2,
            ScheduleError::SolverTimeout { .. } => 3,
            ScheduleError::InputValidation { .. }
            | ScheduleError::ModelConsistency { .. }
            | ScheduleError::NoSchedulableExams
            | ScheduleError::LockConflict { .. } => 4,
            ScheduleError::FilterFailure { .. } | ScheduleError::Internal { .. } => 5,
        }
    }
}

pub type ScheduleResult<T> = Result<T, ScheduleError>;
