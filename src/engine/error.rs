use thiserror::Error;

use crate::model::{AssignmentId, AssignmentStatus, ReservationId, TableId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("table {table_id} not available in the selected window (held by assignment {assignment_id})")]
    SchedulingConflict {
        table_id: TableId,
        assignment_id: AssignmentId,
    },

    #[error("assignment {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: AssignmentId,
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    #[error("assignment not found: {0}")]
    AssignmentNotFound(AssignmentId),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("assignment store error: {0}")]
    Infrastructure(String),
}

impl EngineError {
    /// Caller-side mistakes (4xx class). Everything else is infrastructure.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            EngineError::Infrastructure(_) | EngineError::InvalidTransition { .. }
        )
    }
}
