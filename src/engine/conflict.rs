use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// First active assignment whose window overlaps `window`, skipping `exclude`.
/// Finished and cancelled assignments never conflict.
pub fn find_conflict(ts: &TableState, window: &Span, exclude: Option<AssignmentId>) -> Option<AssignmentId> {
    ts.overlapping(window)
        .filter(|a| a.is_active() && Some(a.id) != exclude)
        .map(|a| a.id)
        .next()
}

pub(super) fn check_no_conflict(ts: &TableState, window: &Span) -> Result<(), EngineError> {
    match find_conflict(ts, window, None) {
        Some(assignment_id) => {
            metrics::counter!(observability::SCHEDULING_CONFLICTS_TOTAL).increment(1);
            Err(EngineError::SchedulingConflict {
                table_id: ts.table_id,
                assignment_id,
            })
        }
        None => Ok(()),
    }
}

pub(super) fn check_transition(a: &Assignment, to: AssignmentStatus) -> Result<(), EngineError> {
    if a.status.can_transition_to(to) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition {
            id: a.id,
            from: a.status,
            to,
        })
    }
}

pub(super) fn validate_window(window: &Span) -> Result<(), EngineError> {
    if window.start >= window.end {
        return Err(EngineError::InvalidInput(format!(
            "window [{}, {}) is empty",
            window.start, window.end
        )));
    }
    Ok(())
}

impl Engine {
    /// Whether any active assignment on `table_id` overlaps `window`.
    /// `exclude` lets a caller re-check an assignment without it conflicting with itself.
    pub async fn has_conflict(
        &self,
        table_id: TableId,
        window: Span,
        exclude: Option<AssignmentId>,
    ) -> Result<bool, EngineError> {
        validate_window(&window)?;
        let Some(shared) = self.get_table_state(&table_id) else {
            return Ok(false);
        };
        let guard = shared.read().await;
        Ok(find_conflict(&guard, &window, exclude).is_some())
    }
}
