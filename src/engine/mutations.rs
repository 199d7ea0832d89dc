use crate::limits::MAX_ASSIGNMENTS_PER_TABLE;
use crate::model::*;
use crate::window::{compute_window, now_ms};

use super::conflict::{check_no_conflict, check_transition};
use super::{Engine, EngineError, TableTxn};

fn check_capacity(ts: &TableState) -> Result<(), EngineError> {
    if ts.assignments.len() >= MAX_ASSIGNMENTS_PER_TABLE {
        return Err(EngineError::LimitExceeded("too many assignments on table"));
    }
    Ok(())
}

/// An active assignment for the same (table, reservation) pair blocks a new one.
fn check_pair_free(ts: &TableState, reservation_id: ReservationId) -> Result<(), EngineError> {
    match ts.latest_active_for(reservation_id) {
        Some(existing) => Err(EngineError::SchedulingConflict {
            table_id: ts.table_id,
            assignment_id: existing.id,
        }),
        None => Ok(()),
    }
}

impl Engine {
    /// Bind a reservation to a table for its computed window.
    ///
    /// The conflict check and the commit happen under the table's write lock, so
    /// two overlapping bookings on one table cannot both succeed.
    pub async fn create_assignment(
        &self,
        table_id: TableId,
        reservation: &Reservation,
    ) -> Result<Assignment, EngineError> {
        let window = compute_window(&reservation.date, reservation.time.as_deref(), &self.buffers)?;
        let txn = self.begin(table_id).await?;
        check_capacity(&txn.state)?;
        check_pair_free(&txn.state, reservation.id)?;
        check_no_conflict(&txn.state, &window)?;

        let event = Event::AssignmentCreated {
            id: self.allocate_id(),
            table_id,
            reservation_id: reservation.id,
            window,
            seated_at: None,
        };
        self.commit(txn, event).await
    }

    /// Seat a reservation at a table. Idempotent.
    ///
    /// Without a prior assignment (walk-in) one is created and seated in a single
    /// record, after the same conflict check `create_assignment` runs. An already
    /// seated assignment is returned unchanged.
    pub async fn mark_seated(
        &self,
        table_id: TableId,
        reservation_id: ReservationId,
    ) -> Result<Assignment, EngineError> {
        let reservation = self
            .reservations
            .get_reservation(reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;

        let txn = self.begin(table_id).await?;
        let now = now_ms();
        let event = match txn.state.latest_active_for(reservation_id) {
            Some(a) if a.status == AssignmentStatus::Seated => return Ok(a.clone()),
            Some(a) => {
                check_transition(a, AssignmentStatus::Seated)?;
                Event::AssignmentSeated {
                    id: a.id,
                    table_id,
                    at: now,
                }
            }
            None => {
                let window =
                    compute_window(&reservation.date, reservation.time.as_deref(), &self.buffers)?;
                check_capacity(&txn.state)?;
                check_no_conflict(&txn.state, &window)?;
                Event::AssignmentCreated {
                    id: self.allocate_id(),
                    table_id,
                    reservation_id,
                    window,
                    seated_at: Some(now),
                }
            }
        };
        self.commit(txn, event).await
    }

    /// Finish the most recent active assignment on a table.
    /// `Ok(None)` when there is nothing to finish.
    pub async fn mark_finished(&self, table_id: TableId) -> Result<Option<Assignment>, EngineError> {
        let Some(shared) = self.get_table_state(&table_id) else {
            return Ok(None);
        };
        let txn = self.begin_on(shared).await;
        let Some(a) = txn.state.latest_active() else {
            return Ok(None);
        };
        check_transition(a, AssignmentStatus::Finished)?;
        let event = Event::AssignmentFinished {
            id: a.id,
            table_id,
            at: now_ms(),
        };
        self.commit(txn, event).await.map(Some)
    }

    /// Finish one specific assignment, whatever else is active on its table.
    pub async fn finish_assignment(&self, id: AssignmentId) -> Result<Assignment, EngineError> {
        let (table_id, txn) = self.resolve_assignment(id).await?;
        let a = txn.state.get(id).ok_or(EngineError::AssignmentNotFound(id))?;
        check_transition(a, AssignmentStatus::Finished)?;
        let event = Event::AssignmentFinished {
            id,
            table_id,
            at: now_ms(),
        };
        self.commit(txn, event).await
    }

    /// Cancel a reserved assignment, releasing its window.
    pub async fn cancel_assignment(&self, id: AssignmentId) -> Result<Assignment, EngineError> {
        let (table_id, txn) = self.resolve_assignment(id).await?;
        let a = txn.state.get(id).ok_or(EngineError::AssignmentNotFound(id))?;
        check_transition(a, AssignmentStatus::Cancelled)?;
        self.commit(txn, Event::AssignmentCancelled { id, table_id }).await
    }

    /// Lookup assignment → table, then open a transaction on that table.
    async fn resolve_assignment(&self, id: AssignmentId) -> Result<(TableId, TableTxn), EngineError> {
        let table_id = self
            .get_table_for_assignment(&id)
            .ok_or(EngineError::AssignmentNotFound(id))?;
        let shared = self
            .get_table_state(&table_id)
            .ok_or(EngineError::AssignmentNotFound(id))?;
        Ok((table_id, self.begin_on(shared).await))
    }
}
