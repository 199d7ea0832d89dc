//! The booking surface: existence and capacity checks around the engine's
//! lifecycle operations, plus the reservation status updates that follow them.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::directory::{ReservationSource, TableSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("table with id {0} does not exist")]
    TableNotFound(TableId),

    #[error("reservation with id {0} does not exist")]
    ReservationNotFound(ReservationId),

    #[error("table {table} does not have sufficient capacity for this reservation (party of {people})")]
    InsufficientCapacity {
        table: String,
        capacity: u32,
        people: u32,
    },

    #[error("table {table} is currently occupied")]
    TableOccupied {
        table: String,
        assignment_id: AssignmentId,
    },

    #[error("table {0} is currently not occupied")]
    NotOccupied(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl DeskError {
    pub fn is_client_error(&self) -> bool {
        match self {
            DeskError::Engine(e) => e.is_client_error(),
            _ => true,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            DeskError::TableNotFound(_) => "table_not_found",
            DeskError::ReservationNotFound(_) => "reservation_not_found",
            DeskError::InsufficientCapacity { .. } => "insufficient_capacity",
            DeskError::TableOccupied { .. } => "table_occupied",
            DeskError::NotOccupied(_) => "not_occupied",
            DeskError::Engine(EngineError::SchedulingConflict { .. }) => "scheduling_conflict",
            DeskError::Engine(_) => "engine",
        }
    }
}

/// One row of the table listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableListing {
    pub table: TableInfo,
    /// The assignment occupying the table right now, if any.
    pub occupied_by: Option<AssignmentId>,
}

pub struct SeatingDesk<R, T> {
    engine: Arc<Engine>,
    reservations: Arc<R>,
    tables: Arc<T>,
}

impl<R: ReservationSource, T: TableSource> SeatingDesk<R, T> {
    pub fn new(engine: Arc<Engine>, reservations: Arc<R>, tables: Arc<T>) -> Self {
        Self {
            engine,
            reservations,
            tables,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Book a table for a reservation's window.
    pub async fn book(&self, table_id: TableId, reservation_id: ReservationId) -> Result<Assignment, DeskError> {
        let result = self.try_book(table_id, reservation_id).await;
        self.observe("book", table_id, result)
    }

    /// Seat a reservation, creating its assignment if it had none.
    pub async fn seat(&self, table_id: TableId, reservation_id: ReservationId) -> Result<Assignment, DeskError> {
        let result = self.try_seat(table_id, reservation_id).await;
        self.observe("seat", table_id, result)
    }

    /// Clear a table that is occupied now and finish its reservation.
    pub async fn finish(&self, table_id: TableId) -> Result<Assignment, DeskError> {
        let result = self.try_finish(table_id).await;
        self.observe("finish", table_id, result)
    }

    async fn try_book(&self, table_id: TableId, reservation_id: ReservationId) -> Result<Assignment, DeskError> {
        let table = self.require_table(table_id).await?;
        let reservation = self.require_reservation(reservation_id).await?;
        check_capacity(&table, &reservation)?;
        Ok(self.engine.create_assignment(table_id, &reservation).await?)
    }

    async fn try_seat(&self, table_id: TableId, reservation_id: ReservationId) -> Result<Assignment, DeskError> {
        let table = self.require_table(table_id).await?;
        let reservation = self.require_reservation(reservation_id).await?;
        check_capacity(&table, &reservation)?;

        if let Some(active) = self.engine.is_occupied_now(table_id).await?
            && active.reservation_id != reservation_id
        {
            return Err(DeskError::TableOccupied {
                table: table.name,
                assignment_id: active.id,
            });
        }

        let seated = self.engine.mark_seated(table_id, reservation_id).await?;
        self.reservations
            .set_reservation_status(reservation_id, ReservationStatus::Seated)
            .await?;
        Ok(seated)
    }

    async fn try_finish(&self, table_id: TableId) -> Result<Assignment, DeskError> {
        let table = self.require_table(table_id).await?;
        // Later bookings on this table may carry higher ids; finish the diner
        // who is actually there.
        let Some(occupant) = self.engine.is_occupied_now(table_id).await? else {
            return Err(DeskError::NotOccupied(table.name));
        };
        let finished = self.engine.finish_assignment(occupant.id).await?;
        self.reservations
            .set_reservation_status(finished.reservation_id, ReservationStatus::Finished)
            .await?;
        Ok(finished)
    }

    /// Every table, ordered by name, with its current occupant.
    pub async fn list_tables(&self) -> Result<Vec<TableListing>, DeskError> {
        let mut tables = self.tables.list_tables().await?;
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        let mut listing = Vec::with_capacity(tables.len());
        for table in tables {
            let occupied_by = self.engine.is_occupied_now(table.id).await?.map(|a| a.id);
            listing.push(TableListing { table, occupied_by });
        }
        Ok(listing)
    }

    async fn require_table(&self, id: TableId) -> Result<TableInfo, DeskError> {
        self.tables
            .get_table(id)
            .await?
            .ok_or(DeskError::TableNotFound(id))
    }

    async fn require_reservation(&self, id: ReservationId) -> Result<Reservation, DeskError> {
        self.reservations
            .get_reservation(id)
            .await?
            .ok_or(DeskError::ReservationNotFound(id))
    }

    fn observe(
        &self,
        op: &'static str,
        table_id: TableId,
        result: Result<Assignment, DeskError>,
    ) -> Result<Assignment, DeskError> {
        match &result {
            Ok(a) => info!(op, table_id, assignment_id = a.id, reservation_id = a.reservation_id, status = %a.status, "desk operation succeeded"),
            Err(e) => {
                metrics::counter!(observability::DESK_REJECTIONS_TOTAL, "reason" => e.reason()).increment(1);
                if e.is_client_error() {
                    debug!(op, table_id, "desk operation rejected: {e}");
                } else {
                    tracing::error!(op, table_id, "desk operation failed: {e}");
                }
            }
        }
        result
    }
}

fn check_capacity(table: &TableInfo, reservation: &Reservation) -> Result<(), DeskError> {
    if table.capacity < reservation.people {
        return Err(DeskError::InsufficientCapacity {
            table: table.name.clone(),
            capacity: table.capacity,
            people: reservation.people,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Duration;

    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::notify::NotifyHub;
    use crate::window::{BufferConfig, from_civil_ms, now_ms};

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatline_test_desk");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    /// Reservation arriving `offset` from now, so its window covers the present.
    fn reservation_around_now(id: ReservationId, people: u32, offset: Duration) -> Reservation {
        let arrival = from_civil_ms(now_ms()).unwrap() + offset;
        Reservation {
            id,
            people,
            date: arrival.format("%Y-%m-%d").to_string(),
            time: Some(arrival.format("%H:%M").to_string()),
            status: ReservationStatus::Booked,
        }
    }

    fn desk(name: &str) -> (SeatingDesk<MemoryDirectory, MemoryDirectory>, Arc<MemoryDirectory>) {
        let dir = Arc::new(MemoryDirectory::new());
        dir.put_table(TableInfo { id: 1, name: "#1".into(), capacity: 6 });
        dir.put_table(TableInfo { id: 2, name: "Bar #1".into(), capacity: 1 });
        let engine = Engine::new(
            test_wal_path(name),
            Arc::new(NotifyHub::new()),
            BufferConfig::default(),
            dir.clone(),
        )
        .unwrap();
        (SeatingDesk::new(Arc::new(engine), dir.clone(), dir.clone()), dir)
    }

    #[tokio::test]
    async fn seat_then_finish_updates_reservation() {
        let (desk, dir) = desk("seat_finish.wal");
        dir.put_reservation(reservation_around_now(10, 4, Duration::zero()));

        let seated = desk.seat(1, 10).await.unwrap();
        assert_eq!(seated.status, AssignmentStatus::Seated);
        assert_eq!(dir.reservation_status(10), Some(ReservationStatus::Seated));

        let finished = desk.finish(1).await.unwrap();
        assert_eq!(finished.id, seated.id);
        assert_eq!(finished.status, AssignmentStatus::Finished);
        assert_eq!(dir.reservation_status(10), Some(ReservationStatus::Finished));
    }

    #[tokio::test]
    async fn seat_rejects_other_reservation_on_occupied_table() {
        let (desk, dir) = desk("occupied.wal");
        dir.put_reservation(reservation_around_now(10, 2, Duration::zero()));
        dir.put_reservation(reservation_around_now(11, 2, Duration::minutes(5)));

        let first = desk.seat(1, 10).await.unwrap();
        let err = desk.seat(1, 11).await.unwrap_err();
        match err {
            DeskError::TableOccupied { table, assignment_id } => {
                assert_eq!(table, "#1");
                assert_eq!(assignment_id, first.id);
            }
            other => panic!("expected TableOccupied, got {other:?}"),
        }
        assert_eq!(dir.reservation_status(11), Some(ReservationStatus::Booked));
    }

    #[tokio::test]
    async fn seat_same_reservation_twice_is_idempotent() {
        let (desk, dir) = desk("reseat.wal");
        dir.put_reservation(reservation_around_now(10, 2, Duration::zero()));

        let first = desk.seat(1, 10).await.unwrap();
        let second = desk.seat(1, 10).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn capacity_checked_before_booking() {
        let (desk, dir) = desk("capacity.wal");
        dir.put_reservation(reservation_around_now(10, 3, Duration::hours(4)));

        let err = desk.book(2, 10).await.unwrap_err();
        assert!(matches!(err, DeskError::InsufficientCapacity { capacity: 1, people: 3, .. }));
        assert!(err.is_client_error());
        assert!(desk.engine().assignments_for_table(2).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_table_and_reservation() {
        let (desk, dir) = desk("unknown.wal");
        dir.put_reservation(reservation_around_now(10, 2, Duration::zero()));

        assert!(matches!(desk.seat(99, 10).await, Err(DeskError::TableNotFound(99))));
        assert!(matches!(desk.seat(1, 77).await, Err(DeskError::ReservationNotFound(77))));
        assert!(matches!(desk.finish(99).await, Err(DeskError::TableNotFound(99))));
    }

    #[tokio::test]
    async fn finish_idle_table_rejected() {
        let (desk, _dir) = desk("idle.wal");
        let err = desk.finish(1).await.unwrap_err();
        assert!(matches!(err, DeskError::NotOccupied(ref name) if name == "#1"));
    }

    #[tokio::test]
    async fn book_conflict_surfaces_engine_error() {
        let (desk, dir) = desk("book_conflict.wal");
        dir.put_reservation(reservation_around_now(10, 2, Duration::hours(5)));
        dir.put_reservation(reservation_around_now(11, 2, Duration::hours(6)));

        desk.book(1, 10).await.unwrap();
        let err = desk.book(1, 11).await.unwrap_err();
        assert!(matches!(err, DeskError::Engine(EngineError::SchedulingConflict { table_id: 1, .. })));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn listing_sorted_with_occupancy() {
        let (desk, dir) = desk("listing.wal");
        dir.put_reservation(reservation_around_now(10, 1, Duration::zero()));
        let seated = desk.seat(2, 10).await.unwrap();

        let listing = desk.list_tables().await.unwrap();
        let names: Vec<&str> = listing.iter().map(|l| l.table.name.as_str()).collect();
        assert_eq!(names, vec!["#1", "Bar #1"]);
        assert_eq!(listing[0].occupied_by, None);
        assert_eq!(listing[1].occupied_by, Some(seated.id));
    }

    #[tokio::test]
    async fn finish_clears_current_diner_not_later_booking() {
        let (desk, dir) = desk("finish_occupant.wal");
        dir.put_reservation(reservation_around_now(10, 2, Duration::zero()));
        dir.put_reservation(reservation_around_now(11, 2, Duration::days(1)));

        let seated = desk.seat(1, 10).await.unwrap();
        let tomorrow = desk.book(1, 11).await.unwrap();
        assert!(tomorrow.id > seated.id);

        let finished = desk.finish(1).await.unwrap();
        assert_eq!(finished.id, seated.id);
        assert_eq!(finished.reservation_id, 10);
        assert_eq!(dir.reservation_status(10), Some(ReservationStatus::Finished));
        assert_eq!(dir.reservation_status(11), Some(ReservationStatus::Booked));

        let later = desk.engine().get_assignment(tomorrow.id).await.unwrap();
        assert_eq!(later.status, AssignmentStatus::Reserved);
        assert!(desk.engine().is_occupied_now(1).await.unwrap().is_none());
    }
}
