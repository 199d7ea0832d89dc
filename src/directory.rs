//! Read/write accessors for the entities this crate does not own.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::engine::EngineError;
use crate::model::{Reservation, ReservationId, ReservationStatus, TableId, TableInfo};

#[async_trait]
pub trait ReservationSource: Send + Sync {
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, EngineError>;

    /// Called by the seating desk after a successful seat/finish, never by the engine.
    async fn set_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<(), EngineError>;
}

#[async_trait]
pub trait TableSource: Send + Sync {
    async fn get_table(&self, id: TableId) -> Result<Option<TableInfo>, EngineError>;

    async fn list_tables(&self) -> Result<Vec<TableInfo>, EngineError>;
}

/// In-process directory of reservations and tables.
#[derive(Default)]
pub struct MemoryDirectory {
    reservations: DashMap<ReservationId, Reservation>,
    tables: DashMap<TableId, TableInfo>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_reservation(&self, reservation: Reservation) {
        self.reservations.insert(reservation.id, reservation);
    }

    pub fn put_table(&self, table: TableInfo) {
        self.tables.insert(table.id, table);
    }

    pub fn reservation_status(&self, id: ReservationId) -> Option<ReservationStatus> {
        self.reservations.get(&id).map(|r| r.status)
    }
}

#[async_trait]
impl ReservationSource for MemoryDirectory {
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, EngineError> {
        Ok(self.reservations.get(&id).map(|r| r.value().clone()))
    }

    async fn set_reservation_status(
        &self,
        id: ReservationId,
        status: ReservationStatus,
    ) -> Result<(), EngineError> {
        let mut entry = self
            .reservations
            .get_mut(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        entry.status = status;
        Ok(())
    }
}

#[async_trait]
impl TableSource for MemoryDirectory {
    async fn get_table(&self, id: TableId) -> Result<Option<TableInfo>, EngineError> {
        Ok(self.tables.get(&id).map(|t| t.value().clone()))
    }

    async fn list_tables(&self) -> Result<Vec<TableInfo>, EngineError> {
        Ok(self.tables.iter().map(|t| t.value().clone()).collect())
    }
}
