use std::collections::HashSet;

use crate::limits::{MAX_VALID_TIMESTAMP_MS, MIN_VALID_TIMESTAMP_MS};
use crate::model::*;
use crate::window::now_ms;

use super::{Engine, EngineError, SharedTableState};

fn check_instant(now: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&now) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Active assignment whose window contains `now`. The non-overlap invariant
/// allows at most one; if it was ever broken, the most recent one wins.
fn occupant(ts: &TableState, now: Ms) -> Option<&Assignment> {
    let probe = Span::new(now, now.saturating_add(1));
    let hits: Vec<&Assignment> = ts.overlapping(&probe).filter(|a| a.is_active()).collect();
    debug_assert!(
        hits.len() <= 1,
        "table {} has {} active assignments at {now}",
        ts.table_id,
        hits.len()
    );
    hits.into_iter().max_by_key(|a| a.id)
}

impl Engine {
    /// The assignment occupying `table_id` right now, if any.
    pub async fn is_occupied_now(&self, table_id: TableId) -> Result<Option<Assignment>, EngineError> {
        self.occupied_at(table_id, now_ms()).await
    }

    pub async fn occupied_at(&self, table_id: TableId, now: Ms) -> Result<Option<Assignment>, EngineError> {
        check_instant(now)?;
        let Some(shared) = self.get_table_state(&table_id) else {
            return Ok(None);
        };
        let guard = shared.read().await;
        Ok(occupant(&guard, now).cloned())
    }

    /// Every table with an occupant at `now`.
    pub async fn occupied_tables_at(&self, now: Ms) -> Result<HashSet<TableId>, EngineError> {
        check_instant(now)?;
        let tables: Vec<(TableId, SharedTableState)> = self
            .tables
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        let mut occupied = HashSet::new();
        for (table_id, shared) in tables {
            if occupant(&*shared.read().await, now).is_some() {
                occupied.insert(table_id);
            }
        }
        Ok(occupied)
    }

    pub async fn get_assignment(&self, id: AssignmentId) -> Option<Assignment> {
        let table_id = self.get_table_for_assignment(&id)?;
        let shared = self.get_table_state(&table_id)?;
        let guard = shared.read().await;
        guard.get(id).cloned()
    }

    /// All assignments ever made on a table, ordered by window start.
    pub async fn assignments_for_table(&self, table_id: TableId) -> Vec<Assignment> {
        match self.get_table_state(&table_id) {
            Some(shared) => shared.read().await.assignments.clone(),
            None => Vec::new(),
        }
    }

    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables.iter().map(|e| *e.key()).collect()
    }
}
