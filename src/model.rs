use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds of local civil time since 1970-01-01T00:00. No timezone is attached.
pub type Ms = i64;

pub type TableId = u64;
pub type ReservationId = u64;
/// Surrogate key. Strictly increasing in creation order, never reused.
pub type AssignmentId = u64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (one ends exactly where the other starts) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        !(self.end <= other.start || self.start >= other.end)
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Reserved,
    Seated,
    Finished,
    Cancelled,
}

impl AssignmentStatus {
    /// Reserved and seated assignments block their window; the rest are history.
    pub fn is_active(self) -> bool {
        matches!(self, AssignmentStatus::Reserved | AssignmentStatus::Seated)
    }

    /// Legal lifecycle edges. Finishing straight from `Reserved` is allowed because
    /// clearing a table acts on whatever active assignment it holds.
    pub fn can_transition_to(self, next: AssignmentStatus) -> bool {
        use AssignmentStatus::*;
        matches!(
            (self, next),
            (Reserved, Seated) | (Seated, Finished) | (Reserved, Finished) | (Reserved, Cancelled)
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssignmentStatus::Reserved => "reserved",
            AssignmentStatus::Seated => "seated",
            AssignmentStatus::Finished => "finished",
            AssignmentStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A reservation bound to a table for a blocked window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub table_id: TableId,
    pub reservation_id: ReservationId,
    pub window: Span,
    pub seated_at: Option<Ms>,
    pub finished_at: Option<Ms>,
    pub status: AssignmentStatus,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// All assignments ever made on one table, sorted by `window.start`.
#[derive(Debug, Clone)]
pub struct TableState {
    pub table_id: TableId,
    pub assignments: Vec<Assignment>,
}

impl TableState {
    pub fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            assignments: Vec::new(),
        }
    }

    /// Insert maintaining sort order by window start.
    pub fn insert(&mut self, assignment: Assignment) {
        let pos = self
            .assignments
            .partition_point(|a| a.window.start <= assignment.window.start);
        self.assignments.insert(pos, assignment);
    }

    pub fn get(&self, id: AssignmentId) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AssignmentId) -> Option<&mut Assignment> {
        self.assignments.iter_mut().find(|a| a.id == id)
    }

    /// Assignments whose window overlaps `query`, regardless of status.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Assignment> {
        let right_bound = self
            .assignments
            .partition_point(|a| a.window.start < query.end);
        self.assignments[..right_bound]
            .iter()
            .filter(move |a| a.window.end > query.start)
    }

    pub fn active(&self) -> impl Iterator<Item = &Assignment> {
        self.assignments.iter().filter(|a| a.is_active())
    }

    /// Most recent active assignment (highest id) on this table.
    pub fn latest_active(&self) -> Option<&Assignment> {
        self.active().max_by_key(|a| a.id)
    }

    /// Most recent active assignment (highest id) for one reservation on this table.
    pub fn latest_active_for(&self, reservation_id: ReservationId) -> Option<&Assignment> {
        self.active()
            .filter(|a| a.reservation_id == reservation_id)
            .max_by_key(|a| a.id)
    }
}

/// Log record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// `seated_at` is set when a walk-in is created and seated in one step.
    AssignmentCreated {
        id: AssignmentId,
        table_id: TableId,
        reservation_id: ReservationId,
        window: Span,
        seated_at: Option<Ms>,
    },
    AssignmentSeated {
        id: AssignmentId,
        table_id: TableId,
        at: Ms,
    },
    AssignmentFinished {
        id: AssignmentId,
        table_id: TableId,
        at: Ms,
    },
    AssignmentCancelled {
        id: AssignmentId,
        table_id: TableId,
    },
    /// Full snapshot of one assignment, written by compaction.
    AssignmentRestored(Assignment),
}

impl Event {
    pub fn table_id(&self) -> TableId {
        match self {
            Event::AssignmentCreated { table_id, .. }
            | Event::AssignmentSeated { table_id, .. }
            | Event::AssignmentFinished { table_id, .. }
            | Event::AssignmentCancelled { table_id, .. } => *table_id,
            Event::AssignmentRestored(a) => a.table_id,
        }
    }

    pub fn assignment_id(&self) -> AssignmentId {
        match self {
            Event::AssignmentCreated { id, .. }
            | Event::AssignmentSeated { id, .. }
            | Event::AssignmentFinished { id, .. }
            | Event::AssignmentCancelled { id, .. } => *id,
            Event::AssignmentRestored(a) => a.id,
        }
    }
}

// ── Collaborator records ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Booked,
    Seated,
    Finished,
    Cancelled,
}

/// Owned by the reservation subsystem; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub people: u32,
    /// `YYYY-MM-DD`, optionally followed by a time-of-day.
    pub date: String,
    /// `HH:MM` or `HH:MM:SS`.
    pub time: Option<String>,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    pub capacity: u32,
}
