mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::find_conflict;
pub use error::EngineError;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};

use crate::directory::ReservationSource;
use crate::limits::MAX_TABLES;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;
use crate::window::BufferConfig;

pub type SharedTableState = Arc<RwLock<TableState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Owns the WAL. Each wake-up takes the first append, drains whatever else is
/// already queued, and makes the whole batch durable with one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Flush what we have before compacting or reporting counters.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!(path = %wal.path().display(), batch = batch.len(), "WAL flush failed: {e}");
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    tracing::debug!(path = %wal.path().display(), "WAL writer stopped");
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    wal.append_batch(batch.iter().map(|(event, _)| event))
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            match &result {
                Ok(()) => tracing::info!(path = %wal.path().display(), records = events.len(), "WAL compacted"),
                Err(e) => tracing::error!(path = %wal.path().display(), "WAL compaction failed: {e}"),
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::Infrastructure(e.to_string()))
}

/// Apply one event to a table's state and return the assignment it touched.
/// `None` means the event names an assignment this table doesn't have.
fn apply_to_table(ts: &mut TableState, event: &Event) -> Option<Assignment> {
    match event {
        Event::AssignmentCreated {
            id,
            table_id,
            reservation_id,
            window,
            seated_at,
        } => {
            let assignment = Assignment {
                id: *id,
                table_id: *table_id,
                reservation_id: *reservation_id,
                window: *window,
                seated_at: *seated_at,
                finished_at: None,
                status: if seated_at.is_some() {
                    AssignmentStatus::Seated
                } else {
                    AssignmentStatus::Reserved
                },
            };
            ts.insert(assignment.clone());
            Some(assignment)
        }
        Event::AssignmentSeated { id, at, .. } => {
            let a = ts.get_mut(*id)?;
            a.status = AssignmentStatus::Seated;
            a.seated_at.get_or_insert(*at);
            Some(a.clone())
        }
        Event::AssignmentFinished { id, at, .. } => {
            let a = ts.get_mut(*id)?;
            a.status = AssignmentStatus::Finished;
            a.finished_at.get_or_insert(*at);
            Some(a.clone())
        }
        Event::AssignmentCancelled { id, .. } => {
            let a = ts.get_mut(*id)?;
            a.status = AssignmentStatus::Cancelled;
            Some(a.clone())
        }
        Event::AssignmentRestored(assignment) => {
            match ts.get_mut(assignment.id) {
                Some(existing) => *existing = assignment.clone(),
                None => ts.insert(assignment.clone()),
            }
            Some(assignment.clone())
        }
    }
}

fn record_commit(event: &Event) {
    let name = match event {
        Event::AssignmentCreated { seated_at: Some(_), .. } => {
            metrics::counter!(observability::ASSIGNMENTS_CREATED_TOTAL).increment(1);
            observability::ASSIGNMENTS_SEATED_TOTAL
        }
        Event::AssignmentCreated { .. } => observability::ASSIGNMENTS_CREATED_TOTAL,
        Event::AssignmentSeated { .. } => observability::ASSIGNMENTS_SEATED_TOTAL,
        Event::AssignmentFinished { .. } => observability::ASSIGNMENTS_FINISHED_TOTAL,
        Event::AssignmentCancelled { .. } => observability::ASSIGNMENTS_CANCELLED_TOTAL,
        Event::AssignmentRestored(_) => return,
    };
    metrics::counter!(name).increment(1);
}

/// The table-assignment scheduler.
///
/// One `RwLock` per table: every check-then-commit runs under that table's
/// write lock, so bookings on the same table serialize while different tables
/// proceed in parallel.
pub struct Engine {
    pub(super) tables: DashMap<TableId, SharedTableState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: assignment id → table id.
    pub(super) assignment_to_table: Arc<DashMap<AssignmentId, TableId>>,
    pub(super) next_id: AtomicU64,
    pub(super) buffers: BufferConfig,
    pub(super) reservations: Arc<dyn ReservationSource>,
    /// Shared by commits, exclusive for compaction.
    pub(super) commit_gate: Arc<RwLock<()>>,
}

/// Guards held across one check-then-commit sequence.
pub(super) struct TableTxn {
    gate: OwnedRwLockReadGuard<()>,
    pub(super) state: OwnedRwLockWriteGuard<TableState>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task. Must run inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        buffers: BufferConfig,
        reservations: Arc<dyn ReservationSource>,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;

        let mut tables: HashMap<TableId, TableState> = HashMap::new();
        let assignment_to_table = DashMap::new();
        let mut max_id: AssignmentId = 0;
        for event in &events {
            let table_id = event.table_id();
            let ts = tables
                .entry(table_id)
                .or_insert_with(|| TableState::new(table_id));
            if let Some(a) = apply_to_table(ts, event) {
                assignment_to_table.insert(a.id, a.table_id);
                max_id = max_id.max(a.id);
            }
        }
        if !events.is_empty() {
            tracing::info!(
                path = %wal_path.display(),
                events = events.len(),
                tables = tables.len(),
                assignments = assignment_to_table.len(),
                "replayed assignment log"
            );
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: tables
                .into_iter()
                .map(|(id, ts)| (id, Arc::new(RwLock::new(ts))))
                .collect(),
            wal_tx,
            notify,
            assignment_to_table: Arc::new(assignment_to_table),
            next_id: AtomicU64::new(max_id + 1),
            buffers,
            reservations,
            commit_gate: Arc::new(RwLock::new(())),
        })
    }

    pub fn buffers(&self) -> &BufferConfig {
        &self.buffers
    }

    pub fn get_table_state(&self, id: &TableId) -> Option<SharedTableState> {
        self.tables.get(id).map(|e| e.value().clone())
    }

    pub fn get_table_for_assignment(&self, id: &AssignmentId) -> Option<TableId> {
        self.assignment_to_table.get(id).map(|e| *e.value())
    }

    pub(super) fn allocate_id(&self) -> AssignmentId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a check-then-commit sequence on a table, creating its state on first use.
    pub(super) async fn begin(&self, table_id: TableId) -> Result<TableTxn, EngineError> {
        let shared = match self.get_table_state(&table_id) {
            Some(shared) => shared,
            None => {
                if self.tables.len() >= MAX_TABLES {
                    return Err(EngineError::LimitExceeded("too many tables"));
                }
                self.tables
                    .entry(table_id)
                    .or_insert_with(|| Arc::new(RwLock::new(TableState::new(table_id))))
                    .value()
                    .clone()
            }
        };
        Ok(self.begin_on(shared).await)
    }

    pub(super) async fn begin_on(&self, shared: SharedTableState) -> TableTxn {
        let gate = self.commit_gate.clone().read_owned().await;
        let state = shared.write_owned().await;
        TableTxn { gate, state }
    }

    /// WAL-append + apply + notify for a validated event.
    ///
    /// Runs on its own task that owns the table guard: if the caller's future is
    /// dropped, the commit still finishes or never started, never half-done. A
    /// failed append applies nothing.
    pub(super) async fn commit(&self, txn: TableTxn, event: Event) -> Result<Assignment, EngineError> {
        let wal_tx = self.wal_tx.clone();
        let notify = self.notify.clone();
        let index = self.assignment_to_table.clone();
        tokio::spawn(async move {
            let TableTxn { gate, mut state } = txn;
            wal_append(&wal_tx, &event).await?;
            let applied = apply_to_table(&mut state, &event).ok_or_else(|| {
                EngineError::AssignmentNotFound(event.assignment_id())
            })?;
            index.insert(applied.id, applied.table_id);
            drop(state);
            drop(gate);
            record_commit(&event);
            notify.send(applied.table_id, &event);
            Ok::<_, EngineError>(applied)
        })
        .await
        .map_err(|e| EngineError::Infrastructure(format!("commit task failed: {e}")))?
    }

    /// Rewrite the WAL as one snapshot record per assignment. Returns the record count.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _gate = self.commit_gate.write().await;

        let tables: Vec<SharedTableState> = self.tables.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for shared in tables {
            let guard = shared.read().await;
            events.extend(guard.assignments.iter().cloned().map(Event::AssignmentRestored));
        }
        events.sort_by_key(Event::assignment_id);
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Infrastructure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Infrastructure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Infrastructure(e.to_string()))?;
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
