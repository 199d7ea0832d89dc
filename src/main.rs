use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use seatline::compactor;
use seatline::config::Config;
use seatline::directory::MemoryDirectory;
use seatline::engine::Engine;
use seatline::model::{Assignment, TableId};
use seatline::notify::NotifyHub;
use seatline::window::{from_civil_ms, now_ms};

/// One line of the startup occupancy report.
#[derive(Serialize)]
struct TableReport<'a> {
    table_id: TableId,
    assignments: usize,
    active: usize,
    occupied_by: Option<&'a Assignment>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    seatline::observability::init(config.metrics_port)?;
    std::fs::create_dir_all(&config.data_dir)?;

    // Reservations live in the booking service; the log alone needs none.
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        config.buffers,
        Arc::new(MemoryDirectory::new()),
    )?);

    info!("seatline assignment store at {}", config.wal_path().display());
    info!(
        "  buffers: pre-hold {}m, dine {}m, post {}m",
        config.buffers.pre_hold_minutes(),
        config.buffers.dine_duration_minutes(),
        config.buffers.post_buffer_minutes()
    );
    info!("  compact threshold: {}", config.compact_threshold);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let now = now_ms();
    info!("occupancy at {}", from_civil_ms(now).map_or_else(|| now.to_string(), |t| t.to_string()));
    let mut table_ids = engine.table_ids();
    table_ids.sort_unstable();
    for table_id in table_ids {
        let assignments = engine.assignments_for_table(table_id).await;
        let occupant = engine.occupied_at(table_id, now).await?;
        let report = TableReport {
            table_id,
            assignments: assignments.len(),
            active: assignments.iter().filter(|a| a.is_active()).count(),
            occupied_by: occupant.as_ref(),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    compactor::compact_if_due(&engine, config.compact_threshold).await;
    let compactor_task = tokio::spawn(compactor::run_compactor(engine.clone(), config.compact_threshold));

    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    shutdown.await;

    info!("shutdown signal received, compacting before exit");
    compactor_task.abort();
    let records = engine.compact_wal().await?;
    info!(records, "seatline stopped");
    Ok(())
}
