// src/history/mod.rs

pub mod runs;
pub mod state;
pub mod table_history;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use std::{
    collections::VecDeque,
    path::PathBuf,
    sync::{Arc, Mutex},
};
use tracing::{info, warn};

pub use runs::RunRow;
pub use state::RunOutcome;
pub use table_history::{HistoryRow, TableHistory};

/// How many runs are kept in memory for the health endpoints.
pub const RECENT_RUNS: usize = 50;

/// Days of run history kept on disk.
pub const RUN_RETENTION_DAYS: i64 = 30;

/// Outcome log of import runs: a bounded in-memory window, optionally
/// mirrored to a Parquet table so it survives restarts.
pub struct RunLog {
    recent: Mutex<VecDeque<RunRow>>,
    table: Option<Arc<TableHistory<RunRow>>>,
}

impl RunLog {
    pub fn in_memory() -> Self {
        Self {
            recent: Mutex::new(VecDeque::with_capacity(RECENT_RUNS)),
            table: None,
        }
    }

    /// Open the runs table under `history_dir` and seed the window from it.
    pub fn persistent(history_dir: impl Into<PathBuf>) -> Result<Self> {
        let history_dir = history_dir.into();
        let keep_from = Utc::now().date_naive() - Duration::days(RUN_RETENTION_DAYS);
        let (table, mut rows) = TableHistory::open_runs(&history_dir, Some(keep_from))
            .with_context(|| format!("opening run history in {}", history_dir.display()))?;

        rows.sort_by_key(|r| r.started_at);
        let skip = rows.len().saturating_sub(RECENT_RUNS);
        let recent: VecDeque<RunRow> = rows.into_iter().skip(skip).collect();
        info!(runs = recent.len(), dir = %history_dir.display(), "loaded run history");

        Ok(Self {
            recent: Mutex::new(recent),
            table: Some(Arc::new(table)),
        })
    }

    /// Remember a finished run. Persistence failures are logged, never returned.
    pub async fn record(&self, row: RunRow) {
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == RECENT_RUNS {
                recent.pop_front();
            }
            recent.push_back(row.clone());
        }

        if let Some(table) = &self.table {
            let table = Arc::clone(table);
            let res = tokio::task::spawn_blocking(move || table.add(&row)).await;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = ?e, "failed to persist run history"),
                Err(e) => warn!(error = %e, "run history writer panicked"),
            }
        }
    }

    /// Consolidate the on-disk partitions, if any.
    pub async fn vacuum(&self) -> Result<()> {
        if let Some(table) = &self.table {
            let table = Arc::clone(table);
            tokio::task::spawn_blocking(move || table.vacuum()).await??;
        }
        Ok(())
    }

    pub fn last(&self) -> Option<RunRow> {
        self.recent.lock().ok()?.back().cloned()
    }

    pub fn last_success(&self) -> Option<RunRow> {
        self.recent
            .lock()
            .ok()?
            .iter()
            .rev()
            .find(|r| r.outcome == RunOutcome::Succeeded)
            .cloned()
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<RunRow> {
        self.recent
            .lock()
            .map(|r| r.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}
