use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{info, warn};

use super::{guard::RunGuard, ImportJob};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleStats {
    pub started: u64,
    pub skipped: u64,
}

/// Tick every `period` from now until `shutdown` resolves.
///
/// Each tick spawns one run. A tick that lands while a run is still going is
/// skipped with a warning; the next tick fires on schedule regardless.
/// On shutdown the in-flight run, if any, is awaited.
pub async fn run_schedule(
    job: Arc<ImportJob>,
    period: Duration,
    shutdown: impl Future<Output = ()>,
) -> ScheduleStats {
    let guard = RunGuard::new();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut stats = ScheduleStats::default();
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!(period_secs = period.as_secs_f64(), "import schedule started");
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(permit) = guard.try_acquire() else {
                    stats.skipped += 1;
                    warn!("previous import still running; skipping tick");
                    continue;
                };
                stats.started += 1;
                let job = Arc::clone(&job);
                in_flight = Some(tokio::spawn(async move {
                    let _permit = permit;
                    if let Err(e) = job.run().await {
                        info!(error = %e, "import run failed; waiting for next tick");
                    }
                }));
            }
        }
    }

    if let Some(handle) = in_flight {
        if !handle.is_finished() {
            info!("waiting for in-flight import");
        }
        if let Err(e) = handle.await {
            warn!(error = %e, "import task panicked");
        }
    }
    info!(started = stats.started, skipped = stats.skipped, "import schedule stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::RunLog;
    use crate::kyc::{KycRecord, KycStore};
    use crate::sheets::{Grid, SheetSource};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;
    use tokio::time::sleep;

    struct GatedSheet {
        fetches: AtomicU64,
        release: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SheetSource for GatedSheet {
        async fn fetch(&self, _range: &str) -> Result<Grid> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.release {
                release.notified().await;
            }
            Ok(vec![])
        }
    }

    struct NullStore;

    #[async_trait]
    impl KycStore for NullStore {
        async fn insert(&self, _records: HashSet<KycRecord>) -> Result<()> {
            Ok(())
        }
    }

    fn job(sheet: Arc<GatedSheet>) -> Arc<ImportJob> {
        Arc::new(ImportJob::new(
            sheet,
            Arc::new(NullStore),
            Arc::new(RunLog::in_memory()),
            "A3:L",
        ))
    }

    #[tokio::test]
    async fn slow_run_blocks_overlapping_ticks() {
        let release = Arc::new(Notify::new());
        let sheet = Arc::new(GatedSheet {
            fetches: AtomicU64::new(0),
            release: Some(release.clone()),
        });

        let stats = run_schedule(job(sheet.clone()), Duration::from_millis(10), async move {
            sleep(Duration::from_millis(100)).await;
            release.notify_one();
        })
        .await;

        assert_eq!(sheet.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(stats.started, 1);
        assert!(stats.skipped >= 1);
    }

    #[tokio::test]
    async fn fast_runs_fire_every_tick() {
        let sheet = Arc::new(GatedSheet {
            fetches: AtomicU64::new(0),
            release: None,
        });
        let job = job(sheet.clone());

        let stats = run_schedule(
            job.clone(),
            Duration::from_millis(20),
            sleep(Duration::from_millis(90)),
        )
        .await;

        assert!(stats.started >= 2);
        assert_eq!(sheet.fetches.load(Ordering::SeqCst), stats.started);
        assert_eq!(job.runs().recent().len() as u64, stats.started);
    }
}
