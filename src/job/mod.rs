// src/job/mod.rs

pub mod guard;
pub mod schedule;

use anyhow::Context;
use chrono::Utc;
use std::{collections::HashSet, sync::Arc};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::history::{RunLog, RunOutcome, RunRow};
use crate::kyc::{map_row, ColumnLayout, KycRecord, KycStore, RowShape};
use crate::sheets::SheetSource;

pub use guard::{RunGuard, RunPermit};
pub use schedule::run_schedule;

/// The single failure signal handed back to the scheduler.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unable to load")]
    Failed(#[source] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub rows_fetched: u64,
    pub records_submitted: u64,
    pub degraded_rows: u64,
}

/// Fetch → map → dedupe → submit, once per call.
pub struct ImportJob {
    source: Arc<dyn SheetSource>,
    store: Arc<dyn KycStore>,
    runs: Arc<RunLog>,
    range: String,
    layout: ColumnLayout,
}

impl ImportJob {
    pub fn new(
        source: Arc<dyn SheetSource>,
        store: Arc<dyn KycStore>,
        runs: Arc<RunLog>,
        range: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            runs,
            range: range.into(),
            layout: ColumnLayout::SHEET_V1,
        }
    }

    pub fn with_layout(mut self, layout: ColumnLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn runs(&self) -> &Arc<RunLog> {
        &self.runs
    }

    /// Run one import and record its outcome.
    #[instrument(name = "import_run", skip(self), fields(range = %self.range))]
    pub async fn run(&self) -> Result<RunReport, ImportError> {
        let started_at = Utc::now();
        let result = self.import().await;
        let finished_at = Utc::now();

        let row = match &result {
            Ok(report) => {
                info!(
                    rows = report.rows_fetched,
                    records = report.records_submitted,
                    degraded = report.degraded_rows,
                    "Imported new data"
                );
                RunRow {
                    started_at,
                    finished_at,
                    outcome: RunOutcome::Succeeded,
                    rows_fetched: report.rows_fetched,
                    records_submitted: report.records_submitted,
                    degraded_rows: report.degraded_rows,
                    error: None,
                }
            }
            Err(e) => {
                error!(error = ?e, "import failed");
                RunRow {
                    started_at,
                    finished_at,
                    outcome: RunOutcome::Failed,
                    rows_fetched: 0,
                    records_submitted: 0,
                    degraded_rows: 0,
                    error: Some(format!("{:#}", e)),
                }
            }
        };
        self.runs.record(row).await;

        result.map_err(ImportError::Failed)
    }

    async fn import(&self) -> anyhow::Result<RunReport> {
        let grid = self
            .source
            .fetch(&self.range)
            .await
            .with_context(|| format!("fetching range {}", self.range))?;

        let mut degraded = 0u64;
        let records: HashSet<KycRecord> = grid
            .iter()
            .enumerate()
            .map(|(idx, row)| (idx, map_row(row, &self.layout)))
            .inspect(|(idx, mapped)| {
                if let RowShape::Degraded { missing } = &mapped.shape {
                    degraded += 1;
                    let missing = missing
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(",");
                    debug!(row = idx, %missing, "degraded row");
                }
            })
            .map(|(_, mapped)| mapped.record)
            .collect();
        if degraded > 0 {
            warn!(degraded, "rows with missing address or status");
        }

        let report = RunReport {
            rows_fetched: grid.len() as u64,
            records_submitted: records.len() as u64,
            degraded_rows: degraded,
        };
        self.store
            .insert(records)
            .await
            .context("submitting KYC records")?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kyc::KycField;
    use crate::sheets::Grid;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct StaticSheet(Result<Grid, String>);

    #[async_trait]
    impl SheetSource for StaticSheet {
        async fn fetch(&self, _range: &str) -> Result<Grid> {
            self.0.clone().map_err(|e| anyhow!(e))
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<HashSet<KycRecord>>>,
        fail: bool,
    }

    #[async_trait]
    impl KycStore for RecordingStore {
        async fn insert(&self, records: HashSet<KycRecord>) -> Result<()> {
            self.batches.lock().unwrap().push(records);
            if self.fail {
                return Err(anyhow!("store unavailable"));
            }
            Ok(())
        }
    }

    fn sheet_row(address: &str, referral: &str, status: &str) -> Vec<Value> {
        let mut row = vec![json!(""); 12];
        row[5] = json!(address);
        row[10] = json!(referral);
        row[11] = json!(status);
        row
    }

    fn job(sheet: StaticSheet, store: Arc<RecordingStore>) -> ImportJob {
        ImportJob::new(
            Arc::new(sheet),
            store,
            Arc::new(RunLog::in_memory()),
            "A3:L",
        )
    }

    #[tokio::test]
    async fn identical_rows_are_submitted_once() {
        let store = Arc::new(RecordingStore::default());
        let grid = vec![
            sheet_row("0xa", "dke02sx60xb", "APPROVED"),
            sheet_row("0xa", "0xb", "APPROVED"),
            sheet_row("0xc", "", "PENDING"),
        ];
        let job = job(StaticSheet(Ok(grid)), store.clone());

        let report = job.run().await.unwrap();
        assert_eq!(
            report,
            RunReport {
                rows_fetched: 3,
                records_submitted: 2,
                degraded_rows: 0
            }
        );

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].contains(&KycRecord {
            address: Some("0xa".into()),
            referred_by: Some("0xb".into()),
            referral_key: Some("0xa".into()),
            status: Some("APPROVED".into()),
        }));
    }

    #[tokio::test]
    async fn degraded_rows_are_counted_and_still_submitted() {
        let store = Arc::new(RecordingStore::default());
        let grid = vec![vec![json!("only"), json!("two")], sheet_row("0xa", "", "")];
        let job = job(StaticSheet(Ok(grid)), store.clone());

        let report = job.run().await.unwrap();
        assert_eq!(report.degraded_rows, 2);
        assert_eq!(report.records_submitted, 2);
        assert_eq!(store.batches.lock().unwrap()[0].len(), 2);
    }

    #[tokio::test]
    async fn custom_layout_reads_other_columns() {
        let store = Arc::new(RecordingStore::default());
        let grid = vec![vec![json!("0xa"), json!("dke02sx0xb"), json!("APPROVED")]];
        let layout = ColumnLayout {
            address: 0,
            referred_by: 1,
            status: 2,
        };
        let job = job(StaticSheet(Ok(grid)), store.clone()).with_layout(layout);

        let report = job.run().await.unwrap();
        assert_eq!(report.degraded_rows, 0);
        let batches = store.batches.lock().unwrap();
        assert_eq!(
            batches[0],
            HashSet::from([KycRecord {
                address: Some("0xa".into()),
                referred_by: Some("0xb".into()),
                referral_key: Some("0xa".into()),
                status: Some("APPROVED".into()),
            }])
        );
    }

    #[test]
    fn missing_fields_display_as_column_names() {
        let names: Vec<String> = [KycField::Address, KycField::Status]
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["address", "status"]);
    }

    #[tokio::test]
    async fn empty_grid_still_submits() {
        let store = Arc::new(RecordingStore::default());
        let job = job(StaticSheet(Ok(vec![])), store.clone());
        job.run().await.unwrap();
        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_skips_submit() {
        let store = Arc::new(RecordingStore::default());
        let job = job(StaticSheet(Err("403 Forbidden".into())), store.clone());

        let err = job.run().await.unwrap_err();
        assert_eq!(err.to_string(), "unable to load");
        assert!(store.batches.lock().unwrap().is_empty());

        let last = job.runs().last().unwrap();
        assert_eq!(last.outcome, RunOutcome::Failed);
        assert!(last.error.unwrap().contains("403 Forbidden"));
    }

    #[tokio::test]
    async fn submit_failure_fails_run() {
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let job = job(StaticSheet(Ok(vec![sheet_row("0xa", "", "OK")])), store);
        assert!(matches!(job.run().await, Err(ImportError::Failed(_))));
        assert_eq!(job.runs().last().unwrap().outcome, RunOutcome::Failed);
        assert!(job.runs().last_success().is_none());
    }

    #[tokio::test]
    async fn success_is_recorded() {
        let store = Arc::new(RecordingStore::default());
        let job = job(StaticSheet(Ok(vec![sheet_row("0xa", "", "OK")])), store);
        job.run().await.unwrap();
        let last = job.runs().last().unwrap();
        assert_eq!(last.outcome, RunOutcome::Succeeded);
        assert_eq!(last.records_submitted, 1);
        assert_eq!(last.error, None);
    }
}
