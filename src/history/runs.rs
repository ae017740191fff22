use anyhow::{anyhow, Context, Result};
use arrow::{
    array::{Array, ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array},
    datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema, TimeUnit},
    record_batch::RecordBatch,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};

use super::state::RunOutcome;
use super::table_history::{HistoryRow, TableHistory};

/// One finished import run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRow {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    pub rows_fetched: u64,
    pub records_submitted: u64,
    pub degraded_rows: u64,
    pub error: Option<String>,
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, idx: usize) -> Result<&'a T> {
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| anyhow!("runs column {} has unexpected type", idx))
}

fn timestamp(arr: &TimestampMicrosecondArray, row: usize) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(arr.value(row))
        .ok_or_else(|| anyhow!("timestamp out of range in runs table"))
}

impl HistoryRow for RunRow {
    fn partition_date(&self) -> NaiveDate {
        self.started_at.date_naive()
    }

    fn schema() -> ArrowSchema {
        ArrowSchema::new(vec![
            Field::new(
                "started_at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new(
                "finished_at",
                ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
                false,
            ),
            Field::new("outcome", ArrowDataType::Utf8, false),
            Field::new("rows_fetched", ArrowDataType::UInt64, false),
            Field::new("records_submitted", ArrowDataType::UInt64, false),
            Field::new("degraded_rows", ArrowDataType::UInt64, false),
            Field::new("error", ArrowDataType::Utf8, true),
        ])
    }

    fn to_arrays(&self) -> Vec<ArrayRef> {
        vec![
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .started_at
                .timestamp_micros()])),
            Arc::new(TimestampMicrosecondArray::from(vec![self
                .finished_at
                .timestamp_micros()])),
            Arc::new(StringArray::from(vec![self.outcome.as_str()])),
            Arc::new(UInt64Array::from(vec![self.rows_fetched])),
            Arc::new(UInt64Array::from(vec![self.records_submitted])),
            Arc::new(UInt64Array::from(vec![self.degraded_rows])),
            Arc::new(StringArray::from(vec![self.error.as_deref()])),
        ]
    }

    fn unique_key(&self) -> String {
        format!("run-{}", self.started_at.timestamp_micros())
    }

    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self> {
        let started = column::<TimestampMicrosecondArray>(batch, 0)?;
        let finished = column::<TimestampMicrosecondArray>(batch, 1)?;
        let outcome = column::<StringArray>(batch, 2)?;
        let fetched = column::<UInt64Array>(batch, 3)?;
        let submitted = column::<UInt64Array>(batch, 4)?;
        let degraded = column::<UInt64Array>(batch, 5)?;
        let error = column::<StringArray>(batch, 6)?;

        Ok(RunRow {
            started_at: timestamp(started, row)?,
            finished_at: timestamp(finished, row)?,
            outcome: RunOutcome::from_str(outcome.value(row))
                .with_context(|| format!("unknown run outcome {:?}", outcome.value(row)))?,
            rows_fetched: fetched.value(row),
            records_submitted: submitted.value(row),
            degraded_rows: degraded.value(row),
            error: (!error.is_null(row)).then(|| error.value(row).to_string()),
        })
    }
}

impl TableHistory<RunRow> {
    pub fn new_runs(base: impl Into<PathBuf>) -> Result<Self> {
        TableHistory::new(base, "runs")
    }

    /// Open the runs table, pruning days before `keep_from`, with its rows.
    pub fn open_runs(
        base: impl Into<PathBuf>,
        keep_from: Option<NaiveDate>,
    ) -> Result<(Self, Vec<RunRow>)> {
        TableHistory::open(base, "runs", keep_from)
    }
}
