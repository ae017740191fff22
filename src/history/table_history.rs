use anyhow::{Context, Result};
use arrow::{
    array::ArrayRef, datatypes::Schema as ArrowSchema, record_batch::RecordBatch,
};
use chrono::{NaiveDate, Utc};
use glob::glob;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::{
    collections::HashSet,
    fs::{self, File},
    io::BufWriter,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// A row type stored in a [`TableHistory`].
pub trait HistoryRow: Sized {
    /// Partition date (UTC naive) for hive partitioning
    fn partition_date(&self) -> NaiveDate;
    /// Arrow schema for this row type
    fn schema() -> ArrowSchema;
    /// Convert this row into single-element column arrays matching the schema
    fn to_arrays(&self) -> Vec<ArrayRef>;
    /// Dedupe key, also used in the file name
    fn unique_key(&self) -> String;
    /// Decode row `row` of a batch written with `schema()`
    fn from_batch(batch: &RecordBatch, row: usize) -> Result<Self>;
}

/// Hive-partitioned table of single-row Parquet files.
pub struct TableHistory<R: HistoryRow> {
    base_dir: PathBuf,
    table: String,
    schema: Arc<ArrowSchema>,
    seen: Mutex<HashSet<String>>,
    _marker: PhantomData<R>,
}

fn partition_dirs(table_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for part in fs::read_dir(table_dir)? {
        let part = part?;
        if part.file_type()?.is_dir() {
            dirs.push(part.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(glob(&format!("{}/*.parquet", dir.display()))?
        .filter_map(Result::ok)
        .collect())
}

fn partition_date_of(dir: &Path) -> Option<NaiveDate> {
    let name = dir.file_name()?.to_str()?;
    NaiveDate::parse_from_str(name.strip_prefix("date=")?, "%Y%m%d").ok()
}

impl<R: HistoryRow> TableHistory<R> {
    /// Open (or create) `base_dir/table` and index the keys already on disk.
    pub fn new(base_dir: impl Into<PathBuf>, table: &str) -> Result<Self> {
        Self::open(base_dir, table, None).map(|(history, _)| history)
    }

    /// Open the table, drop partitions older than `keep_from`, and return the
    /// remaining rows alongside the indexed table.
    pub fn open(
        base_dir: impl Into<PathBuf>,
        table: &str,
        keep_from: Option<NaiveDate>,
    ) -> Result<(Self, Vec<R>)> {
        let base_dir = base_dir.into();
        let table_dir = base_dir.join(table);
        fs::create_dir_all(&table_dir)
            .with_context(|| format!("could not create `{}`", table_dir.display()))?;

        let history = Self {
            base_dir,
            table: table.to_string(),
            schema: Arc::new(R::schema()),
            seen: Mutex::new(HashSet::new()),
            _marker: PhantomData,
        };
        if let Some(cutoff) = keep_from {
            history.prune_before(cutoff)?;
        }

        let rows = history.load_all()?;
        *history
            .seen
            .lock()
            .map_err(|_| anyhow::anyhow!("history index lock poisoned"))? =
            rows.iter().map(R::unique_key).collect();
        Ok((history, rows))
    }

    /// Remove every partition dated before `cutoff`. Returns how many went.
    pub fn prune_before(&self, cutoff: NaiveDate) -> Result<usize> {
        let mut removed = 0;
        for dir in partition_dirs(&self.table_dir())? {
            if partition_date_of(&dir).is_some_and(|date| date < cutoff) {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("pruning `{}`", dir.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn table_dir(&self) -> PathBuf {
        self.base_dir.join(&self.table)
    }

    /// Append `row`; a row whose key is already present is ignored.
    pub fn add(&self, row: &R) -> Result<()> {
        let key = row.unique_key();
        {
            let mut seen = self
                .seen
                .lock()
                .map_err(|_| anyhow::anyhow!("history index lock poisoned"))?;
            if !seen.insert(key.clone()) {
                return Ok(());
            }
        }

        let partition = format!("date={}", row.partition_date().format("%Y%m%d"));
        let dir = self.table_dir().join(partition);
        fs::create_dir_all(&dir)?;

        let ts = Utc::now().timestamp_micros();
        let fname = format!("{}---{}.parquet", key, ts);
        let tmp = dir.join(format!("{}.tmp", fname));
        let final_path = dir.join(&fname);

        let file = File::create(&tmp)
            .with_context(|| format!("creating history file {}", tmp.display()))?;
        let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;
        let batch = RecordBatch::try_new(self.schema.clone(), row.to_arrays())
            .context("building history record batch")?;
        writer.write(&batch)?;
        writer.close()?;
        fs::rename(&tmp, &final_path)?;
        Ok(())
    }

    /// Check if a row exists by its dedupe key
    pub fn contains(&self, key: &str) -> bool {
        self.seen.lock().map(|s| s.contains(key)).unwrap_or(false)
    }

    /// Read every stored row, in partition order, once per key.
    pub fn load_all(&self) -> Result<Vec<R>> {
        let mut rows = Vec::new();
        let mut keys = HashSet::new();
        for dir in partition_dirs(&self.table_dir())? {
            for path in parquet_files(&dir)? {
                let file = File::open(&path)
                    .with_context(|| format!("failed to open `{}`", path.display()))?;
                let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
                    .with_batch_size(1024)
                    .build()?;
                for batch in reader {
                    let batch = batch?;
                    for i in 0..batch.num_rows() {
                        let row = R::from_batch(&batch, i)?;
                        // a vacuum interrupted before cleanup leaves copies behind
                        if keys.insert(row.unique_key()) {
                            rows.push(row);
                        }
                    }
                }
            }
        }
        Ok(rows)
    }

    /// Vacuum each partition into one consolidated file
    pub fn vacuum(&self) -> Result<()> {
        for dir in partition_dirs(&self.table_dir())? {
            let files = parquet_files(&dir)?;
            if files.len() < 2 {
                continue;
            }

            let tmp = dir.join("consolidated.parquet.tmp");
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(BufWriter::new(file), self.schema.clone(), None)?;

            for p in &files {
                let f = File::open(p)?;
                let reader = ParquetRecordBatchReaderBuilder::try_new(f)?
                    .with_batch_size(1024)
                    .build()?;
                for batch in reader {
                    writer.write(&batch?)?;
                }
            }
            writer.close()?;
            fs::rename(&tmp, dir.join("consolidated.parquet"))?;

            for p in files {
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name != "consolidated.parquet" {
                        fs::remove_file(&p)?;
                    }
                }
            }
        }
        Ok(())
    }
}
