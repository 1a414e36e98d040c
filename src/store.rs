/// Persistent storage of labeled feature vectors, partitioned by dataset id (dsid).

use std::sync::{Arc, Mutex};

use log::debug;

use crate::db::SqlitePool;
use crate::error::Result;
use crate::models::{LabeledSample, NewLabeledSample};
use crate::queries;

/// One labeled training example.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord
{
    pub dsid: i64,
    pub label: String,
    pub feature: Vec<f32>,
}

impl SampleRecord
{
    pub fn new(dsid: i64, label: impl Into<String>, feature: Vec<f32>) -> Self
    {
        SampleRecord { dsid, label: label.into(), feature }
    }
}

/// Records are append-only; the only mutation besides insertion is clearing everything.
/// Writes are visible to every subsequent read.
pub trait LabelStore: Send + Sync
{
    /// Appends all records in one transaction and returns how many were written.
    fn insert_batch(&self, records: &[SampleRecord]) -> Result<usize>;

    fn find_by_dsid(&self, dsid: i64) -> Result<Vec<SampleRecord>>;

    fn count_by_dsid(&self, dsid: i64) -> Result<usize>
    {
        Ok(self.find_by_dsid(dsid)?.len())
    }

    /// Deletes every record of every dsid. Returns the number deleted.
    fn clear_all(&self) -> Result<usize>;
}

/// SQLite-backed store. Feature vectors are kept as bincode blobs.
#[derive(Clone)]
pub struct SqliteLabelStore
{
    pool: SqlitePool,
}

impl SqliteLabelStore
{
    pub fn new(pool: SqlitePool) -> Self
    {
        SqliteLabelStore { pool }
    }

    pub fn open(db_path: &std::path::Path) -> Result<Self>
    {
        Ok(SqliteLabelStore::new(crate::db::open(db_path)?))
    }
}

impl LabelStore for SqliteLabelStore
{
    fn insert_batch(&self, records: &[SampleRecord]) -> Result<usize>
    {
        if records.is_empty() {
            return Ok(0);
        }

        let rows = records.iter()
            .map(|r| -> Result<NewLabeledSample> {
                Ok(NewLabeledSample {
                    dsid: r.dsid,
                    label: &r.label,
                    feature: bincode::serialize(&r.feature)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut connection = self.pool.get()?;
        let inserted = queries::insert_samples(&rows, &mut connection)?;
        debug!("Inserted {} labeled samples", inserted);
        Ok(inserted)
    }

    fn find_by_dsid(&self, dsid: i64) -> Result<Vec<SampleRecord>>
    {
        let mut connection = self.pool.get()?;
        queries::get_samples_by_dsid(dsid, &mut connection)?
            .into_iter()
            .map(|LabeledSample { dsid, label, feature, .. }| -> Result<SampleRecord> {
                Ok(SampleRecord { dsid, label, feature: bincode::deserialize(&feature)? })
            })
            .collect()
    }

    fn count_by_dsid(&self, dsid: i64) -> Result<usize>
    {
        let mut connection = self.pool.get()?;
        let count = queries::count_samples_by_dsid(dsid, &mut connection)?;
        Ok(count.max(0) as usize)
    }

    fn clear_all(&self) -> Result<usize>
    {
        let mut connection = self.pool.get()?;
        Ok(queries::delete_all_samples(&mut connection)?)
    }
}

/// In-memory store for tests.
#[derive(Clone, Default)]
pub struct MemoryLabelStore
{
    records: Arc<Mutex<Vec<SampleRecord>>>,
}

impl MemoryLabelStore
{
    pub fn new() -> Self
    {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, Vec<SampleRecord>>>
    {
        self.records
            .lock()
            .map_err(|e| anyhow::anyhow!("Label store lock poisoned: {}", e).into())
    }
}

impl LabelStore for MemoryLabelStore
{
    fn insert_batch(&self, records: &[SampleRecord]) -> Result<usize>
    {
        self.records()?.extend_from_slice(records);
        Ok(records.len())
    }

    fn find_by_dsid(&self, dsid: i64) -> Result<Vec<SampleRecord>>
    {
        Ok(self.records()?.iter().filter(|r| r.dsid == dsid).cloned().collect())
    }

    fn clear_all(&self) -> Result<usize>
    {
        let mut records = self.records()?;
        let deleted = records.len();
        records.clear();
        Ok(deleted)
    }
}
