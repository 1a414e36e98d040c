/// Getting labeled samples into the store: from a directory of letter images,
/// or from feature vectors the client already computed.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::interface::TutorialSample;
use crate::preprocessing::{self, FEATURE_VECTOR_LENGTH};
use crate::store::{LabelStore, SampleRecord};

const PROGRESS_EVERY: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport
{
    pub total_files: usize,
    /// Records written, counting every weighted copy.
    pub inserted: usize,
    pub skipped: usize,
}

/// Preprocesses every `.png` directly inside `data_path` and stores `weight` copies of each under `dsid`.
/// Files that fail to decode, have no recognizable label, or fail to insert are logged and skipped.
pub fn load_and_store_data(store: &dyn LabelStore, data_path: &Path, dsid: i64, weight: usize) -> Result<IngestReport>
{
    if weight == 0 {
        return Err(Error::validation("weight must be at least 1"));
    }
    if dsid < 0 {
        return Err(Error::validation(format!("Invalid dsid {dsid}")));
    }
    if !data_path.is_dir() {
        return Err(Error::PathNotFound(data_path.to_path_buf()));
    }

    let files = list_png_files(data_path);
    let total_files = files.len();
    info!("Found {} PNG files in {:?} for DSID {}", total_files, data_path, dsid);

    let mut report = IngestReport { total_files, ..Default::default() };
    for (n, (path, features)) in preprocessing::preprocess_batch(&files).into_iter().enumerate()
    {
        match build_records(&path, features, dsid, weight).and_then(|records| store.insert_batch(&records))
        {
            Ok(inserted) => report.inserted += inserted,
            Err(e) => {
                error!("Skipping {:?}: {}", path, e);
                report.skipped += 1;
            }
        }

        if (n + 1) % PROGRESS_EVERY == 0 {
            info!("Processed {}/{} files", n + 1, total_files);
        }
    }

    info!(
        "Finished ingesting {:?}: {} records inserted, {} files skipped; DSID {} now holds {} samples",
        data_path, report.inserted, report.skipped, dsid, store.count_by_dsid(dsid)?
    );
    if report.inserted == 0 {
        warn!("No data inserted for DSID {}. Check the file naming and the image contents.", dsid);
    }
    Ok(report)
}

fn list_png_files(dir: &Path) -> Vec<PathBuf>
{
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to read directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect()
}

fn build_records(path: &Path, features: Result<Vec<f32>>, dsid: i64, weight: usize) -> Result<Vec<SampleRecord>>
{
    let features = features?;
    let filename = path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::UnknownLabelPattern(path.display().to_string()))?;
    let label = preprocessing::extract_label(filename)?;
    Ok(vec![SampleRecord::new(dsid, label, features); weight])
}

/// Validates and stores feature vectors submitted for a user dataset.
pub fn submit_samples(store: &dyn LabelStore, dsid: i64, samples: &[TutorialSample]) -> Result<usize>
{
    if dsid < 1 {
        return Err(Error::validation(format!("Invalid dsid {dsid}: user datasets start at 1")));
    }
    if samples.is_empty() {
        return Err(Error::validation("tutorial_data is empty"));
    }

    let records = samples.iter()
        .enumerate()
        .map(|(i, sample)| {
            if sample.feature.len() != FEATURE_VECTOR_LENGTH {
                return Err(Error::validation(format!(
                    "Sample {i}: feature has {} values, expected {FEATURE_VECTOR_LENGTH}",
                    sample.feature.len()
                )));
            }
            if !preprocessing::is_known_label(&sample.label) {
                return Err(Error::validation(format!("Sample {i}: unknown label {:?}", sample.label)));
            }
            Ok(SampleRecord::new(dsid, sample.label.clone(), sample.feature.clone()))
        })
        .collect::<Result<Vec<_>>>()?;

    let inserted = store.insert_batch(&records)?;
    info!("Stored {} user samples for DSID {} ({} total)", inserted, dsid, store.count_by_dsid(dsid)?);
    Ok(inserted)
}
