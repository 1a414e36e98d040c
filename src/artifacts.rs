/// On-disk model artifacts: one (classifier, label encoder) pair per dsid.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};

use log::{error, info};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::encoder::LabelEncoder;
use crate::error::{Error, Result};
use crate::gbdt::GbdtClassifier;

pub const MODEL_ALGORITHM: &str = "GBDT";

/// Per-dsid locks that exist only while someone holds them.
struct LockRegistry<T>
{
    entries: Mutex<HashMap<i64, Weak<T>>>,
}

impl<T: Default> LockRegistry<T>
{
    fn new() -> Self
    {
        LockRegistry { entries: Mutex::new(HashMap::new()) }
    }

    fn get(&self, dsid: i64) -> Arc<T>
    {
        // Entries are only Weak handles, so a poisoned guard still holds a usable map.
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, lock| lock.strong_count() > 0);
        if let Some(lock) = entries.get(&dsid).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(T::default());
        entries.insert(dsid, Arc::downgrade(&lock));
        lock
    }

    #[cfg(test)]
    fn live_entries(&self) -> usize
    {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|lock| lock.strong_count() > 0).count()
    }
}

/// Training runs for a dsid are serialized by its training lock. Reading and
/// publishing the (model, encoder) pair go through a separate short-lived
/// read/write lock, so predictions never wait on a fit.
pub struct ModelRepo
{
    root: PathBuf,
    training: LockRegistry<Mutex<()>>,
    artifacts: LockRegistry<RwLock<()>>,
}

impl ModelRepo
{
    pub fn new(root: impl Into<PathBuf>) -> Self
    {
        ModelRepo { root: root.into(), training: LockRegistry::new(), artifacts: LockRegistry::new() }
    }

    pub fn root(&self) -> &Path
    {
        &self.root
    }

    pub fn model_path(&self, dsid: i64) -> PathBuf
    {
        self.root.join(format!("model_dsid_{dsid}_{MODEL_ALGORITHM}.json"))
    }

    pub fn encoder_path(&self, dsid: i64) -> PathBuf
    {
        self.root.join(format!("label_encoder_dsid_{dsid}.json"))
    }

    /// Hold its guard for a whole train-and-publish sequence.
    pub fn training_lock(&self, dsid: i64) -> Arc<Mutex<()>>
    {
        self.training.get(dsid)
    }

    pub fn load_model(&self, dsid: i64) -> Result<GbdtClassifier>
    {
        let lock = self.artifacts.get(dsid);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        self.read_model(dsid)
    }

    /// Like `load_model`, but a missing artifact is `None` rather than an error.
    pub fn load_model_if_exists(&self, dsid: i64) -> Result<Option<GbdtClassifier>>
    {
        match self.load_model(dsid) {
            Ok(model) => Ok(Some(model)),
            Err(Error::ModelNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn load_encoder(&self, dsid: i64) -> Result<LabelEncoder>
    {
        let lock = self.artifacts.get(dsid);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        self.read_encoder(dsid)
    }

    /// Loads the model and encoder of one training run together.
    pub fn load_pair(&self, dsid: i64) -> Result<(GbdtClassifier, LabelEncoder)>
    {
        if !self.model_path(dsid).is_file() {
            return Err(Error::ModelNotFound(dsid));
        }
        let lock = self.artifacts.get(dsid);
        let _guard = lock.read().unwrap_or_else(|e| e.into_inner());
        Ok((self.read_model(dsid)?, self.read_encoder(dsid)?))
    }

    fn read_model(&self, dsid: i64) -> Result<GbdtClassifier>
    {
        let path = self.model_path(dsid);
        if !path.is_file() {
            return Err(Error::ModelNotFound(dsid));
        }
        let model: GbdtClassifier = read_json(&path)?;
        model.validate()
            .map_err(|e| anyhow::anyhow!("Invalid model file {:?}: {}", path, e))?;
        Ok(model)
    }

    fn read_encoder(&self, dsid: i64) -> Result<LabelEncoder>
    {
        let path = self.encoder_path(dsid);
        if !path.is_file() {
            return Err(Error::EncoderNotFound(dsid));
        }
        read_json(&path)
    }

    /// Writes both artifacts to temp files in the model directory, then renames them into place,
    /// encoder first. Nothing is renamed unless both writes succeeded. If the model rename fails
    /// the new encoder is removed again, so a model is never served with another run's encoder.
    pub fn publish(&self, dsid: i64, model: &GbdtClassifier, encoder: &LabelEncoder) -> Result<(PathBuf, PathBuf)>
    {
        fs::create_dir_all(&self.root)?;

        let model_tmp = self.write_temp(model)?;
        let encoder_tmp = self.write_temp(encoder)?;

        let model_path = self.model_path(dsid);
        let encoder_path = self.encoder_path(dsid);

        let lock = self.artifacts.get(dsid);
        let _guard = lock.write().unwrap_or_else(|e| e.into_inner());
        encoder_tmp.persist(&encoder_path).map_err(|e| e.error)?;
        if let Err(e) = model_tmp.persist(&model_path) {
            error!(
                "Failed to publish model for DSID {} after its encoder was written; removing {:?}: {}",
                dsid, encoder_path, e.error
            );
            if let Err(remove_err) = fs::remove_file(&encoder_path) {
                error!("Could not remove {:?}: {}", encoder_path, remove_err);
            }
            return Err(e.error.into());
        }

        info!("Published model artifacts for DSID {} to {:?}", dsid, self.root);
        Ok((model_path, encoder_path))
    }

    fn write_temp<T: Serialize>(&self, value: &T) -> Result<NamedTempFile>
    {
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, value)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T>
{
    let file = fs::File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::gbdt::{fit, BoostParams, FeatureScaling};
    use ndarray::array;

    fn tiny_model() -> GbdtClassifier
    {
        let x = array![[0.0f32, 1.0], [0.1, 0.9], [1.0, 0.0], [0.9, 0.1]];
        let params = BoostParams { rounds: 5, ..BoostParams::default() };
        fit(x.view(), &[0, 0, 1, 1], 2, &params, FeatureScaling::Identity).unwrap()
    }

    #[test]
    fn paths_keep_naming_scheme()
    {
        let repo = ModelRepo::new("models");
        assert_eq!(repo.model_path(7), PathBuf::from("models/model_dsid_7_GBDT.json"));
        assert_eq!(repo.encoder_path(7), PathBuf::from("models/label_encoder_dsid_7.json"));
    }

    #[test]
    fn missing_artifacts_are_not_found()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path());
        assert!(matches!(repo.load_model(99), Err(Error::ModelNotFound(99))));
        assert!(matches!(repo.load_encoder(99), Err(Error::EncoderNotFound(99))));
        assert!(repo.load_model_if_exists(99).unwrap().is_none());
    }

    #[test]
    fn publish_then_load()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path().join("models"));
        let model = tiny_model();
        let encoder = LabelEncoder::fit(&["ا", "ب"]);

        let (model_path, encoder_path) = repo.publish(3, &model, &encoder).unwrap();
        assert!(model_path.is_file());
        assert!(encoder_path.is_file());

        let loaded = repo.load_model(3).unwrap();
        assert_eq!(loaded.stumps, model.stumps);
        assert_eq!(loaded.scaling, FeatureScaling::Identity);
        assert_eq!(repo.load_encoder(3).unwrap(), encoder);

        // Only the two artifacts remain; no temp files are left behind.
        assert_eq!(fs::read_dir(repo.root()).unwrap().count(), 2);
    }

    #[test]
    fn corrupt_model_is_a_processing_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path());
        fs::write(repo.model_path(4), b"{not json").unwrap();
        let err = repo.load_model(4).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Processing);
    }

    #[test]
    fn locks_are_shared_per_dsid_and_released()
    {
        let repo = ModelRepo::new("models");
        let held = repo.training_lock(1);
        assert!(Arc::ptr_eq(&held, &repo.training_lock(1)));
        assert!(!Arc::ptr_eq(&held, &repo.training_lock(2)));
        assert_eq!(repo.training.live_entries(), 1);
        drop(held);
        assert_eq!(repo.training.live_entries(), 0);
    }

    #[test]
    fn lookups_of_unknown_dsids_leave_no_locks_behind()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path());
        for dsid in 0..1000
        {
            assert!(matches!(repo.load_pair(dsid), Err(Error::ModelNotFound(_))));
            assert!(repo.load_model(dsid).is_err());
        }
        assert_eq!(repo.artifacts.live_entries(), 0);
        assert!(repo.artifacts.entries.lock().unwrap().len() <= 1);
    }

    #[test]
    fn reads_do_not_wait_on_training()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path());
        repo.publish(3, &tiny_model(), &LabelEncoder::fit(&["ا", "ب"])).unwrap();

        // Same thread: if reads shared the training lock this would deadlock.
        let training = repo.training_lock(3);
        let _guard = training.lock().unwrap();
        let (model, encoder) = repo.load_pair(3).unwrap();
        assert_eq!(model.n_classes, encoder.len());
        repo.publish(3, &model, &encoder).unwrap();
    }

    #[test]
    fn failed_model_rename_does_not_leave_a_mismatched_encoder()
    {
        let dir = tempfile::tempdir().unwrap();
        let repo = ModelRepo::new(dir.path());
        // A directory in the model's place makes the final rename fail.
        fs::create_dir_all(repo.model_path(5)).unwrap();

        assert!(repo.publish(5, &tiny_model(), &LabelEncoder::fit(&["ا", "ب"])).is_err());
        assert!(!repo.encoder_path(5).exists());
        assert!(matches!(repo.load_encoder(5), Err(Error::EncoderNotFound(5))));
    }
}
