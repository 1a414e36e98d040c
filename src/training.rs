/// Per-dsid training and prediction.
///
/// A dsid's training set is its own samples plus the baseline samples stored
/// under dsid 0. Training always fits from scratch; when a model already
/// exists for the dsid, only its hyperparameters are carried over.

use log::{info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::artifacts::ModelRepo;
use crate::encoder::LabelEncoder;
use crate::error::{Error, Result};
use crate::gbdt::{self, BoostParams, FeatureScaling};
use crate::store::{LabelStore, SampleRecord};

pub const BASELINE_DSID: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainReport
{
    pub dsid: i64,
    pub model_path: String,
    pub encoder_path: String,
    pub baseline_samples: usize,
    pub user_samples: usize,
    pub classes: usize,
    pub train_accuracy: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prediction
{
    pub index: usize,
    pub label: String,
    pub probability: f32,
}

pub struct Trainer
{
    repo: ModelRepo,
    scaling: FeatureScaling,
    params: BoostParams,
}

impl Trainer
{
    pub fn new(repo: ModelRepo, scaling: FeatureScaling) -> Self
    {
        Trainer { repo, scaling, params: BoostParams::default() }
    }

    /// Hyperparameters for dsids that have no model yet.
    pub fn with_params(mut self, params: BoostParams) -> Self
    {
        self.params = params;
        self
    }

    pub fn repo(&self) -> &ModelRepo
    {
        &self.repo
    }

    pub fn train(&self, store: &dyn LabelStore, dsid: i64) -> Result<TrainReport>
    {
        if dsid < 0 {
            return Err(Error::validation(format!("Invalid dsid {dsid}")));
        }

        // Serializes training runs for this dsid; predictions go through the artifact lock instead.
        let lock = self.repo.training_lock(dsid);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let baseline = store.find_by_dsid(BASELINE_DSID)?;
        let user = if dsid == BASELINE_DSID { Vec::new() } else { store.find_by_dsid(dsid)? };
        let (baseline_samples, user_samples) = (baseline.len(), user.len());
        if baseline_samples + user_samples == 0 {
            return Err(Error::NoData(dsid));
        }
        info!(
            "Training DSID {} on {} baseline and {} user samples",
            dsid, baseline_samples, user_samples
        );

        let records: Vec<SampleRecord> = baseline.into_iter().chain(user).collect();
        let x = self.feature_matrix(&records)?;
        let labels: Vec<&str> = records.iter().map(|r| r.label.as_str()).collect();
        let (encoder, y) = LabelEncoder::fit_transform(&labels);

        let params = match self.repo.load_model_if_exists(dsid) {
            Ok(Some(previous)) => {
                info!("Re-fitting DSID {} with the hyperparameters of its existing model", dsid);
                previous.params
            }
            Ok(None) => self.params.clone(),
            Err(e) => {
                warn!("Ignoring unreadable model for DSID {}: {}", dsid, e);
                self.params.clone()
            }
        };

        let model = gbdt::fit(x.view(), &y, encoder.len(), &params, self.scaling)
            .map_err(Error::Training)?;
        let train_accuracy = model.accuracy(x.view(), &y);

        let (model_path, encoder_path) = self.repo.publish(dsid, &model, &encoder)?;
        info!(
            "Trained DSID {}: {} classes, training accuracy {:.3}",
            dsid, encoder.len(), train_accuracy
        );

        Ok(TrainReport {
            dsid,
            model_path: model_path.display().to_string(),
            encoder_path: encoder_path.display().to_string(),
            baseline_samples,
            user_samples,
            classes: encoder.len(),
            train_accuracy,
        })
    }

    /// Scaled feature matrix, one row per record.
    fn feature_matrix(&self, records: &[SampleRecord]) -> Result<Array2<f32>>
    {
        let d = records.first().map_or(0, |r| r.feature.len());
        if let Some(bad) = records.iter().find(|r| r.feature.len() != d) {
            return Err(Error::Training(format!(
                "Inconsistent feature lengths: {} and {}",
                d,
                bad.feature.len()
            )));
        }

        let mut flat: Vec<f32> = records.iter().flat_map(|r| r.feature.iter().copied()).collect();
        self.scaling.apply(&mut flat);
        Array2::from_shape_vec((records.len(), d), flat)
            .map_err(|e| Error::Training(e.to_string()))
    }

    pub fn predict(&self, dsid: i64, feature: &[f32]) -> Result<Prediction>
    {
        let (model, encoder) = self.repo.load_pair(dsid)?;

        if feature.len() != model.feature_len {
            return Err(Error::validation(format!(
                "Feature has {} values, expected {}",
                feature.len(),
                model.feature_len
            )));
        }

        let mut x = feature.to_vec();
        model.scaling.apply(&mut x);
        let index = model.predict_class_index(&x);
        let label = encoder.inverse_transform(index)
            .ok_or(Error::PredictionRange { index, classes: encoder.len() })?;
        let probability = model.predict_proba(&x)[index];

        Ok(Prediction { index, label: label.to_string(), probability })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::preprocessing::{ALPHABET, FEATURE_VECTOR_LENGTH};
    use crate::store::MemoryLabelStore;

    fn letter_feature(class: usize, jitter: f32) -> Vec<f32>
    {
        let mut feature = vec![0.05 + jitter; FEATURE_VECTOR_LENGTH];
        for v in &mut feature[class * 16..class * 16 + 16]
        {
            *v = 0.9 - jitter;
        }
        feature
    }

    fn seed(store: &MemoryLabelStore, dsid: i64, classes: usize)
    {
        let records: Vec<_> = (0..classes)
            .flat_map(|c| (0..4).map(move |j| SampleRecord::new(dsid, ALPHABET[c], letter_feature(c, j as f32 * 0.01))))
            .collect();
        store.insert_batch(&records).unwrap();
    }

    fn trainer(dir: &std::path::Path, scaling: FeatureScaling) -> Trainer
    {
        Trainer::new(ModelRepo::new(dir.join("models")), scaling)
            .with_params(BoostParams { rounds: 15, ..BoostParams::default() })
    }

    #[test]
    fn empty_union_is_no_data_and_writes_nothing()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Legacy255);
        let store = MemoryLabelStore::new();

        assert!(matches!(trainer.train(&store, 5), Err(Error::NoData(5))));
        assert!(!trainer.repo().model_path(5).exists());
        assert!(!trainer.repo().encoder_path(5).exists());
    }

    #[test]
    fn train_then_predict()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Legacy255);
        let store = MemoryLabelStore::new();
        seed(&store, BASELINE_DSID, 3);
        seed(&store, 7, 4);

        let report = trainer.train(&store, 7).unwrap();
        assert_eq!(report.baseline_samples, 12);
        assert_eq!(report.user_samples, 16);
        assert_eq!(report.classes, 4);
        assert!(report.train_accuracy > 0.9);

        let prediction = trainer.predict(7, &letter_feature(3, 0.0)).unwrap();
        assert!(prediction.index < report.classes);
        assert_eq!(prediction.label, ALPHABET[3]);
        assert!(prediction.probability > 0.0 && prediction.probability <= 1.0);

        assert!(matches!(trainer.predict(99, &letter_feature(0, 0.0)), Err(Error::ModelNotFound(99))));
        assert!(matches!(trainer.predict(7, &[0.5; 3]), Err(Error::Validation(_))));
    }

    #[test]
    fn encoder_round_trips_trained_labels()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Identity);
        let store = MemoryLabelStore::new();
        seed(&store, 2, 5);

        trainer.train(&store, 2).unwrap();
        let encoder = trainer.repo().load_encoder(2).unwrap();
        for label in &ALPHABET[..5]
        {
            let idx = encoder.transform(&[label]).unwrap()[0];
            assert_eq!(encoder.inverse_transform(idx), Some(*label));
        }
    }

    #[test]
    fn retrain_keeps_hyperparameters_and_recorded_scaling()
    {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryLabelStore::new();
        seed(&store, 4, 2);

        trainer(dir.path(), FeatureScaling::Identity).train(&store, 4).unwrap();

        // A second service instance with different defaults re-fits with the stored rounds.
        let other = Trainer::new(ModelRepo::new(dir.path().join("models")), FeatureScaling::Legacy255)
            .with_params(BoostParams { rounds: 3, ..BoostParams::default() });
        seed(&store, 4, 3);
        let report = other.train(&store, 4).unwrap();
        assert_eq!(report.classes, 3);

        let model = other.repo().load_model(4).unwrap();
        assert_eq!(model.stumps.len(), 15);
        assert_eq!(model.scaling, FeatureScaling::Legacy255);
        assert_eq!(other.predict(4, &letter_feature(2, 0.0)).unwrap().label, ALPHABET[2]);
    }

    #[test]
    fn missing_encoder_is_reported()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Identity);
        let store = MemoryLabelStore::new();
        seed(&store, 6, 2);
        trainer.train(&store, 6).unwrap();

        std::fs::remove_file(trainer.repo().encoder_path(6)).unwrap();
        assert!(matches!(trainer.predict(6, &letter_feature(0, 0.0)), Err(Error::EncoderNotFound(6))));
    }

    #[test]
    fn index_beyond_encoder_is_out_of_range()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Identity);
        let store = MemoryLabelStore::new();
        seed(&store, 8, 3);
        trainer.train(&store, 8).unwrap();

        // An encoder that knows fewer classes than the model predicts.
        let short = LabelEncoder::fit(&[ALPHABET[0]]);
        std::fs::write(trainer.repo().encoder_path(8), serde_json::to_vec(&short).unwrap()).unwrap();

        match trainer.predict(8, &letter_feature(2, 0.0))
        {
            Err(Error::PredictionRange { index, classes }) => assert_eq!((index, classes), (2, 1)),
            other => panic!("expected PredictionRange, got {other:?}"),
        }
    }

    #[test]
    fn predict_is_not_blocked_by_a_training_run()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Identity);
        let store = MemoryLabelStore::new();
        seed(&store, 9, 2);
        trainer.train(&store, 9).unwrap();

        // Holding the training lock stands in for a fit in progress.
        let training = trainer.repo().training_lock(9);
        let _guard = training.lock().unwrap();
        assert_eq!(trainer.predict(9, &letter_feature(1, 0.0)).unwrap().label, ALPHABET[1]);
    }

    #[test]
    fn single_class_fails_as_training_error()
    {
        let dir = tempfile::tempdir().unwrap();
        let trainer = trainer(dir.path(), FeatureScaling::Identity);
        let store = MemoryLabelStore::new();
        seed(&store, 1, 1);
        assert!(matches!(trainer.train(&store, 1), Err(Error::Training(_))));
        assert!(!trainer.repo().model_path(1).exists());
    }
}
