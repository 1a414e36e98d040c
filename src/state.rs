use std::path::PathBuf;
use std::sync::Arc;

use crate::artifacts::ModelRepo;
use crate::config::Config;
use crate::error::Result;
use crate::store::{LabelStore, SqliteLabelStore};
use crate::training::Trainer;

/// Shared by every request handler.
#[derive(Clone)]
pub struct AppState
{
    pub store: Arc<dyn LabelStore>,
    pub trainer: Arc<Trainer>,
    pub upload_dir: PathBuf,
}

impl AppState
{
    pub fn new(store: Arc<dyn LabelStore>, trainer: Trainer, upload_dir: PathBuf) -> Self
    {
        AppState { store, trainer: Arc::new(trainer), upload_dir }
    }

    /// Opens the SQLite store and model directory named by `config`.
    pub fn from_config(config: &Config) -> Result<Self>
    {
        config.ensure_dirs()?;
        let store = SqliteLabelStore::open(&config.db_path)?;
        let trainer = Trainer::new(ModelRepo::new(&config.model_dir), config.feature_scaling);
        Ok(AppState::new(Arc::new(store), trainer, config.upload_dir.clone()))
    }
}
