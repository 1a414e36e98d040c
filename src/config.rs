use std::fs;
use std::path::PathBuf;

use crate::gbdt::FeatureScaling;

/// Service configuration. Every option can also be set through its environment variable.
#[derive(clap::Args, Debug, Clone)]
pub struct Config
{
    /// SQLite database holding the labeled samples
    #[arg(long, env = "HWR_DB_PATH", default_value = "data/handwriting.db")]
    pub db_path: PathBuf,

    /// Directory the trained models and label encoders are written to
    #[arg(long, env = "HWR_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Directory uploaded images are saved to
    #[arg(long, env = "HWR_UPLOAD_DIR", default_value = "datasets/userdata")]
    pub upload_dir: PathBuf,

    /// Feature scaling applied before training: legacy255 or identity
    #[arg(long, env = "HWR_FEATURE_SCALING", default_value = "legacy255")]
    pub feature_scaling: FeatureScaling,
}

impl Config
{
    /// Creates the model and upload directories. The database directory is created when the pool opens.
    pub fn ensure_dirs(&self) -> std::io::Result<()>
    {
        fs::create_dir_all(&self.model_dir)?;
        fs::create_dir_all(&self.upload_dir)?;
        Ok(())
    }
}
