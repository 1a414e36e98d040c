use std::path::PathBuf;

/// Coarse error classes. These are the only distinctions exposed to clients,
/// through the HTTP status code chosen in `commands`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind
{
    Validation,
    NotFound,
    Processing,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("Dataset path not found: {0:?}")]
    PathNotFound(PathBuf),
    #[error("Image not found or unreadable: {path:?}: {reason}")]
    Preprocessing { path: PathBuf, reason: String },
    #[error("Unknown filename pattern: {0}")]
    UnknownLabelPattern(String),
    #[error("No datapoints found for DSID {0}")]
    NoData(i64),
    #[error("Training failed: {0}")]
    Training(String),
    #[error("Model file not found for DSID {0}")]
    ModelNotFound(i64),
    #[error("Label encoder file not found for DSID {0}")]
    EncoderNotFound(i64),
    #[error("Prediction index {index} out of range for {classes} classes")]
    PredictionRange { index: usize, classes: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error
{
    pub fn kind(&self) -> ErrorKind
    {
        match self
        {
            Error::Validation(_)
            | Error::UnknownLabelPattern(_)
            | Error::PredictionRange { .. } => ErrorKind::Validation,
            Error::PathNotFound(_)
            | Error::NoData(_)
            | Error::ModelNotFound(_)
            | Error::EncoderNotFound(_) => ErrorKind::NotFound,
            _ => ErrorKind::Processing,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self
    {
        Error::Validation(msg.into())
    }
}
