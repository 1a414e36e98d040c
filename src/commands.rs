/// HTTP handlers. Each one validates its request, runs the blocking work on the
/// blocking thread pool and maps failures onto `{detail}` error responses.

use std::fs;
use std::path::{Path, PathBuf};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use log::{error, info};

use crate::error::{Error, ErrorKind, Result};
use crate::ingest;
use crate::interface::{
    DeletedResponse, ErrorResponse, InsertedResponse, MessageResponse, PredictRequest, PredictResponse,
    PrepareDatasetRequest, PrepareUserDataRequest, TrainResponse,
};
use crate::state::AppState;

const DEFAULT_WEIGHT: usize = 1;

impl IntoResponse for Error
{
    fn into_response(self) -> Response
    {
        let status = match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Processing => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { detail: self.to_string() })).into_response()
    }
}

pub fn router(state: AppState) -> Router
{
    Router::new()
        .route("/", get(health))
        .route("/prepare_dataset/", post(prepare_dataset))
        .route("/upload_png/", post(upload_png))
        .route("/prepare_user_data/", post(prepare_user_data))
        .route("/train_model/{dsid}", get(train_model))
        .route("/predict/", post(predict))
        .route("/clear_database/", delete(clear_database))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> anyhow::Result<()>
{
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| anyhow::anyhow!("Blocking task failed: {}", e))?
}

fn body<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T>
{
    payload.map(|Json(body)| body).map_err(|rejection| Error::validation(rejection.body_text()))
}

async fn health() -> Json<MessageResponse>
{
    Json(MessageResponse { message: "Arabic Handwriting Recognition API is running".to_string() })
}

async fn prepare_dataset(
        State(state): State<AppState>,
        payload: std::result::Result<Json<PrepareDatasetRequest>, JsonRejection>,
    ) -> Result<Json<InsertedResponse>>
{
    let request = body(payload)?;
    let (Some(dsid), Some(data_path)) = (request.dsid, request.data_path) else {
        return Err(Error::validation("Missing required parameters: 'dsid' and/or 'data_path'."));
    };
    let weight = request.weight.unwrap_or(DEFAULT_WEIGHT);

    let store = state.store.clone();
    let path = PathBuf::from(&data_path);
    let report = run_blocking(move || ingest::load_and_store_data(store.as_ref(), &path, dsid, weight))
        .await
        .inspect_err(|e| error!("Error preparing dataset {:?} for DSID {}: {}", data_path, dsid, e))?;

    Ok(Json(InsertedResponse {
        message: format!("Dataset prepared for DSID {dsid}"),
        inserted: report.inserted,
    }))
}

async fn upload_png(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<MessageResponse>>
{
    while let Some(field) = multipart.next_field().await.map_err(|e| Error::validation(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name()
            .and_then(sanitize_filename)
            .ok_or_else(|| Error::validation("Uploaded file has no usable filename."))?;
        let bytes = field.bytes().await.map_err(|e| Error::validation(e.body_text()))?;

        let dir = state.upload_dir.clone();
        let name = filename.clone();
        run_blocking(move || save_upload(&dir, &name, &bytes))
            .await
            .inspect_err(|e| error!("Failed to upload file {:?}: {}", filename, e))?;

        return Ok(Json(MessageResponse { message: format!("File {filename} uploaded successfully.") }));
    }
    Err(Error::validation("No file provided."))
}

/// Reduces a client-supplied filename to its final component.
fn sanitize_filename(name: &str) -> Option<String>
{
    // Clients may send Windows paths, which `Path` would not split on Unix.
    let last = name.rsplit(['/', '\\']).next()?;
    match last {
        "" | "." | ".." => None,
        _ => Some(last.to_string()),
    }
}

fn save_upload(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf>
{
    fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    fs::write(&path, bytes)?;
    info!("Saved upload to {:?}", path);
    Ok(path)
}

async fn prepare_user_data(
        State(state): State<AppState>,
        payload: std::result::Result<Json<PrepareUserDataRequest>, JsonRejection>,
    ) -> Result<Json<InsertedResponse>>
{
    let request = body(payload)?;
    let (Some(dsid), Some(samples)) = (request.dsid.filter(|&d| d != 0), request.tutorial_data) else {
        return Err(Error::validation("Missing required parameters: 'dsid' and/or 'tutorial_data'."));
    };

    let store = state.store.clone();
    let inserted = run_blocking(move || ingest::submit_samples(store.as_ref(), dsid, &samples))
        .await
        .inspect_err(|e| error!("Error storing user data for DSID {}: {}", dsid, e))?;

    Ok(Json(InsertedResponse {
        message: format!("User data for DSID {dsid} processed and stored successfully."),
        inserted,
    }))
}

async fn train_model(
        State(state): State<AppState>,
        axum::extract::Path(dsid): axum::extract::Path<i64>,
    ) -> Result<Json<TrainResponse>>
{
    let store = state.store.clone();
    let trainer = state.trainer.clone();
    let report = run_blocking(move || trainer.train(store.as_ref(), dsid))
        .await
        .inspect_err(|e| error!("Error training model for DSID {}: {}", dsid, e))?;

    Ok(Json(TrainResponse { message: "GBDT model trained successfully".to_string(), report }))
}

async fn predict(
        State(state): State<AppState>,
        payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
    ) -> Result<Json<PredictResponse>>
{
    let request = body(payload)?;
    let (Some(dsid), Some(feature)) = (
        request.dsid.filter(|&d| d != 0),
        request.feature.filter(|f| !f.is_empty()),
    ) else {
        return Err(Error::validation("Missing required parameters: 'dsid' and/or 'feature'."));
    };

    let trainer = state.trainer.clone();
    let prediction = run_blocking(move || trainer.predict(dsid, &feature))
        .await
        .inspect_err(|e| error!("Prediction failed for DSID {}: {}", dsid, e))?;

    Ok(Json(PredictResponse {
        prediction: prediction.index,
        label: prediction.label,
        probability: prediction.probability,
    }))
}

async fn clear_database(State(state): State<AppState>) -> Result<Json<DeletedResponse>>
{
    let store = state.store.clone();
    let deleted = run_blocking(move || store.clear_all())
        .await
        .inspect_err(|e| error!("Error clearing database: {}", e))?;
    info!("Cleared {} samples", deleted);

    Ok(Json(DeletedResponse { message: "Database cleared successfully.".to_string(), deleted }))
}
