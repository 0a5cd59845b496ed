use super::AppState;
use crate::application::coordinator::SubmitError;
use crate::domain::jobs::JobStatus;
use crate::ports::storage::StorageError;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub file_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub message: String,
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub progress: u8,
}

pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), (StatusCode, String)> {
    match state.coordinator.submit(&request.file_path).await {
        Ok(job_id) => Ok((
            StatusCode::ACCEPTED,
            Json(AnalyzeResponse {
                message: "Analysis started".to_string(),
                job_id,
            }),
        )),
        Err(err) => {
            let status = match &err {
                SubmitError::AlreadyRunning(_) => StatusCode::CONFLICT,
                SubmitError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
                SubmitError::Storage(StorageError::InvalidReference(_)) => StatusCode::BAD_REQUEST,
                SubmitError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            warn!("Rejected analysis of {:?}: {}", request.file_path, err);
            Err((status, err.to_string()))
        }
    }
}

pub async fn progress(State(state): State<AppState>) -> Json<ProgressResponse> {
    Json(ProgressResponse {
        progress: state.coordinator.current_progress(),
    })
}

/// Measurements of the last successful job, `{}` before any job completed.
pub async fn result(State(state): State<AppState>) -> Json<Value> {
    match state.coordinator.current_result() {
        Some(result) => Json(serde_json::to_value(result.as_ref()).unwrap_or(Value::Null)),
        None => Json(Value::Object(Default::default())),
    }
}

pub async fn status(State(state): State<AppState>) -> Json<JobStatus> {
    Json(state.coordinator.current_status())
}
