//! Handlers for submitting render jobs and fetching their results.
//!
//! `POST /convert` authenticates by HMAC signature over the exact request
//! bytes, so the body is taken as raw [`Bytes`] and only parsed after the
//! signature checks out.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use urlpdf_core::convert::ConvertRequest;
use urlpdf_core::error::CoreError;
use urlpdf_core::job::{JobId, JobStatus};
use urlpdf_core::signature::{verify_signature, SIGNATURE_HEADER};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub id: JobId,
    pub status: JobStatus,
    pub error_msg: Option<String>,
}

/// Presence of `download` (with any value, or none) requests an attachment.
#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub download: Option<String>,
}

/// POST /apiv1/convert
pub async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<ConvertResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if !verify_signature(&state.config.worker_secret, &body, signature) {
        tracing::warn!(
            has_signature = signature.is_some(),
            body_len = body.len(),
            "Rejected convert request with invalid signature",
        );
        return Err(AppError::Core(CoreError::Forbidden(
            "Invalid signature".to_string(),
        )));
    }

    let request: ConvertRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {e}")))?;
    request.validate()?;

    let job = state.scheduler.submit(request).await?;
    Ok(Json(ConvertResponse {
        id: job.id,
        status: job.status,
    }))
}

/// GET /apiv1/status/{id}
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let job = state.jobs.status(&JobId::from_raw(id)).await?;
    Ok(Json(StatusResponse {
        id: job.id,
        status: job.status,
        error_msg: job.error_msg,
    }))
}

/// GET /apiv1/download/{id}[?download]
///
/// Serves the PDF inline, or as an attachment named after the request's
/// `fileName` (falling back to `<id>.pdf`) when `download` is present.
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DownloadParams>,
) -> AppResult<Response> {
    let job = state.jobs.status(&JobId::from_raw(id)).await?;

    if job.status != JobStatus::Finished {
        return Err(AppError::BadRequest(format!(
            "PDF is not ready yet (status: {})",
            job.status
        )));
    }
    if let Some(error) = &job.error_msg {
        return Err(AppError::BadRequest(format!("PDF conversion failed: {error}")));
    }

    let pdf = match tokio::fs::read(&job.output_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "PDF file",
                id: job.id.short().to_string(),
            }))
        }
        Err(e) => {
            return Err(AppError::InternalError(format!(
                "Reading {}: {e}",
                job.output_path.display()
            )))
        }
    };

    let file_name = job.file_name.unwrap_or_else(|| job.id.file_name());
    let disposition = if params.download.is_some() {
        "attachment"
    } else {
        "inline"
    };
    let disposition = HeaderValue::from_str(&format!(
        "{disposition}; filename=\"{}\"",
        file_name.replace('"', "")
    ))
    .map_err(|e| AppError::InternalError(format!("Invalid Content-Disposition: {e}")))?;

    tracing::debug!(job_id = %job.id.short(), bytes = pdf.len(), "Serving PDF");

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (CONTENT_DISPOSITION, disposition),
            (CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        pdf,
    )
        .into_response())
}
