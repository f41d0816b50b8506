// HTTP request handlers
use crate::application::selection::SelectGesture;
use crate::application::frame::ViewOptions;
use crate::domain::export::ExportRequest;
use crate::domain::segment::SegmentDraft;
use crate::domain::{SegmentId, SensorId, TestId};
use crate::error::{AnalysisError, ErrorKind};
use crate::infrastructure::chunked_json::stream_progress;
use crate::infrastructure::http_response::{attachment_response, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type Shared = State<Arc<AppState>>;

#[derive(Deserialize)]
pub struct FrameQuery {
    pub viewport_height: Option<u32>,
}

#[derive(Deserialize)]
pub struct ToggleBody {
    pub sensor_id: SensorId,
    #[serde(default)]
    pub gesture: SelectGesture,
}

#[derive(Deserialize)]
pub struct CropBoundsBody {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct CropConfirmBody {
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

/// Maps analysis errors onto HTTP statuses.
pub struct ApiError(AnalysisError);

impl From<AnalysisError> for ApiError {
    fn from(e: AnalysisError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::Job => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::warn!("Request rejected: {}", self.0);
        }
        let body = ErrorBody {
            kind: self.0.kind(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Check if client accepts Brotli compression
fn accepts_brotli(headers: &HeaderMap) -> bool {
    headers
        .get("accept-encoding")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.contains("br"))
        .unwrap_or(false)
}

async fn reply<T: Serialize>(headers: &HeaderMap, data: &T) -> Response {
    match json_response(StatusCode::OK, data, accepts_brotli(headers)).await {
        Ok(response) => response,
        Err(status) => status.into_response(),
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn open_session(
    Path(test_id): Path<TestId>,
    Query(query): Query<FrameQuery>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let frame = state
        .analysis_service
        .open_session(test_id, query.viewport_height)
        .await?;
    Ok(reply(&headers, &frame).await)
}

pub async fn close_session(Path(test_id): Path<TestId>, State(state): Shared) -> ApiResult {
    state.analysis_service.close_session(test_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn get_frame(
    Path(test_id): Path<TestId>,
    Query(query): Query<FrameQuery>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let frame = state
        .analysis_service
        .frame(test_id, query.viewport_height)
        .await?;
    Ok(reply(&headers, &frame).await)
}

pub async fn toggle_sensor(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
    Json(body): Json<ToggleBody>,
) -> ApiResult {
    let frame = state
        .analysis_service
        .toggle_sensor(test_id, body.sensor_id, body.gesture)
        .await?;
    Ok(reply(&headers, &frame).await)
}

pub async fn set_view(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
    Json(view): Json<ViewOptions>,
) -> ApiResult {
    let frame = state.analysis_service.set_view(test_id, view).await?;
    Ok(reply(&headers, &frame).await)
}

pub async fn refresh(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let frame = state.analysis_service.refresh(test_id).await?;
    Ok(reply(&headers, &frame).await)
}

pub async fn list_segments(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let segments = state.analysis_service.list_segments(test_id).await?;
    Ok(reply(&headers, &segments).await)
}

pub async fn create_segment(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
    Json(draft): Json<SegmentDraft>,
) -> ApiResult {
    let segment = state.analysis_service.create_segment(test_id, draft).await?;
    Ok(reply(&headers, &segment).await)
}

pub async fn update_segment(
    Path((test_id, segment_id)): Path<(TestId, SegmentId)>,
    headers: HeaderMap,
    State(state): Shared,
    Json(draft): Json<SegmentDraft>,
) -> ApiResult {
    let segment = state
        .analysis_service
        .update_segment(test_id, segment_id, draft)
        .await?;
    Ok(reply(&headers, &segment).await)
}

pub async fn delete_segment(
    Path((test_id, segment_id)): Path<(TestId, SegmentId)>,
    State(state): Shared,
) -> ApiResult {
    state
        .analysis_service
        .delete_segment(test_id, segment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn click_segment(
    Path((test_id, segment_id)): Path<(TestId, SegmentId)>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let selected = state
        .analysis_service
        .click_segment(test_id, segment_id)
        .await?;
    Ok(reply(&headers, &serde_json::json!({ "selected_segment": selected })).await)
}

pub async fn begin_segment_edit(
    Path((test_id, segment_id)): Path<(TestId, SegmentId)>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let edit = state
        .analysis_service
        .begin_segment_edit(test_id, segment_id)
        .await?;
    Ok(reply(&headers, &edit).await)
}

pub async fn cancel_segment_edit(
    Path((test_id, _segment_id)): Path<(TestId, SegmentId)>,
    State(state): Shared,
) -> ApiResult {
    state.analysis_service.cancel_segment_edit(test_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn begin_crop(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let bounds = state.analysis_service.begin_crop(test_id).await?;
    Ok(reply(&headers, &bounds).await)
}

pub async fn set_crop_bounds(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
    Json(body): Json<CropBoundsBody>,
) -> ApiResult {
    let preview = state
        .analysis_service
        .set_crop_bounds(test_id, body.start, body.end)
        .await?;
    Ok(reply(&headers, &preview).await)
}

pub async fn confirm_crop(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
    Json(body): Json<CropConfirmBody>,
) -> ApiResult {
    let outcome = state
        .analysis_service
        .confirm_crop(test_id, body.confirmed)
        .await?;
    Ok(reply(&headers, &outcome).await)
}

pub async fn cancel_crop(Path(test_id): Path<TestId>, State(state): Shared) -> ApiResult {
    state.analysis_service.cancel_crop(test_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn submit_export(
    Path(test_id): Path<TestId>,
    State(state): Shared,
    Json(request): Json<ExportRequest>,
) -> ApiResult {
    state
        .analysis_service
        .submit_export(test_id, request)
        .await?;
    Ok(StatusCode::ACCEPTED.into_response())
}

/// Chunked stream of export progress frames, ending when the indicator clears
pub async fn export_progress(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let rx = state.analysis_service.export_progress(test_id).await?;
    Ok(stream_progress(rx, accepts_brotli(&headers)).into_response())
}

pub async fn download_export(Path(test_id): Path<TestId>, State(state): Shared) -> ApiResult {
    let artifact = state.analysis_service.take_export(test_id).await?;
    Ok(match attachment_response(artifact) {
        Ok(response) => response,
        Err(status) => status.into_response(),
    })
}

pub async fn list_notices(
    Path(test_id): Path<TestId>,
    headers: HeaderMap,
    State(state): Shared,
) -> ApiResult {
    let notices = state.analysis_service.notices(test_id).await?;
    Ok(reply(&headers, &notices).await)
}

pub async fn dismiss_notice(
    Path((test_id, notice_id)): Path<(TestId, u64)>,
    State(state): Shared,
) -> ApiResult {
    if state
        .analysis_service
        .dismiss_notice(test_id, notice_id)
        .await?
    {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Ok(StatusCode::NOT_FOUND.into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_error_statuses() {
        let status = |e: AnalysisError| ApiError::from(e).status();
        assert_eq!(
            status(AnalysisError::validation("bad")),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status(AnalysisError::conflict("busy")), StatusCode::CONFLICT);
        assert_eq!(status(AnalysisError::SessionNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(
            status(AnalysisError::Server {
                status: 500,
                body: String::new()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_accepts_brotli() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_brotli(&headers));
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, br"));
        assert!(accepts_brotli(&headers));
    }
}
