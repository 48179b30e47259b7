use axum::{
    extract::{Path, State},
    response::Json,
    Extension,
};
use uuid::Uuid;

use crate::dto::attempt_dto::{
    AttemptSummary, AttemptView, ProgressRequest, ProgressResponse, StartAttemptRequest,
    StartAttemptResponse, SubmitRequest, SubmitResponse,
};
use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::AppState;

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<Json<StartAttemptResponse>> {
    let student_id = claims.user_id()?;
    let response = state.attempt_service.start(student_id, req).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn update_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ProgressRequest>,
) -> Result<Json<ProgressResponse>> {
    let student_id = claims.user_id()?;
    let response = state.attempt_service.progress(student_id, req).await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn submit_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>> {
    let student_id = claims.user_id()?;
    let response = state
        .attempt_service
        .submit(student_id, req.attempt_id)
        .await?;
    Ok(Json(response))
}

#[axum::debug_handler]
pub async fn get_attempt(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<AttemptView>> {
    let attempt_id = Uuid::parse_str(id.trim())
        .map_err(|_| Error::BadRequest("attempt id must be a uuid".to_string()))?;
    let view = state.attempt_service.attempt_view(attempt_id, &claims).await?;
    Ok(Json(view))
}

#[axum::debug_handler]
pub async fn list_my_attempts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<AttemptSummary>>> {
    let student_id = claims.user_id()?;
    let attempts = state.attempt_service.student_attempts(student_id).await?;
    Ok(Json(attempts))
}
