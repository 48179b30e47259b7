use axum::{
    extract::{Path, State},
    response::Json,
};
use uuid::Uuid;

use crate::dto::exam_dto::ExamDetails;
use crate::error::{Error, Result};
use crate::models::exam_attempt::ExamAttempt;
use crate::AppState;

fn parse_exam_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| Error::InvalidExamId)
}

#[axum::debug_handler]
pub async fn get_exam(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExamDetails>> {
    let exam_id = parse_exam_id(&id)?;
    let details = state.attempt_service.exam_details(exam_id).await?;
    Ok(Json(details))
}

#[axum::debug_handler]
pub async fn list_exam_attempts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ExamAttempt>>> {
    let exam_id = parse_exam_id(&id)?;
    let attempts = state.attempt_service.exam_attempts(exam_id).await?;
    Ok(Json(attempts))
}
