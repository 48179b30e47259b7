use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::exam_attempt::{AnswerMap, ExamAttempt};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StartAttemptRequest {
    /// Kept as text so a malformed id maps to `invalid_exam_id` instead of a body rejection.
    #[validate(length(min = 1))]
    pub exam_id: String,
    #[validate(length(min = 1, max = 512))]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProgressRequest {
    pub attempt_id: Uuid,
    pub answers: Option<AnswerMap>,
    #[validate(length(min = 1))]
    pub snapshot: Option<String>,
    #[validate(range(min = 0))]
    pub tab_switches: Option<i32>,
    pub exam_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitRequest {
    pub attempt_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Started,
    Resumed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAttemptResponse {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Seconds remaining, floored at zero.
    pub time_left: i64,
    pub exam_token: String,
    pub status: StartStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answers: Option<AnswerMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab_switches: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Ok,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: ProgressStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub tab_switches: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub score: i32,
    pub total_points: i32,
    pub passed: bool,
    pub submitted_at: DateTime<Utc>,
}

/// Attempt without answers, snapshots or token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub tab_switches: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_points: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
}

impl From<&ExamAttempt> for AttemptSummary {
    fn from(a: &ExamAttempt) -> Self {
        let finished = a.submitted_at.is_some();
        Self {
            id: a.id,
            exam_id: a.exam_id,
            student_id: a.student_id,
            status: a.status().to_string(),
            started_at: a.started_at,
            submitted_at: a.submitted_at,
            tab_switches: a.tab_switches,
            score: finished.then_some(a.score),
            total_points: finished.then_some(a.total_points),
            percentage: if finished { a.percentage } else { None },
            passed: finished.then_some(a.passed),
            termination_reason: a.termination_reason.clone(),
        }
    }
}

/// Response of `GET /api/attempts/:id`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AttemptView {
    Full(ExamAttempt),
    Summary(AttemptSummary),
}

/// Query string of the live exam connection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SocketQuery {
    pub attempt_id: Option<String>,
    pub token: Option<String>,
    pub fingerprint: Option<String>,
}
