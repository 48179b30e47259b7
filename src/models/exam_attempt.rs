use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::BTreeMap;
use uuid::Uuid;

pub type AnswerMap = BTreeMap<String, String>;

pub const REASON_TAB_SWITCHES: &str = "tab_switches_exceeded";
pub const REASON_LATE_SUBMISSION: &str = "time_limit_exceeded_server_validation";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamAttempt {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub student_id: Uuid,
    #[serde(skip_serializing)]
    pub exam_token: Option<String>,
    pub device_fingerprint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub score: i32,
    pub total_points: i32,
    pub percentage: Option<Decimal>,
    pub passed: bool,
    pub is_terminated: bool,
    pub termination_reason: Option<String>,
    pub tab_switches: i32,
    pub answers: Json<AnswerMap>,
    /// When `answers` was last written; orders the row against cached autosaves.
    #[serde(skip_serializing)]
    pub answers_saved_at: Option<DateTime<Utc>>,
    pub snapshots: Json<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Autosaved answers together with the time they were saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedAnswers {
    pub saved_at: DateTime<Utc>,
    pub answers: AnswerMap,
}

impl ExamAttempt {
    pub fn is_open(&self) -> bool {
        self.submitted_at.is_none() && !self.is_terminated
    }

    /// Whether a cached autosave saved at `saved_at` is newer than the stored answers.
    pub fn answers_older_than(&self, saved_at: DateTime<Utc>) -> bool {
        self.answers_saved_at.map_or(true, |stored| stored < saved_at)
    }

    pub fn status(&self) -> &'static str {
        if self.is_terminated {
            "terminated"
        } else if self.submitted_at.is_some() {
            "submitted"
        } else {
            "in_progress"
        }
    }
}
