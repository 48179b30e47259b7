use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::exam_attempt::ExamAttempt;

/// Row of the append-only `audit_logs` trail.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    /// `None` when a background path (grace expiry, deadline sweep) acted.
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub details: Json<FinalizationDetails>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a finalized attempt as it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizationDetails {
    pub score: i32,
    pub total_points: i32,
    pub passed: bool,
    pub is_terminated: bool,
    pub termination_reason: Option<String>,
    pub tab_switches: i32,
}

impl From<&ExamAttempt> for FinalizationDetails {
    fn from(a: &ExamAttempt) -> Self {
        Self {
            score: a.score,
            total_points: a.total_points,
            passed: a.passed,
            is_terminated: a.is_terminated,
            termination_reason: a.termination_reason.clone(),
            tab_switches: a.tab_switches,
        }
    }
}
