use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::audit_entry::{AuditEntry, FinalizationDetails};
use crate::models::exam_attempt::ExamAttempt;

pub const ENTITY_ATTEMPT: &str = "exam_attempt";

#[derive(Clone)]
pub struct AuditService {
    pool: PgPool,
}

impl AuditService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends the result of a finalization to the trail.
    pub async fn record_finalization(
        &self,
        actor_id: Option<Uuid>,
        action: &str,
        attempt: &ExamAttempt,
    ) -> Result<AuditEntry> {
        let details = FinalizationDetails::from(attempt);
        let entry = sqlx::query_as::<_, AuditEntry>(
            r#"
            INSERT INTO audit_logs (actor_id, action, entity_type, entity_id, details)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(actor_id)
        .bind(action)
        .bind(ENTITY_ATTEMPT)
        .bind(attempt.id)
        .bind(Json(&details))
        .fetch_one(&self.pool)
        .await?;
        Ok(entry)
    }

    pub async fn for_attempt(&self, attempt_id: Uuid) -> Result<Vec<AuditEntry>> {
        let entries = sqlx::query_as::<_, AuditEntry>(
            r#"
            SELECT * FROM audit_logs
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(ENTITY_ATTEMPT)
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }
}
