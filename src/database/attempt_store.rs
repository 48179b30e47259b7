use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{is_unique_violation, Error, Result};
use crate::models::exam::Exam;
use crate::models::exam_attempt::{AnswerMap, ExamAttempt};
use crate::models::question::Question;
use crate::utils::token::generate_session_token;

/// Outcome of the start transaction.
#[derive(Debug, Clone)]
pub enum Admission {
    Started(ExamAttempt),
    Resumed(ExamAttempt),
}

impl Admission {
    pub fn attempt(&self) -> &ExamAttempt {
        match self {
            Admission::Started(a) | Admission::Resumed(a) => a,
        }
    }
}

/// Terminal values written once when an attempt is finalized.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub submitted_at: DateTime<Utc>,
    pub score: i32,
    pub total_points: i32,
    pub percentage: Decimal,
    pub passed: bool,
    pub terminated: bool,
    pub reason: Option<String>,
    /// Replaces the stored answers when present.
    pub answers: Option<AnswerMap>,
    /// Raises the stored counter when present.
    pub tab_switches: Option<i32>,
}

/// Durable repository of exams, questions and attempts.
///
/// Every statement that mutates an attempt is guarded by `submitted_at IS NULL`, so a finalized
/// row is never written again.
#[derive(Clone)]
pub struct AttemptStore {
    pool: PgPool,
}

impl AttemptStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn find_exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exam)
    }

    pub async fn exam_questions(&self, exam_id: Uuid) -> Result<Vec<Question>> {
        let questions = sqlx::query_as::<_, Question>(
            r#"SELECT * FROM questions WHERE exam_id = $1 ORDER BY order_number, id"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(questions)
    }

    /// Resumes the open attempt for the pair or creates the first one.
    ///
    /// Only finalized attempts count against the one-attempt limit. A start that loses the insert
    /// race to a concurrent start resumes the winner's attempt.
    pub async fn create_or_resume(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        fingerprint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let mut tx = self.pool.begin().await?;

        if let Some(open) = lock_open_attempt(&mut tx, exam_id, student_id).await? {
            let attempt = ensure_token(&mut tx, open, now).await?;
            tx.commit().await?;
            return Ok(Admission::Resumed(attempt));
        }

        let finished: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM exam_attempts
                WHERE exam_id = $1 AND student_id = $2
                  AND (submitted_at IS NOT NULL OR is_terminated)
            )
            "#,
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(&mut *tx)
        .await?;
        if finished {
            return Err(Error::AttemptLimitReached);
        }

        let inserted = sqlx::query_as::<_, ExamAttempt>(
            r#"
            INSERT INTO exam_attempts (exam_id, student_id, exam_token, device_fingerprint, started_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5, $5)
            RETURNING *
            "#,
        )
        .bind(exam_id)
        .bind(student_id)
        .bind(generate_session_token())
        .bind(fingerprint)
        .bind(now)
        .fetch_one(&mut *tx)
        .await;

        match inserted {
            Ok(attempt) => {
                tx.commit().await?;
                Ok(Admission::Started(attempt))
            }
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                tracing::info!(%exam_id, %student_id, "concurrent start lost the insert race");
                self.resume_winner(exam_id, student_id, now).await
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Picks up the attempt committed by the start that won the insert race.
    async fn resume_winner(
        &self,
        exam_id: Uuid,
        student_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let mut tx = self.pool.begin().await?;
        let Some(open) = lock_open_attempt(&mut tx, exam_id, student_id).await? else {
            return Err(Error::AnotherActiveAttemptExists);
        };
        let attempt = ensure_token(&mut tx, open, now).await?;
        tx.commit().await?;
        Ok(Admission::Resumed(attempt))
    }

    pub async fn find_attempt(&self, attempt_id: Uuid) -> Result<Option<ExamAttempt>> {
        let attempt = sqlx::query_as::<_, ExamAttempt>(r#"SELECT * FROM exam_attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    pub async fn list_for_student(&self, student_id: Uuid) -> Result<Vec<ExamAttempt>> {
        let rows = sqlx::query_as::<_, ExamAttempt>(
            r#"SELECT * FROM exam_attempts WHERE student_id = $1 ORDER BY started_at DESC"#,
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn list_for_exam(&self, exam_id: Uuid) -> Result<Vec<ExamAttempt>> {
        let rows = sqlx::query_as::<_, ExamAttempt>(
            r#"SELECT * FROM exam_attempts WHERE exam_id = $1 ORDER BY started_at DESC"#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Raises the counter to at least `count`. `None` when the attempt is finalized.
    pub async fn raise_tab_switches(&self, attempt_id: Uuid, count: i32) -> Result<Option<i32>> {
        let stored: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE exam_attempts SET tab_switches = GREATEST(tab_switches, $2), updated_at = NOW()
            WHERE id = $1 AND submitted_at IS NULL
            RETURNING tab_switches
            "#,
        )
        .bind(attempt_id)
        .bind(count)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored)
    }

    pub async fn increment_tab_switches(&self, attempt_id: Uuid) -> Result<Option<i32>> {
        let stored: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE exam_attempts SET tab_switches = tab_switches + 1, updated_at = NOW()
            WHERE id = $1 AND submitted_at IS NULL
            RETURNING tab_switches
            "#,
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored)
    }

    /// Appends to the bounded snapshot ring under a row lock.
    pub async fn push_snapshot(&self, attempt_id: Uuid, snapshot: &str, capacity: usize) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Json<Vec<String>>, Option<DateTime<Utc>>)> = sqlx::query_as(
            r#"SELECT snapshots, submitted_at FROM exam_attempts WHERE id = $1 FOR UPDATE"#,
        )
        .bind(attempt_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((Json(mut snapshots), submitted_at)) = row else {
            return Err(Error::NotFound("Attempt not found".to_string()));
        };
        if submitted_at.is_some() {
            return Err(Error::AttemptLocked);
        }

        push_bounded(&mut snapshots, snapshot.to_string(), capacity);

        sqlx::query(
            r#"
            UPDATE exam_attempts SET snapshots = $2, updated_at = NOW()
            WHERE id = $1 AND submitted_at IS NULL
            "#,
        )
        .bind(attempt_id)
        .bind(Json(&snapshots))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn set_fingerprint_if_empty(&self, attempt_id: Uuid, fingerprint: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exam_attempts SET device_fingerprint = $2, updated_at = NOW()
            WHERE id = $1 AND device_fingerprint IS NULL
            "#,
        )
        .bind(attempt_id)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reconciles progress into the row. Answers are only replaced when `saved_at` is newer than
    /// the stored ones. Returns false when the attempt is finalized.
    pub async fn apply_flush(
        &self,
        attempt_id: Uuid,
        answers: Option<&AnswerMap>,
        saved_at: DateTime<Utc>,
        tab_switches: Option<i32>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE exam_attempts
            SET answers = CASE
                    WHEN $2::jsonb IS NOT NULL AND (answers_saved_at IS NULL OR answers_saved_at < $3)
                    THEN $2::jsonb ELSE answers END,
                answers_saved_at = CASE
                    WHEN $2::jsonb IS NOT NULL AND (answers_saved_at IS NULL OR answers_saved_at < $3)
                    THEN $3 ELSE answers_saved_at END,
                tab_switches = GREATEST(tab_switches, COALESCE($4, tab_switches)),
                updated_at = NOW()
            WHERE id = $1 AND submitted_at IS NULL
            "#,
        )
        .bind(attempt_id)
        .bind(answers.map(Json))
        .bind(saved_at)
        .bind(tab_switches)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Writes the terminal state once. `None` means another path finalized the attempt first.
    pub async fn finalize(&self, attempt_id: Uuid, fin: &Finalization) -> Result<Option<ExamAttempt>> {
        let row = sqlx::query_as::<_, ExamAttempt>(
            r#"
            UPDATE exam_attempts
            SET submitted_at = $2,
                score = $3,
                total_points = $4,
                percentage = $5,
                passed = $6,
                is_terminated = $7,
                termination_reason = $8,
                answers = COALESCE($9, answers),
                answers_saved_at = CASE WHEN $9 IS NULL THEN answers_saved_at ELSE $2 END,
                tab_switches = GREATEST(tab_switches, COALESCE($10, tab_switches)),
                updated_at = $2
            WHERE id = $1 AND submitted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(attempt_id)
        .bind(fin.submitted_at)
        .bind(fin.score)
        .bind(fin.total_points)
        .bind(fin.percentage)
        .bind(fin.passed)
        .bind(fin.terminated)
        .bind(fin.reason.as_deref())
        .bind(fin.answers.as_ref().map(Json))
        .bind(fin.tab_switches)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Open attempts whose exam window closed more than `grace` before `now`.
    pub async fn open_attempts_past_deadline(
        &self,
        now: DateTime<Utc>,
        grace: Duration,
    ) -> Result<Vec<ExamAttempt>> {
        let rows = sqlx::query_as::<_, ExamAttempt>(
            r#"
            SELECT a.* FROM exam_attempts a
            JOIN exams e ON e.id = a.exam_id
            WHERE a.submitted_at IS NULL
              AND a.is_terminated = FALSE
              AND COALESCE(e.end_time, e.start_time + make_interval(mins => e.duration_minutes))
                  + make_interval(secs => $2) < $1
            ORDER BY a.started_at
            "#,
        )
        .bind(now)
        .bind(grace.num_seconds() as f64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn lock_open_attempt(
    tx: &mut Transaction<'_, Postgres>,
    exam_id: Uuid,
    student_id: Uuid,
) -> Result<Option<ExamAttempt>> {
    let open = sqlx::query_as::<_, ExamAttempt>(
        r#"
        SELECT * FROM exam_attempts
        WHERE exam_id = $1 AND student_id = $2
          AND submitted_at IS NULL AND is_terminated = FALSE
        FOR UPDATE
        "#,
    )
    .bind(exam_id)
    .bind(student_id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(open)
}

/// Issues a session token for an open attempt that has none.
async fn ensure_token(
    tx: &mut Transaction<'_, Postgres>,
    attempt: ExamAttempt,
    now: DateTime<Utc>,
) -> Result<ExamAttempt> {
    if attempt.exam_token.is_some() {
        return Ok(attempt);
    }
    let updated = sqlx::query_as::<_, ExamAttempt>(
        r#"
        UPDATE exam_attempts SET exam_token = $2, updated_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(attempt.id)
    .bind(generate_session_token())
    .bind(now)
    .fetch_one(&mut **tx)
    .await?;
    Ok(updated)
}

/// Appends `item`, dropping the oldest entries beyond `capacity`.
pub fn push_bounded<T>(ring: &mut Vec<T>, item: T, capacity: usize) {
    ring.push(item);
    let capacity = capacity.max(1);
    if ring.len() > capacity {
        let excess = ring.len() - capacity;
        ring.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_newest_entries() {
        let mut ring: Vec<u32> = Vec::new();
        for i in 0..13 {
            push_bounded(&mut ring, i, 10);
        }
        assert_eq!(ring, (3..13).collect::<Vec<_>>());
    }

    #[test]
    fn ring_shrinks_oversized_history() {
        let mut ring: Vec<u32> = (0..20).collect();
        push_bounded(&mut ring, 20, 5);
        assert_eq!(ring, vec![16, 17, 18, 19, 20]);
    }

    #[test]
    fn zero_capacity_still_keeps_latest() {
        let mut ring = vec!["a"];
        push_bounded(&mut ring, "b", 0);
        assert_eq!(ring, vec!["b"]);
    }
}
