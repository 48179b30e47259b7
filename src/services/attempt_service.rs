use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::cache::SessionCache;
use crate::config::ProctoringPolicy;
use crate::database::attempt_store::{Admission, AttemptStore, Finalization};
use crate::dto::attempt_dto::{
    AttemptSummary, AttemptView, ProgressRequest, ProgressResponse, ProgressStatus,
    StartAttemptRequest, StartAttemptResponse, StartStatus, SubmitResponse,
};
use crate::dto::exam_dto::ExamDetails;
use crate::error::{Error, Result};
use crate::middleware::auth::Claims;
use crate::models::exam::{Exam, WindowState};
use crate::models::exam_attempt::{
    AnswerMap, ExamAttempt, StampedAnswers, REASON_LATE_SUBMISSION, REASON_TAB_SWITCHES,
};
use crate::services::audit_service::AuditService;
use crate::services::grading_service::{GradingService, ScoreCard};
use crate::utils::time::time_left;
use crate::utils::token::tokens_match;

/// Result of a tab-switch reported over the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabSwitchOutcome {
    Counted(i32),
    Terminated,
    Locked,
}

/// Why an attempt is being finalized; decides the audit action and the termination reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Submit,
    GraceExpired,
    DeadlineSweep,
}

impl Trigger {
    fn action(self) -> &'static str {
        match self {
            Trigger::Submit => "attempt_submitted",
            Trigger::GraceExpired => "attempt_auto_submitted",
            Trigger::DeadlineSweep => "attempt_deadline_expired",
        }
    }
}

/// Drives an attempt through start, progress and finalization.
/// The only component that changes the lifecycle state of an attempt.
#[derive(Clone)]
pub struct AttemptService {
    store: AttemptStore,
    cache: SessionCache,
    audit: AuditService,
    policy: Arc<ProctoringPolicy>,
}

impl AttemptService {
    pub fn new(store: AttemptStore, cache: SessionCache, policy: Arc<ProctoringPolicy>) -> Self {
        let audit = AuditService::new(store.pool().clone());
        Self {
            store,
            cache,
            audit,
            policy,
        }
    }

    pub fn store(&self) -> &AttemptStore {
        &self.store
    }

    pub async fn exam_details(&self, exam_id: Uuid) -> Result<ExamDetails> {
        let exam = self.active_exam(exam_id).await?;
        let questions = self.store.exam_questions(exam.id).await?;
        Ok(ExamDetails::new(&exam, &questions))
    }

    pub async fn start(&self, student_id: Uuid, req: StartAttemptRequest) -> Result<StartAttemptResponse> {
        self.start_at(student_id, req, Utc::now()).await
    }

    pub async fn start_at(
        &self,
        student_id: Uuid,
        req: StartAttemptRequest,
        now: DateTime<Utc>,
    ) -> Result<StartAttemptResponse> {
        req.validate()?;
        let exam_id = Uuid::parse_str(req.exam_id.trim()).map_err(|_| Error::InvalidExamId)?;
        let exam = self.active_exam(exam_id).await?;

        match exam.window_state(now) {
            WindowState::NotStarted => {
                return Err(Error::ExamNotStarted {
                    start_time: exam.start_time.unwrap_or(now),
                })
            }
            WindowState::Closed => return Err(Error::ExamClosed),
            WindowState::Open => {}
        }

        let fingerprint = req.fingerprint.as_deref().map(str::trim).filter(|f| !f.is_empty());
        let admission = self
            .store
            .create_or_resume(exam.id, student_id, fingerprint, now)
            .await?;
        let attempt = admission.attempt();
        let token = attempt
            .exam_token
            .clone()
            .ok_or_else(|| Error::Internal(format!("attempt {} has no session token", attempt.id)))?;

        if let Err(err) = self.cache.register_token(attempt.id, &token).await {
            tracing::warn!(attempt_id = %attempt.id, error = %err, "could not cache session token");
        }

        let remaining = time_left(attempt.started_at, exam.duration(), exam.window_end(), now);

        let response = match &admission {
            Admission::Started(attempt) => {
                tracing::info!(attempt_id = %attempt.id, %exam_id, %student_id, "attempt started");
                StartAttemptResponse {
                    id: attempt.id,
                    exam_id: attempt.exam_id,
                    started_at: attempt.started_at,
                    time_left: remaining,
                    exam_token: token,
                    status: StartStatus::Started,
                    answers: None,
                    tab_switches: None,
                }
            }
            Admission::Resumed(attempt) => {
                if let Some(fp) = fingerprint {
                    self.store.set_fingerprint_if_empty(attempt.id, fp).await?;
                }
                let answers = self.best_known_answers(attempt).await;
                let tab_switches = self.best_known_tabs(attempt).await;
                tracing::info!(attempt_id = %attempt.id, %exam_id, %student_id, "attempt resumed");
                StartAttemptResponse {
                    id: attempt.id,
                    exam_id: attempt.exam_id,
                    started_at: attempt.started_at,
                    time_left: remaining,
                    exam_token: token,
                    status: StartStatus::Resumed,
                    answers: Some(answers),
                    tab_switches: Some(tab_switches),
                }
            }
        };
        Ok(response)
    }

    pub async fn progress(&self, student_id: Uuid, req: ProgressRequest) -> Result<ProgressResponse> {
        self.progress_at(student_id, req, Utc::now()).await
    }

    pub async fn progress_at(
        &self,
        student_id: Uuid,
        req: ProgressRequest,
        now: DateTime<Utc>,
    ) -> Result<ProgressResponse> {
        req.validate()?;
        let attempt = self.owned_attempt(req.attempt_id, student_id).await?;
        if let Some(presented) = req.exam_token.as_deref() {
            let stored = attempt.exam_token.as_deref().unwrap_or_default();
            if !tokens_match(presented, stored) {
                return Err(Error::InvalidToken);
            }
        }
        if !attempt.is_open() {
            return Err(Error::AttemptLocked);
        }

        let id = attempt.id;
        let mut cached = true;

        if let Some(answers) = &req.answers {
            let stamped = StampedAnswers {
                saved_at: now,
                answers: answers.clone(),
            };
            if let Err(err) = self.cache.store_answers(id, &stamped).await {
                tracing::warn!(attempt_id = %id, error = %err, "answer autosave fell back to database");
                cached = false;
            }
        }

        let incoming_tabs = match req.tab_switches {
            Some(incoming) => match self.cache.raise_tab_switches(id, incoming).await {
                Ok(current) => Some(current),
                Err(err) => {
                    tracing::warn!(attempt_id = %id, error = %err, "tab counter fell back to database");
                    cached = false;
                    Some(incoming)
                }
            },
            None => None,
        };

        let touched = req.answers.is_some() || req.tab_switches.is_some();
        if touched && cached {
            if let Err(err) = self.cache.mark_dirty(id).await {
                tracing::warn!(attempt_id = %id, error = %err, "dirty marker lost; writing through");
                cached = false;
            }
        }
        if touched && !cached {
            if req.answers.is_some() {
                self.discard_cached_answers(id).await;
            }
            if !self
                .store
                .apply_flush(id, req.answers.as_ref(), now, incoming_tabs)
                .await?
            {
                return Err(Error::AttemptLocked);
            }
        }

        if let Some(snapshot) = req.snapshot.as_deref() {
            self.store
                .push_snapshot(id, snapshot, self.policy.snapshot_limit)
                .await?;
        }

        let cached_tabs = match incoming_tabs {
            Some(current) => current,
            None => self.cache.tab_switches(id).await.ok().flatten().unwrap_or(0),
        };
        let tab_switches = attempt.tab_switches.max(cached_tabs);

        if tab_switches > self.policy.tab_switch_limit {
            self.terminate_for_tabs(id, tab_switches, now).await?;
            return Ok(ProgressResponse {
                status: ProgressStatus::Terminated,
                reason: Some(REASON_TAB_SWITCHES.to_string()),
                tab_switches,
            });
        }

        Ok(ProgressResponse {
            status: ProgressStatus::Ok,
            reason: None,
            tab_switches,
        })
    }

    pub async fn submit(&self, student_id: Uuid, attempt_id: Uuid) -> Result<SubmitResponse> {
        self.submit_at(student_id, attempt_id, Utc::now()).await
    }

    /// Idempotent: a finalized attempt returns its stored result without rescoring.
    pub async fn submit_at(
        &self,
        student_id: Uuid,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SubmitResponse> {
        let attempt = self.owned_attempt(attempt_id, student_id).await?;
        if attempt.submitted_at.is_some() {
            return Ok(submit_response(&attempt));
        }

        let exam = self.exam_of(&attempt).await?;
        let finalized = self
            .score_and_finalize(&attempt, &exam, now, Trigger::Submit, Some(student_id))
            .await?;
        match finalized {
            Some(row) => Ok(submit_response(&row)),
            None => {
                let stored = self
                    .store
                    .find_attempt(attempt_id)
                    .await?
                    .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
                Ok(submit_response(&stored))
            }
        }
    }

    /// Counts one tab switch reported by the live connection.
    pub async fn record_tab_switch(&self, attempt_id: Uuid) -> Result<TabSwitchOutcome> {
        self.record_tab_switch_at(attempt_id, Utc::now()).await
    }

    pub async fn record_tab_switch_at(
        &self,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TabSwitchOutcome> {
        match self.cache.tab_switches(attempt_id).await {
            Ok(Some(cached)) => {
                if self.store.raise_tab_switches(attempt_id, cached).await?.is_none() {
                    return Ok(TabSwitchOutcome::Locked);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%attempt_id, error = %err, "cached tab counter unavailable");
            }
        }

        let Some(count) = self.store.increment_tab_switches(attempt_id).await? else {
            return Ok(TabSwitchOutcome::Locked);
        };
        if let Err(err) = self.cache.raise_tab_switches(attempt_id, count).await {
            tracing::warn!(%attempt_id, error = %err, "could not mirror tab counter to cache");
        }
        tracing::info!(%attempt_id, count, "tab switch recorded");

        if count > self.policy.tab_switch_limit {
            return match self.terminate_for_tabs(attempt_id, count, now).await? {
                Some(_) => Ok(TabSwitchOutcome::Terminated),
                None => Ok(TabSwitchOutcome::Locked),
            };
        }
        Ok(TabSwitchOutcome::Counted(count))
    }

    /// Finalizes an attempt whose connection did not come back within the grace period.
    pub async fn auto_submit(&self, attempt_id: Uuid) -> Result<Option<ExamAttempt>> {
        self.auto_submit_at(attempt_id, Utc::now()).await
    }

    pub async fn auto_submit_at(
        &self,
        attempt_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamAttempt>> {
        let Some(attempt) = self.store.find_attempt(attempt_id).await? else {
            return Ok(None);
        };
        if !attempt.is_open() {
            return Ok(None);
        }
        let exam = self.exam_of(&attempt).await?;
        self.score_and_finalize(&attempt, &exam, now, Trigger::GraceExpired, None)
            .await
    }

    /// Finalizes every open attempt whose exam window closed more than the submit grace ago.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let overdue = self
            .store
            .open_attempts_past_deadline(now, self.policy.submit_grace)
            .await?;
        let mut finalized = 0;
        for attempt in overdue {
            let exam = match self.exam_of(&attempt).await {
                Ok(exam) => exam,
                Err(err) => {
                    tracing::error!(attempt_id = %attempt.id, error = %err, "sweep could not load exam");
                    continue;
                }
            };
            match self
                .score_and_finalize(&attempt, &exam, now, Trigger::DeadlineSweep, None)
                .await
            {
                Ok(Some(_)) => finalized += 1,
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(attempt_id = %attempt.id, error = %err, "sweep could not finalize attempt");
                }
            }
        }
        if finalized > 0 {
            tracing::info!(finalized, "deadline sweep finalized attempts");
        }
        Ok(finalized)
    }

    pub async fn attempt_view(&self, attempt_id: Uuid, claims: &Claims) -> Result<AttemptView> {
        let attempt = self
            .store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
        if claims.is_privileged() {
            return Ok(AttemptView::Full(attempt));
        }
        if attempt.student_id != claims.user_id()? {
            return Err(Error::Forbidden("Attempt belongs to another student".to_string()));
        }
        if attempt.submitted_at.is_some() {
            Ok(AttemptView::Full(attempt))
        } else {
            Ok(AttemptView::Summary(AttemptSummary::from(&attempt)))
        }
    }

    pub async fn student_attempts(&self, student_id: Uuid) -> Result<Vec<AttemptSummary>> {
        let rows = self.store.list_for_student(student_id).await?;
        Ok(rows.iter().map(AttemptSummary::from).collect())
    }

    pub async fn exam_attempts(&self, exam_id: Uuid) -> Result<Vec<ExamAttempt>> {
        if self.store.find_exam(exam_id).await?.is_none() {
            return Err(Error::NotFound("Exam not found".to_string()));
        }
        self.store.list_for_exam(exam_id).await
    }

    async fn active_exam(&self, exam_id: Uuid) -> Result<Exam> {
        self.store
            .find_exam(exam_id)
            .await?
            .filter(|exam| exam.is_active)
            .ok_or_else(|| Error::NotFound("Exam not found".to_string()))
    }

    async fn exam_of(&self, attempt: &ExamAttempt) -> Result<Exam> {
        self.store
            .find_exam(attempt.exam_id)
            .await?
            .ok_or_else(|| Error::NotFound("Exam not found".to_string()))
    }

    async fn owned_attempt(&self, attempt_id: Uuid, student_id: Uuid) -> Result<ExamAttempt> {
        self.store
            .find_attempt(attempt_id)
            .await?
            .filter(|attempt| attempt.student_id == student_id)
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))
    }

    /// Cached answers win over the durable row only when they were saved after it. A cache outage
    /// falls back to the row.
    async fn best_known_answers(&self, attempt: &ExamAttempt) -> AnswerMap {
        match self.cache.answers(attempt.id).await {
            Ok(Some(cached)) if attempt.answers_older_than(cached.saved_at) => cached.answers,
            Ok(Some(_)) => {
                tracing::debug!(attempt_id = %attempt.id, "stored answers are newer than the cached autosave");
                attempt.answers.0.clone()
            }
            Ok(None) => attempt.answers.0.clone(),
            Err(err) => {
                tracing::warn!(attempt_id = %attempt.id, error = %err, "using stored answers");
                attempt.answers.0.clone()
            }
        }
    }

    async fn best_known_tabs(&self, attempt: &ExamAttempt) -> i32 {
        match self.cache.tab_switches(attempt.id).await {
            Ok(cached) => attempt.tab_switches.max(cached.unwrap_or(0)),
            Err(err) => {
                tracing::warn!(attempt_id = %attempt.id, error = %err, "using stored tab counter");
                attempt.tab_switches
            }
        }
    }

    /// Drops cached answers that a write-through just superseded.
    async fn discard_cached_answers(&self, attempt_id: Uuid) {
        if let Err(err) = self.cache.discard_answers(attempt_id).await {
            tracing::debug!(%attempt_id, error = %err, "stale cached answers left in place");
        }
    }

    async fn terminate_for_tabs(
        &self,
        attempt_id: Uuid,
        tab_switches: i32,
        now: DateTime<Utc>,
    ) -> Result<Option<ExamAttempt>> {
        let Some(attempt) = self.store.find_attempt(attempt_id).await? else {
            return Ok(None);
        };
        let questions = self.store.exam_questions(attempt.exam_id).await?;
        let answers = self.best_known_answers(&attempt).await;
        let card = ScoreCard::zero(GradingService::total_points(&questions));
        let fin = Finalization {
            submitted_at: now,
            score: card.score,
            total_points: card.total_points,
            percentage: Decimal::ZERO,
            passed: false,
            terminated: true,
            reason: Some(REASON_TAB_SWITCHES.to_string()),
            answers: Some(answers),
            tab_switches: Some(tab_switches),
        };
        let row = self
            .commit(&attempt, fin, "attempt_terminated", Some(attempt.student_id))
            .await?;
        if row.is_some() {
            tracing::warn!(%attempt_id, tab_switches, "attempt terminated for tab switching");
        }
        Ok(row)
    }

    async fn score_and_finalize(
        &self,
        attempt: &ExamAttempt,
        exam: &Exam,
        now: DateTime<Utc>,
        trigger: Trigger,
        actor: Option<Uuid>,
    ) -> Result<Option<ExamAttempt>> {
        let tab_switches = self.best_known_tabs(attempt).await;
        if tab_switches > self.policy.tab_switch_limit {
            return self.terminate_for_tabs(attempt.id, tab_switches, now).await;
        }

        let questions = self.store.exam_questions(exam.id).await?;
        let answers = self.best_known_answers(attempt).await;
        let card = GradingService::score(
            &questions,
            &answers,
            exam.enable_negative_marking,
            exam.passing_score,
        );

        let late = match trigger {
            Trigger::DeadlineSweep => true,
            Trigger::Submit => exam
                .late_after(self.policy.submit_grace)
                .is_some_and(|limit| now > limit),
            Trigger::GraceExpired => false,
        };
        let fin = Finalization {
            submitted_at: now,
            score: card.score,
            total_points: card.total_points,
            percentage: card.percentage_decimal(),
            passed: card.passed,
            terminated: late,
            reason: late.then(|| REASON_LATE_SUBMISSION.to_string()),
            answers: Some(answers),
            tab_switches: Some(tab_switches),
        };
        self.commit(attempt, fin, trigger.action(), actor).await
    }

    async fn commit(
        &self,
        attempt: &ExamAttempt,
        fin: Finalization,
        action: &str,
        actor: Option<Uuid>,
    ) -> Result<Option<ExamAttempt>> {
        let Some(row) = self.store.finalize(attempt.id, &fin).await? else {
            tracing::debug!(attempt_id = %attempt.id, action, "attempt already finalized");
            return Ok(None);
        };

        if let Err(err) = self.audit.record_finalization(actor, action, &row).await {
            tracing::error!(attempt_id = %row.id, error = %err, "failed to write audit log");
        }
        if let Err(err) = self.cache.forget_attempt(row.id).await {
            tracing::warn!(attempt_id = %row.id, error = %err, "could not clear cached attempt state");
        }

        tracing::info!(
            attempt_id = %row.id,
            action,
            score = row.score,
            total_points = row.total_points,
            terminated = row.is_terminated,
            "attempt finalized"
        );
        Ok(Some(row))
    }
}

fn submit_response(attempt: &ExamAttempt) -> SubmitResponse {
    SubmitResponse {
        score: attempt.score,
        total_points: attempt.total_points,
        passed: attempt.passed,
        submitted_at: attempt.submitted_at.unwrap_or(attempt.updated_at),
    }
}
