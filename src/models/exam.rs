use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub duration_minutes: i32,
    pub passing_score: Decimal,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub marks_easy: i32,
    pub marks_medium: i32,
    pub marks_hard: i32,
    pub enable_negative_marking: bool,
    pub negative_mark_easy: f64,
    pub negative_mark_medium: f64,
    pub negative_mark_hard: f64,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Where an instant falls relative to the scheduled window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    NotStarted,
    Open,
    Closed,
}

impl Exam {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes.max(0)))
    }

    /// Explicit end, or start plus duration when only the start is scheduled.
    pub fn window_end(&self) -> Option<DateTime<Utc>> {
        self.end_time
            .or_else(|| self.start_time.map(|start| start + self.duration()))
    }

    pub fn window_state(&self, now: DateTime<Utc>) -> WindowState {
        if let Some(start) = self.start_time {
            if now < start {
                return WindowState::NotStarted;
            }
        }
        match self.window_end() {
            Some(end) if now >= end => WindowState::Closed,
            _ => WindowState::Open,
        }
    }

    /// Instant after which a submission counts as late.
    pub fn late_after(&self, grace: Duration) -> Option<DateTime<Utc>> {
        self.window_end().map(|end| end + grace)
    }
}
