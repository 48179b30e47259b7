use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::models::exam::Exam;
use crate::models::question::{Question, QuestionView};

/// Exam as delivered to a student, without correct answers.
#[derive(Debug, Clone, Serialize)]
pub struct ExamDetails {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub duration_minutes: i32,
    pub passing_score: Decimal,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub enable_negative_marking: bool,
    pub total_points: i32,
    pub questions: Vec<QuestionView>,
}

impl ExamDetails {
    pub fn new(exam: &Exam, questions: &[Question]) -> Self {
        let mut views: Vec<QuestionView> = questions.iter().map(QuestionView::from).collect();
        views.sort_by_key(|q| q.order_number);
        Self {
            id: exam.id,
            title: exam.title.clone(),
            description: exam.description.clone(),
            subject: exam.subject.clone(),
            duration_minutes: exam.duration_minutes,
            passing_score: exam.passing_score,
            start_time: exam.start_time,
            end_time: exam.window_end(),
            enable_negative_marking: exam.enable_negative_marking,
            total_points: questions.iter().map(|q| q.points).sum(),
            questions: views,
        }
    }
}
