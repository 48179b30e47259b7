use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::models::exam_attempt::AnswerMap;
use crate::models::question::{Question, QuestionType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreCard {
    pub score: i32,
    pub total_points: i32,
    pub percentage: f64,
    pub passed: bool,
}

impl ScoreCard {
    /// Terminated attempts keep their total but earn nothing.
    pub fn zero(total_points: i32) -> Self {
        Self {
            score: 0,
            total_points,
            percentage: 0.0,
            passed: false,
        }
    }

    pub fn percentage_decimal(&self) -> Decimal {
        Decimal::from_f64(self.percentage)
            .unwrap_or_default()
            .round_dp(2)
    }
}

/// Exact-match scoring engine. Pure, no I/O.
pub struct GradingService;

impl GradingService {
    pub fn total_points(questions: &[Question]) -> i32 {
        questions.iter().map(|q| q.points).sum()
    }

    pub fn score(
        questions: &[Question],
        answers: &AnswerMap,
        negative_marking: bool,
        passing_score: Decimal,
    ) -> ScoreCard {
        let total_points = Self::total_points(questions);
        let by_id: HashMap<String, &Question> =
            questions.iter().map(|q| (q.id.to_string(), q)).collect();

        let mut raw = 0.0_f64;
        for (question_id, given) in answers {
            let Some(question) = by_id.get(question_id.trim()) else {
                continue;
            };
            if given.trim().is_empty() {
                continue;
            }
            if is_correct(question.kind(), given, &question.correct_answer) {
                raw += f64::from(question.points);
            } else if negative_marking {
                raw -= question.negative_points.max(0.0);
            }
        }

        let score = raw.max(0.0).round() as i32;
        let percentage = if total_points > 0 {
            f64::from(score) / f64::from(total_points) * 100.0
        } else {
            0.0
        };
        let threshold = passing_score.to_f64().unwrap_or(0.0);

        ScoreCard {
            score,
            total_points,
            percentage,
            passed: total_points > 0 && percentage >= threshold,
        }
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn normalize_selection(value: &str) -> String {
    let mut parts: Vec<String> = value
        .split(',')
        .map(normalize)
        .filter(|part| !part.is_empty())
        .collect();
    parts.sort();
    parts.join(",")
}

fn is_correct(kind: QuestionType, given: &str, expected: &str) -> bool {
    match kind {
        QuestionType::MultiSelect => normalize_selection(given) == normalize_selection(expected),
        QuestionType::SingleChoice | QuestionType::TrueFalse | QuestionType::Descriptive => {
            normalize(given) == normalize(expected)
        }
    }
}
