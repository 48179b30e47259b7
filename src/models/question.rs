use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: Uuid,
    pub exam_id: Uuid,
    pub question_type: String,
    pub question_text: String,
    pub options: Json<Vec<String>>,
    pub correct_answer: String,
    pub points: i32,
    pub negative_points: f64,
    pub difficulty: String,
    pub order_number: i32,
}

impl Question {
    /// Unrecognized stored types grade as single choice.
    pub fn kind(&self) -> QuestionType {
        self.question_type
            .parse()
            .unwrap_or(QuestionType::SingleChoice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    SingleChoice,
    MultiSelect,
    TrueFalse,
    Descriptive,
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single-choice" => Ok(QuestionType::SingleChoice),
            "multi-select" => Ok(QuestionType::MultiSelect),
            "true-false" => Ok(QuestionType::TrueFalse),
            "descriptive" => Ok(QuestionType::Descriptive),
            other => Err(format!("unknown question type: {}", other)),
        }
    }
}

/// Question as shown to a student taking the exam.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub question_type: String,
    pub question_text: String,
    pub options: Vec<String>,
    pub points: i32,
    pub difficulty: String,
    pub order_number: i32,
}

impl From<&Question> for QuestionView {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            question_type: q.question_type.clone(),
            question_text: q.question_text.clone(),
            options: q.options.0.clone(),
            points: q.points,
            difficulty: q.difficulty.clone(),
            order_number: q.order_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stored_type_names() {
        assert_eq!("multi-select".parse::<QuestionType>(), Ok(QuestionType::MultiSelect));
        assert_eq!(" True-False ".parse::<QuestionType>(), Ok(QuestionType::TrueFalse));
        assert!("essay".parse::<QuestionType>().is_err());
    }
}
