pub mod attempt_dto;
pub mod exam_dto;
