pub mod audit_entry;
pub mod exam;
pub mod exam_attempt;
pub mod question;
