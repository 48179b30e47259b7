pub mod attempt_service;
pub mod audit_service;
pub mod autosave_service;
pub mod grace_timers;
pub mod grading_service;
pub mod presence_service;
