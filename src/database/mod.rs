pub mod attempt_store;
pub mod pool;
