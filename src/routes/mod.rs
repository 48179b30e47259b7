pub mod attempts;
pub mod exams;
pub mod health;
pub mod ws;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};

use crate::middleware::auth::{require_bearer_auth, require_privileged};
use crate::AppState;

pub fn api_router(state: AppState) -> Router {
    let student_api = Router::new()
        .route("/api/exams/:id", get(exams::get_exam))
        .route("/api/attempts/start", post(attempts::start_attempt))
        .route("/api/progress", post(attempts::update_progress))
        .route("/api/attempts/submit", post(attempts::submit_attempt))
        .route("/api/attempts/:id", get(attempts::get_attempt))
        .route("/api/student/attempts", get(attempts::list_my_attempts))
        .layer(from_fn(require_bearer_auth));

    let admin_api = Router::new()
        .route(
            "/api/admin/exams/:id/attempts",
            get(exams::list_exam_attempts),
        )
        .layer(from_fn(require_privileged));

    Router::new()
        .route("/health", get(health::health))
        .route("/ws/exam", get(ws::exam_socket))
        .merge(student_api)
        .merge(admin_api)
        .with_state(state)
}
