mod common;

use std::time::Duration;

use common::{seed_simple_exam, setup};
use exam_backend::dto::attempt_dto::{
    ProgressRequest, SocketQuery, StartAttemptRequest, StartAttemptResponse,
};
use exam_backend::error::Error;
use exam_backend::models::exam_attempt::REASON_TAB_SWITCHES;
use exam_backend::services::audit_service::AuditService;
use exam_backend::services::presence_service::{
    Directive, DisconnectReason, PONG, TERMINATED_TAB_SWITCHES,
};
use tokio_test::assert_ok;
use uuid::Uuid;

const TAB_SWITCH: &str = r#"{"type":"tab-switch"}"#;

async fn started(app: &common::TestApp) -> (Uuid, StartAttemptResponse) {
    let (exam_id, _) = seed_simple_exam(&app.pool).await;
    let student = Uuid::new_v4();
    let attempt = app
        .state
        .attempt_service
        .start(
            student,
            StartAttemptRequest {
                exam_id: exam_id.to_string(),
                fingerprint: None,
            },
        )
        .await
        .unwrap();
    (student, attempt)
}

fn query(attempt: &StartAttemptResponse) -> SocketQuery {
    SocketQuery {
        attempt_id: Some(attempt.id.to_string()),
        token: Some(attempt.exam_token.clone()),
        fingerprint: None,
    }
}

#[tokio::test]
async fn admission_validates_parameters_and_token() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;

    let missing = SocketQuery {
        attempt_id: Some(attempt.id.to_string()),
        ..SocketQuery::default()
    };
    assert!(matches!(presence.admit(missing).await, Err(Error::MissingParams(_))));

    let unknown = SocketQuery {
        attempt_id: Some(Uuid::new_v4().to_string()),
        token: Some("whatever".to_string()),
        fingerprint: None,
    };
    assert!(matches!(presence.admit(unknown).await, Err(Error::NotFound(_))));

    let mut forged = query(&attempt);
    forged.token = Some("x".repeat(48));
    assert!(matches!(presence.admit(forged).await, Err(Error::InvalidToken)));

    assert_ok!(presence.admit(query(&attempt)).await);
}

#[tokio::test]
async fn only_one_live_connection_per_attempt() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;

    let first = presence.admit(query(&attempt)).await.unwrap();
    assert!(matches!(
        presence.admit(query(&attempt)).await,
        Err(Error::AnotherSessionActive)
    ));

    presence
        .on_disconnect(&first, DisconnectReason::ClientClosed)
        .await;
    let second = presence.admit(query(&attempt)).await.unwrap();
    assert_ne!(first.connection_id, second.connection_id);
}

#[tokio::test]
async fn fingerprint_is_recorded_once() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;

    let mut q = query(&attempt);
    q.fingerprint = Some("device-a".to_string());
    let session = presence.admit(q).await.unwrap();
    presence
        .on_disconnect(&session, DisconnectReason::ClientClosed)
        .await;

    let mut q = query(&attempt);
    q.fingerprint = Some("device-b".to_string());
    assert_ok!(presence.admit(q).await);

    let row = app
        .state
        .attempt_service
        .store()
        .find_attempt(attempt.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.device_fingerprint.as_deref(), Some("device-a"));
}

#[tokio::test]
async fn heartbeats_are_answered() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;
    let session = presence.admit(query(&attempt)).await.unwrap();

    assert_eq!(presence.handle_text(&session, "ping").await, Directive::Reply(PONG));
    assert_eq!(presence.handle_text(&session, " HEARTBEAT ").await, Directive::Reply(PONG));
    assert_eq!(presence.handle_text(&session, "{not json").await, Directive::Continue);
    assert_eq!(
        presence.handle_text(&session, r#"{"type":"focus"}"#).await,
        Directive::Continue
    );
}

#[tokio::test]
async fn disconnect_without_return_auto_submits() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (student, attempt) = started(&app).await;
    let questions = app
        .state
        .attempt_service
        .store()
        .exam_questions(attempt.exam_id)
        .await
        .unwrap();
    let answers = [("A", &questions[0]), ("A", &questions[1]), ("C", &questions[2])]
        .into_iter()
        .map(|(answer, question)| (question.id.to_string(), answer.to_string()))
        .collect();
    assert_ok!(
        app.state
            .attempt_service
            .progress(
                student,
                ProgressRequest {
                    attempt_id: attempt.id,
                    answers: Some(answers),
                    snapshot: None,
                    tab_switches: None,
                    exam_token: Some(attempt.exam_token.clone()),
                },
            )
            .await
    );

    let session = presence.admit(query(&attempt)).await.unwrap();
    presence
        .on_disconnect(&session, DisconnectReason::HeartbeatTimeout)
        .await;
    assert!(presence.timers().is_pending(attempt.id));

    tokio::time::sleep(Duration::from_millis(900)).await;

    let row = app
        .state
        .attempt_service
        .store()
        .find_attempt(attempt.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.submitted_at.is_some());
    assert!(!row.is_terminated);
    assert!(row.termination_reason.is_none());
    assert_eq!(row.score, 2);
    assert_eq!(row.total_points, 4);

    let entries = AuditService::new(app.pool.clone())
        .for_attempt(attempt.id)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "attempt_auto_submitted");
    assert_eq!(entries[0].actor_id, None);
}

#[tokio::test]
async fn reconnecting_within_grace_keeps_the_attempt_open() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;

    let session = presence.admit(query(&attempt)).await.unwrap();
    presence
        .on_disconnect(&session, DisconnectReason::ConnectionError)
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_ok!(presence.admit(query(&attempt)).await);
    assert!(!presence.timers().is_pending(attempt.id));

    tokio::time::sleep(Duration::from_millis(900)).await;
    let row = app
        .state
        .attempt_service
        .store()
        .find_attempt(attempt.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_open());
}

#[tokio::test]
async fn fourth_tab_switch_closes_the_connection() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (_, attempt) = started(&app).await;
    let session = presence.admit(query(&attempt)).await.unwrap();

    for _ in 0..3 {
        assert_eq!(presence.handle_text(&session, TAB_SWITCH).await, Directive::Continue);
    }
    assert_eq!(
        presence.handle_text(&session, TAB_SWITCH).await,
        Directive::Close(TERMINATED_TAB_SWITCHES)
    );

    let row = app
        .state
        .attempt_service
        .store()
        .find_attempt(attempt.id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_terminated);
    assert_eq!(row.tab_switches, 4);
    assert_eq!(row.score, 0);
    assert_eq!(row.termination_reason.as_deref(), Some(REASON_TAB_SWITCHES));

    presence
        .on_disconnect(&session, DisconnectReason::ServerClosed)
        .await;
    assert!(!presence.timers().is_pending(attempt.id));
}

#[tokio::test]
async fn finalized_attempts_refuse_connections() {
    let Some(app) = setup().await else { return };
    let presence = &app.state.presence_service;
    let (student, attempt) = started(&app).await;

    assert_ok!(app.state.attempt_service.submit(student, attempt.id).await);
    assert!(matches!(
        presence.admit(query(&attempt)).await,
        Err(Error::AttemptLocked)
    ));
}
