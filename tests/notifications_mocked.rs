/// Integration tests with a mocked notification gateway
/// Exercises webhook delivery, retries and the fire-and-forget dispatcher without a real relay
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rust_admissions_engine::circuit_breaker::create_notification_circuit_breaker;
use rust_admissions_engine::engine::{AdmissionsEngine, EngineSettings, TransitionParams};
use rust_admissions_engine::memory_store::MemoryStore;
use rust_admissions_engine::models::{CandidateStatus, NewCandidate, SourceTracking, TriggerEvent};
use rust_admissions_engine::notifications::{
    deliver, Notification, NotificationDispatcher, Notifier, NotifyError, RetryPolicy,
    WebhookNotifier,
};
use rust_admissions_engine::pii::PiiCodec;

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(5),
    }
}

fn commission_event() -> Notification {
    Notification::CommissionRecorded {
        commission_id: Uuid::new_v4(),
        referrer_id: Uuid::new_v4(),
        candidate_id: Uuid::new_v4(),
        trigger_event: TriggerEvent::Enrollment,
        amount: 500_000,
    }
}

#[tokio::test]
async fn test_webhook_posts_event_with_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/notify"))
        .and(header("Authorization", "Bearer relay-token"))
        .and(body_partial_json(serde_json::json!({
            "event": "commission_recorded",
            "trigger_event": "enrollment",
            "amount": 500000
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = WebhookNotifier::new(
        format!("{}/notify", mock_server.uri()),
        Some("relay-token".to_string()),
    )
    .unwrap();

    notifier.send(&commission_event()).await.unwrap();
}

#[tokio::test]
async fn test_webhook_rejection_carries_status_and_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(422).set_body_string("unknown template"))
        .mount(&mock_server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/notify", mock_server.uri()), None).unwrap();
    let err = notifier.send(&commission_event()).await.unwrap_err();

    assert_eq!(
        err,
        NotifyError::Rejected {
            status: 422,
            body: "unknown template".to_string()
        }
    );
}

#[tokio::test]
async fn test_delivery_retries_server_errors() {
    let mock_server = MockServer::start().await;

    // Two failures, then the relay recovers
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/notify", mock_server.uri()), None).unwrap();
    let breaker = create_notification_circuit_breaker();

    let attempts = deliver(&notifier, &commission_event(), &fast_policy(), &breaker)
        .await
        .unwrap();
    assert_eq!(attempts, 3);
}

#[tokio::test]
async fn test_open_circuit_fails_fast() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/notify"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let notifier = WebhookNotifier::new(format!("{}/notify", mock_server.uri()), None).unwrap();
    let breaker = create_notification_circuit_breaker();
    let policy = RetryPolicy {
        max_attempts: 5,
        initial_backoff: Duration::from_millis(1),
    };

    let first = deliver(&notifier, &commission_event(), &policy, &breaker).await;
    assert!(matches!(first, Err(NotifyError::Rejected { status: 500, .. })));

    let second = deliver(&notifier, &commission_event(), &policy, &breaker).await;
    assert_eq!(second, Err(NotifyError::CircuitOpen));

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 5);
}

#[tokio::test]
async fn test_failed_notifications_do_not_affect_transitions() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let notifier: Arc<dyn Notifier> =
        Arc::new(WebhookNotifier::new(format!("{}/notify", mock_server.uri()), None).unwrap());
    let (dispatcher, worker) = NotificationDispatcher::spawn(
        notifier,
        RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
        },
    );

    let store = Arc::new(MemoryStore::new(Arc::new(PiiCodec::new(&[9u8; 32]).unwrap())));
    let engine =
        AdmissionsEngine::new(store, EngineSettings::default()).with_notifications(dispatcher);

    let candidate = engine
        .register_candidate(NewCandidate {
            name: "Fajar".to_string(),
            email: Some("fajar@example.com".to_string()),
            source: Some(SourceTracking {
                source_type: "walk_in".to_string(),
                source_detail: None,
            }),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome = engine
        .transition_status(candidate.id, CandidateStatus::Prospecting, TransitionParams::default())
        .await
        .unwrap();
    assert_eq!(outcome.to, CandidateStatus::Prospecting);

    // Dropping the last dispatcher lets the worker drain and stop
    drop(engine);
    worker.await.unwrap();

    let received = mock_server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["event"], "status_changed");
    assert_eq!(body["to"], "prospecting");
}
