use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::circuit_breaker::create_notification_circuit_breaker;
use crate::models::{CandidateStatus, TriggerEvent};

/// Events emitted after a successful engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    StatusChanged {
        candidate_id: Uuid,
        from: CandidateStatus,
        to: CandidateStatus,
        at: DateTime<Utc>,
    },
    ConsultantAssigned {
        candidate_id: Uuid,
        consultant_id: Uuid,
        /// Manual reassignment rather than automatic selection.
        reassigned: bool,
    },
    CommissionRecorded {
        commission_id: Uuid,
        referrer_id: Uuid,
        candidate_id: Uuid,
        trigger_event: TriggerEvent,
        amount: i64,
    },
}

impl Notification {
    pub fn candidate_id(&self) -> Uuid {
        match self {
            Notification::StatusChanged { candidate_id, .. }
            | Notification::ConsultantAssigned { candidate_id, .. }
            | Notification::CommissionRecorded { candidate_id, .. } => *candidate_id,
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::StatusChanged { .. } => "status_changed",
            Notification::ConsultantAssigned { .. } => "consultant_assigned",
            Notification::CommissionRecorded { .. } => "commission_recorded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification gateway returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("notification gateway circuit is open")]
    CircuitOpen,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no gateway is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            "Notification {} for candidate {}",
            notification.event_name(),
            notification.candidate_id()
        );
        Ok(())
    }
}

/// Posts notifications as JSON to an HTTP gateway (email / WhatsApp relay).
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl WebhookNotifier {
    pub fn new(url: String, token: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                NotifyError::Transport(format!("Failed to create notification client: {}", e))
            })?;

        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected { status, body });
        }

        tracing::debug!(
            "Delivered {} for candidate {}",
            notification.event_name(),
            notification.candidate_id()
        );
        Ok(())
    }
}

/// Retry schedule for a single notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Delivers one notification, retrying per `policy` while `breaker` permits calls.
/// Returns the number of attempts used on success.
pub async fn deliver<B>(
    notifier: &dyn Notifier,
    notification: &Notification,
    policy: &RetryPolicy,
    breaker: &B,
) -> Result<u32, NotifyError>
where
    B: failsafe::CircuitBreaker,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = NotifyError::CircuitOpen;

    for attempt in 1..=attempts {
        if !breaker.is_call_permitted() {
            return Err(NotifyError::CircuitOpen);
        }

        let outcome = notifier.send(notification).await;
        match breaker.call(|| outcome) {
            Ok(()) => return Ok(attempt),
            Err(failsafe::Error::Rejected) => return Err(NotifyError::CircuitOpen),
            Err(failsafe::Error::Inner(e)) => {
                tracing::warn!(
                    "Notification {} attempt {}/{} failed: {}",
                    notification.event_name(),
                    attempt,
                    attempts,
                    e
                );
                last_error = e;
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    Err(last_error)
}

/// Handle used by the engine to enqueue notifications without waiting on delivery.
///
/// Delivery runs on a background task with its own retry policy and circuit breaker. Its
/// outcome is logged and never reaches the caller of the engine.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationDispatcher {
    /// Starts the delivery worker. The worker ends once every dispatcher clone is dropped.
    pub fn spawn(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let breaker = create_notification_circuit_breaker();

        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                if let Err(e) = deliver(notifier.as_ref(), &notification, &policy, &breaker).await {
                    tracing::error!(
                        "Dropping notification {} for candidate {}: {}",
                        notification.event_name(),
                        notification.candidate_id(),
                        e
                    );
                }
            }
            tracing::debug!("Notification worker stopped");
        });

        (Self { tx }, handle)
    }

    pub fn dispatch(&self, notification: Notification) {
        if let Err(e) = self.tx.send(notification) {
            tracing::error!("Notification worker is gone, dropping {}", e.0.event_name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyNotifier {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for FlakyNotifier {
        async fn send(&self, _notification: &Notification) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(NotifyError::Transport("connection reset".to_string()));
            }
            Ok(())
        }
    }

    fn event() -> Notification {
        Notification::ConsultantAssigned {
            candidate_id: Uuid::new_v4(),
            consultant_id: Uuid::new_v4(),
            reassigned: false,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let notifier = FlakyNotifier {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let breaker = create_notification_circuit_breaker();
        let attempts = deliver(&notifier, &event(), &fast_policy(), &breaker)
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let notifier = FlakyNotifier {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        };
        let breaker = create_notification_circuit_breaker();
        let err = deliver(&notifier, &event(), &fast_policy(), &breaker)
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(event()).unwrap();
        assert_eq!(value["event"], "consultant_assigned");
        assert_eq!(value["reassigned"], false);
    }
}
