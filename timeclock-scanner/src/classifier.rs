//! Scan classifier
//!
//! Forwards `{payload, actor}` to the backend and maps the answer onto a
//! [`ScanOutcome`]. No authorization logic lives here.
//!
//! The backend does not return a structured rejection code, so a failure is
//! told apart as "cooldown" or "unauthorized" by keywords in its message.
//! This is fragile: a reworded backend message silently turns a cooldown
//! into an authorization error. Keep `scan.cooldown_markers` in sync with the
//! backend until it reports a code.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use crate::backend::AttendanceBackend;
use crate::error::BackendError;
use crate::model::{ActorIdentity, RejectReason, ScanAttempt, ScanOutcome, ScanResponse};

pub struct ScanClassifier {
    backend: Arc<dyn AttendanceBackend>,
    cooldown_markers: Vec<String>,
}

/// Outcome of a classified submission plus whether the session must end
#[derive(Debug, Clone)]
pub struct Classified {
    pub outcome: ScanOutcome,
    pub session_expired: bool,
}

impl ScanClassifier {
    pub fn new(backend: Arc<dyn AttendanceBackend>, cooldown_markers: Vec<String>) -> Self {
        let cooldown_markers = cooldown_markers.into_iter().map(|m| m.to_lowercase()).collect();
        Self { backend, cooldown_markers }
    }

    pub async fn classify(&self, attempt: &ScanAttempt, actor: &ActorIdentity) -> Classified {
        match self.backend.process_scan(&attempt.payload, actor).await {
            Ok(response) => Classified {
                outcome: self.map_response(response, attempt.scanned_at),
                session_expired: false,
            },
            Err(e) => self.map_error(e),
        }
    }

    pub fn map_response(&self, response: ScanResponse, scanned_at: DateTime<Utc>) -> ScanOutcome {
        if response.success {
            return match (response.action, response.employee_name) {
                (Some(action), Some(subject_name)) => ScanOutcome::Accepted {
                    action,
                    subject_name,
                    occurred_at: response
                        .time
                        .as_deref()
                        .and_then(parse_backend_time)
                        .unwrap_or(scanned_at),
                    cooldown_seconds: response.cooldown_seconds.unwrap_or(0),
                },
                _ => ScanOutcome::rejected(
                    RejectReason::ServerError,
                    "Backend reported success without an action",
                ),
            };
        }

        if self.is_cooldown_message(&response.message) {
            let remaining = response
                .cooldown_seconds
                .or_else(|| first_number(&response.message));
            return ScanOutcome::cooldown(response.message, remaining);
        }

        ScanOutcome::rejected(RejectReason::Unauthorized, response.message)
    }

    fn map_error(&self, err: BackendError) -> Classified {
        match err {
            BackendError::SessionExpired | BackendError::NotAuthenticated => Classified {
                outcome: ScanOutcome::rejected(
                    RejectReason::Unauthorized,
                    "Session expired, please log in again",
                ),
                session_expired: true,
            },
            other => {
                error!("Scan submission failed: {}", other);
                Classified {
                    outcome: ScanOutcome::rejected(RejectReason::ServerError, other.to_string()),
                    session_expired: false,
                }
            }
        }
    }

    pub fn is_cooldown_message(&self, message: &str) -> bool {
        let lowered = message.to_lowercase();
        let hit = self.cooldown_markers.iter().any(|m| lowered.contains(m.as_str()));
        debug!("Cooldown heuristic on {:?}: {}", message, hit);
        hit
    }
}

/// Accepts RFC 3339 or the naive ISO timestamps Python's `isoformat()` emits
fn parse_backend_time(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn first_number(message: &str) -> Option<u32> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::model::AttendanceAction;
    use async_trait::async_trait;

    struct Fixed(parking_lot::Mutex<Option<Result<ScanResponse, BackendError>>>);

    #[async_trait]
    impl AttendanceBackend for Fixed {
        async fn process_scan(
            &self,
            _payload: &str,
            _actor: &ActorIdentity,
        ) -> Result<ScanResponse, BackendError> {
            self.0.lock().take().unwrap_or(Err(BackendError::InvalidResponse("drained".into())))
        }
    }

    fn classifier_with(result: Result<ScanResponse, BackendError>) -> ScanClassifier {
        ScanClassifier::new(
            Arc::new(Fixed(parking_lot::Mutex::new(Some(result)))),
            ScanConfig::default().cooldown_markers,
        )
    }

    fn failure(message: &str) -> ScanResponse {
        ScanResponse {
            success: false,
            message: message.to_string(),
            ..Default::default()
        }
    }

    fn actor() -> ActorIdentity {
        ActorIdentity::new("u-1", Some("1".into()))
    }

    #[tokio::test]
    async fn test_accepted_check_in() {
        let classifier = classifier_with(Ok(ScanResponse {
            success: true,
            action: Some(AttendanceAction::CheckIn),
            employee_name: Some("Jan Kowalski".into()),
            time: Some("2024-03-01T08:00:00".into()),
            message: "ok".into(),
            cooldown_seconds: Some(5),
        }));
        let attempt = ScanAttempt::new("QR-EMP-001", 1);
        let classified = classifier.classify(&attempt, &actor()).await;

        match classified.outcome {
            ScanOutcome::Accepted { action, subject_name, occurred_at, cooldown_seconds } => {
                assert_eq!(action, AttendanceAction::CheckIn);
                assert_eq!(subject_name, "Jan Kowalski");
                assert_eq!(occurred_at.to_rfc3339(), "2024-03-01T08:00:00+00:00");
                assert_eq!(cooldown_seconds, 5);
            }
            other => panic!("expected accepted, got {other:?}"),
        }
        assert!(!classified.session_expired);
    }

    #[test]
    fn test_cooldown_vs_unauthorized_split() {
        let classifier = classifier_with(Ok(ScanResponse::default()));
        let now = Utc::now();

        let cooldown = classifier.map_response(failure("Please wait 4 seconds before scanning again"), now);
        assert_eq!(cooldown, ScanOutcome::cooldown("Please wait 4 seconds before scanning again", Some(4)));

        let polish = classifier.map_response(failure("Poczekaj 3 sekund"), now);
        assert_eq!(polish.reject_reason(), Some(RejectReason::Cooldown));

        let tenant = classifier.map_response(failure("Employee belongs to another company"), now);
        assert_eq!(tenant.reject_reason(), Some(RejectReason::Unauthorized));

        let inactive = classifier.map_response(failure("Employee is inactive"), now);
        assert_eq!(inactive.reject_reason(), Some(RejectReason::Unauthorized));
    }

    #[test]
    fn test_structured_cooldown_wins_over_message_number() {
        let classifier = classifier_with(Ok(ScanResponse::default()));
        let mut response = failure("Cooldown active (limit 5s)");
        response.cooldown_seconds = Some(2);
        let outcome = classifier.map_response(response, Utc::now());
        assert_eq!(outcome.server_cooldown(), 2);
    }

    #[test]
    fn test_success_without_action_is_server_error() {
        let classifier = classifier_with(Ok(ScanResponse::default()));
        let outcome = classifier.map_response(
            ScanResponse { success: true, ..Default::default() },
            Utc::now(),
        );
        assert_eq!(outcome.reject_reason(), Some(RejectReason::ServerError));
    }

    #[tokio::test]
    async fn test_transport_failure_is_server_error() {
        let classifier = classifier_with(Err(BackendError::Status { status: 503, body: String::new() }));
        let classified = classifier.classify(&ScanAttempt::new("QR-EMP-001", 1), &actor()).await;
        assert_eq!(classified.outcome.reject_reason(), Some(RejectReason::ServerError));
        assert!(!classified.session_expired);
    }

    #[tokio::test]
    async fn test_expired_session_is_flagged() {
        let classifier = classifier_with(Err(BackendError::SessionExpired));
        let classified = classifier.classify(&ScanAttempt::new("QR-EMP-001", 1), &actor()).await;
        assert_eq!(classified.outcome.reject_reason(), Some(RejectReason::Unauthorized));
        assert!(classified.session_expired);
    }

    #[test]
    fn test_time_parsing() {
        assert!(parse_backend_time("2024-03-01T08:00:00.123456").is_some());
        assert!(parse_backend_time("2024-03-01T08:00:00Z").is_some());
        assert!(parse_backend_time("08:00").is_none());
        assert_eq!(first_number("wait 12s, then 3"), Some(12));
        assert_eq!(first_number("no digits"), None);
    }
}
