//! Backend attendance service client
//!
//! One operation: `process_scan(payload, actor)`. The HTTP implementation
//! attaches the session's bearer token and invalidates the session on `401`.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::model::{ActorIdentity, ScanRequest, ScanResponse};
use crate::session::SharedSession;

#[async_trait]
pub trait AttendanceBackend: Send + Sync {
    async fn process_scan(
        &self,
        payload: &str,
        actor: &ActorIdentity,
    ) -> Result<ScanResponse, BackendError>;
}

/// FastAPI error body
#[derive(Debug, Deserialize)]
struct ErrorDetail {
    detail: String,
}

pub struct HttpAttendanceBackend {
    client: reqwest::Client,
    config: BackendConfig,
    session: SharedSession,
}

impl HttpAttendanceBackend {
    pub fn new(config: BackendConfig, session: SharedSession) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("timeclock-scanner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, config, session))
    }

    pub fn with_client(client: reqwest::Client, config: BackendConfig, session: SharedSession) -> Self {
        Self { client, config, session }
    }

    /// Map a non-2xx, non-401 response body onto a scan failure when possible
    fn failure_from_body(status: u16, body: String) -> Result<ScanResponse, BackendError> {
        if let Ok(response) = serde_json::from_str::<ScanResponse>(&body) {
            return Ok(response);
        }
        if let Ok(detail) = serde_json::from_str::<ErrorDetail>(&body) {
            return Ok(ScanResponse {
                success: false,
                message: detail.detail,
                ..Default::default()
            });
        }
        Err(BackendError::Status { status, body })
    }
}

#[async_trait]
impl AttendanceBackend for HttpAttendanceBackend {
    async fn process_scan(
        &self,
        payload: &str,
        actor: &ActorIdentity,
    ) -> Result<ScanResponse, BackendError> {
        let token = self.session.bearer().ok_or(BackendError::NotAuthenticated)?;

        let request = ScanRequest {
            qr_code: payload.to_string(),
            user_id: actor.user_id.clone(),
        };

        let response = self
            .client
            .post(self.config.scan_url())
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        debug!("Scan request answered with HTTP {}", status);

        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.session.invalidate();
            return Err(BackendError::SessionExpired);
        }

        if status.is_success() {
            return response
                .json::<ScanResponse>()
                .await
                .map_err(|e| BackendError::InvalidResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            warn!("Scan request rejected with HTTP {}", status);
            return Self::failure_from_body(status.as_u16(), body);
        }

        Err(BackendError::Status { status: status.as_u16(), body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detail_body_becomes_failure() {
        let response =
            HttpAttendanceBackend::failure_from_body(403, r#"{"detail":"Access denied"}"#.into()).unwrap();
        assert!(!response.success);
        assert_eq!(response.message, "Access denied");
    }

    #[test]
    fn test_scan_shaped_error_body_is_kept() {
        let body = r#"{"success":false,"message":"Please wait 3 seconds","cooldown_seconds":3}"#;
        let response = HttpAttendanceBackend::failure_from_body(429, body.into()).unwrap();
        assert_eq!(response.cooldown_seconds, Some(3));
    }

    #[test]
    fn test_unparsable_error_body() {
        let err = HttpAttendanceBackend::failure_from_body(400, "<html>".into()).unwrap_err();
        assert!(matches!(err, BackendError::Status { status: 400, .. }));
    }
}
