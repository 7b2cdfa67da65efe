//! Scan engine data model
//!
//! Types shared by every component of the engine:
//! - Actor identity and tenant scope
//! - Decode attempts and the outcome of a submission
//! - Cooldown and camera state snapshots published to the presentation layer
//! - Wire shapes of the backend attendance service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

use crate::error::ErrorKind;

/// The logged-in identity performing scans, scoped to one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    pub user_id: String,
    pub username: String,
    pub role: String,
    /// Company the actor belongs to. Owners have none.
    pub tenant_id: Option<String>,
    pub tenant_name: Option<String>,
}

impl ActorIdentity {
    pub fn new(user_id: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: String::new(),
            role: "user".to_string(),
            tenant_id,
            tenant_name: None,
        }
    }
}

/// Camera facing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    pub fn opposite(self) -> Self {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

impl Default for Facing {
    fn default() -> Self {
        Facing::Back
    }
}

impl fmt::Display for Facing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facing::Front => write!(f, "front"),
            Facing::Back => write!(f, "back"),
        }
    }
}

/// A decoded payload waiting for classification
#[derive(Debug, Clone)]
pub struct ScanAttempt {
    pub payload: String,
    pub scanned_at: DateTime<Utc>,
    /// Monotonic instant used for freshness checks
    pub observed: Instant,
    /// Epoch of the camera stream that produced the payload
    pub stream_epoch: u64,
}

impl ScanAttempt {
    pub fn new(payload: impl Into<String>, stream_epoch: u64) -> Self {
        Self {
            payload: payload.into(),
            scanned_at: Utc::now(),
            observed: Instant::now(),
            stream_epoch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    CheckIn,
    CheckOut,
}

impl fmt::Display for AttendanceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttendanceAction::CheckIn => write!(f, "check-in"),
            AttendanceAction::CheckOut => write!(f, "check-out"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Unauthorized,
    Cooldown,
    ServerError,
    Malformed,
}

/// How the presentation layer should render an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Warning,
    Error,
}

/// Terminal, user-visible result of one scan submission
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanOutcome {
    Accepted {
        action: AttendanceAction,
        subject_name: String,
        occurred_at: DateTime<Utc>,
        cooldown_seconds: u32,
    },
    Rejected {
        reason: RejectReason,
        message: String,
        cooldown_seconds_remaining: Option<u32>,
    },
}

impl ScanOutcome {
    pub fn rejected(reason: RejectReason, message: impl Into<String>) -> Self {
        ScanOutcome::Rejected {
            reason,
            message: message.into(),
            cooldown_seconds_remaining: None,
        }
    }

    pub fn cooldown(message: impl Into<String>, remaining: Option<u32>) -> Self {
        ScanOutcome::Rejected {
            reason: RejectReason::Cooldown,
            message: message.into(),
            cooldown_seconds_remaining: remaining,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ScanOutcome::Accepted { .. })
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            ScanOutcome::Accepted { .. } => None,
            ScanOutcome::Rejected { reason, .. } => Some(*reason),
        }
    }

    /// Cooldown the server asked for, if any. Zero means none.
    pub fn server_cooldown(&self) -> u32 {
        match self {
            ScanOutcome::Accepted { cooldown_seconds, .. } => *cooldown_seconds,
            ScanOutcome::Rejected {
                reason: RejectReason::Cooldown,
                cooldown_seconds_remaining,
                ..
            } => cooldown_seconds_remaining.unwrap_or(0),
            ScanOutcome::Rejected { .. } => 0,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            ScanOutcome::Accepted { .. } => Severity::Success,
            ScanOutcome::Rejected { reason: RejectReason::Cooldown, .. } => Severity::Warning,
            ScanOutcome::Rejected { .. } => Severity::Error,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.reject_reason().map(|reason| match reason {
            RejectReason::Unauthorized => ErrorKind::Unauthorized,
            RejectReason::Cooldown => ErrorKind::CooldownRejected,
            RejectReason::ServerError => ErrorKind::ServerError,
            RejectReason::Malformed => ErrorKind::Malformed,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CooldownState {
    pub remaining_seconds: u32,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CameraState {
    pub facing: Facing,
    pub running: bool,
}

/// Client-visible state of the scan session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Capturing,
    Submitting,
    CooldownHold,
}

/// Body of the scan request (attendance.scan contract)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub qr_code: String,
    pub user_id: String,
}

/// Response of the backend attendance service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanResponse {
    pub success: bool,
    #[serde(default)]
    pub action: Option<AttendanceAction>,
    #[serde(default)]
    pub employee_name: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub cooldown_seconds: Option<u32>,
}
