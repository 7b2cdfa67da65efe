//! Error taxonomy of the scan engine

use thiserror::Error;

use crate::model::Facing;

/// Failure kinds a scan cycle can end in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CameraUnavailable,
    /// Absence of a payload in a frame. Never surfaced to the user.
    DecodeNoise,
    CooldownRejected,
    Unauthorized,
    ServerError,
    Malformed,
}

impl ErrorKind {
    /// Only a camera failure ends the session attempt
    pub fn is_recoverable(self) -> bool {
        !matches!(self, ErrorKind::CameraUnavailable)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no {0} camera available")]
    NoDevice(Facing),
    #[error("camera device error: {0}")]
    Device(String),
}

impl CameraError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::CameraUnavailable
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Network fault reported by a backend not built on reqwest
    #[error("network failure: {0}")]
    Network(String),
    #[error("session expired, re-authentication required")]
    SessionExpired,
    #[error("no bearer token in session")]
    NotAuthenticated,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::SessionExpired
            | BackendError::NotAuthenticated
            | BackendError::InvalidCredentials => ErrorKind::Unauthorized,
            _ => ErrorKind::ServerError,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("could not find config directory")]
    NoConfigDir,
}

/// Errors returned to callers of [`crate::controller::ScannerHandle`] commands
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    CameraUnavailable(#[from] CameraError),
    #[error("session invalidated, log in again before scanning")]
    SessionInvalidated,
    #[error("scan engine has shut down")]
    EngineStopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_camera_failures_are_terminal() {
        assert!(!ErrorKind::CameraUnavailable.is_recoverable());
        for kind in [
            ErrorKind::DecodeNoise,
            ErrorKind::CooldownRejected,
            ErrorKind::Unauthorized,
            ErrorKind::ServerError,
            ErrorKind::Malformed,
        ] {
            assert!(kind.is_recoverable(), "{kind:?} should be recoverable");
        }
    }

    #[test]
    fn test_backend_error_kinds() {
        assert_eq!(BackendError::SessionExpired.kind(), ErrorKind::Unauthorized);
        let status = BackendError::Status { status: 502, body: "bad gateway".into() };
        assert_eq!(status.kind(), ErrorKind::ServerError);
        assert_eq!(CameraError::NoDevice(Facing::Front).kind(), ErrorKind::CameraUnavailable);
    }
}
