//! TimeClock attendance scan engine
//!
//! Staff present a personal QR badge to a kiosk camera to check in or out:
//! - Frame acquisition and decoding behind the [`camera`] adapter
//! - Backend classification of each payload ([`classifier`], [`backend`])
//! - A cooldown between accepted scans ([`cooldown`])
//! - One controller task arbitrating all of it ([`controller`])

pub mod backend;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod console;
pub mod controller;
pub mod cooldown;
pub mod error;
pub mod model;
pub mod session;

pub use backend::{AttendanceBackend, HttpAttendanceBackend};
pub use camera::{DecodeAttempt, Decoder, Frame, FrameSource, FrameStream};
pub use config::ScannerConfig;
pub use controller::{spawn_scanner, Scanner, ScannerDeps, ScannerHandle};
pub use error::{BackendError, CameraError, CommandError, ConfigError, ErrorKind};
pub use model::{
    ActorIdentity, AttendanceAction, CameraState, CooldownState, Facing, Phase, RejectReason,
    ScanOutcome, ScanResponse, Severity,
};
pub use session::{SessionContext, SharedSession};
