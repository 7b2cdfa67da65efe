//! TimeClock kiosk scanner
//!
//! Headless runner for the attendance scan engine:
//! - Loads configuration (file, `.env`, environment)
//! - Establishes the session (pre-issued token or login)
//! - Reads badge payloads from a keyboard-wedge QR reader on stdin
//! - Prints outcomes until Ctrl-C

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use timeclock_scanner::camera::{LineFrameSource, TextDecoder};
use timeclock_scanner::config::ScannerConfig;
use timeclock_scanner::session::{self, SessionContext};
use timeclock_scanner::{console, spawn_scanner, ActorIdentity, HttpAttendanceBackend, ScannerDeps};

async fn establish_session(config: &ScannerConfig) -> Result<SessionContext> {
    let auth = &config.auth;

    if let Some(token) = &auth.token {
        let Some(user_id) = &auth.user_id else {
            bail!("auth.token is set but auth.user_id is missing");
        };
        let mut actor = ActorIdentity::new(user_id.clone(), auth.company_id.clone());
        actor.username = auth.username.clone().unwrap_or_default();
        info!("Using pre-issued token for user {}", user_id);
        return Ok(SessionContext::new(actor, token.clone()));
    }

    match (&auth.username, &auth.password) {
        (Some(username), Some(password)) => {
            let client = reqwest::Client::new();
            session::login(&client, &config.backend, username, password)
                .await
                .context("Login failed")
        }
        _ => bail!("No credentials: set TIMECLOCK_TOKEN + TIMECLOCK_USER_ID or TIMECLOCK_USERNAME + TIMECLOCK_PASSWORD"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("timeclock_scanner=info")),
        )
        .init();

    info!("⏱️ TimeClock scanner starting...");

    let config = ScannerConfig::load().await.context("Failed to load configuration")?;
    let session = establish_session(&config).await?.shared();

    let backend = HttpAttendanceBackend::new(config.backend.clone(), session.clone())
        .context("Failed to build backend client")?;

    let scanner = spawn_scanner(
        &config,
        ScannerDeps {
            session: session.clone(),
            backend: Arc::new(backend),
            source: Arc::new(LineFrameSource::stdin().context("Failed to start the badge reader")?),
            decoder: Arc::new(TextDecoder),
        },
    );

    let handle = scanner.handle.clone();
    let presenter = tokio::spawn(console::present(handle.clone(), scanner.outcomes));

    handle.start().await.context("Failed to start scanning")?;
    info!("Ready: present a badge to the reader");

    let mut session_state = session.subscribe();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
        _ = session_state.wait_for(|valid| !*valid) => {
            warn!("Session expired, log in again to continue scanning");
        }
    }

    handle.stop().await.ok();
    handle.shutdown().await;
    scanner.task.await.context("Scan engine task failed")?;
    presenter.await.ok();

    Ok(())
}
