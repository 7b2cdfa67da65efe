/*!
Test harness for the scan engine

Spawns a real controller wired to the mock camera and mock backend:
- Outcome collection with timeouts
- Waiting on phase transitions
- Clean shutdown
*/

use crate::mock_backend::MockBackend;
use crate::mock_camera::MockCamera;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use timeclock_scanner::camera::TextDecoder;
use timeclock_scanner::{
    spawn_scanner, ActorIdentity, Phase, ScanOutcome, ScannerConfig, ScannerDeps, ScannerHandle,
    SessionContext, SharedSession,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Complete scan engine under test
pub struct TestHarness {
    pub camera: MockCamera,
    pub backend: MockBackend,
    pub session: SharedSession,
    pub handle: ScannerHandle,
    outcomes: mpsc::UnboundedReceiver<ScanOutcome>,
    task: Option<JoinHandle<()>>,
}

impl TestHarness {
    /// Harness for `user-1` of company "1" with the default config
    pub fn new() -> Self {
        Self::with_config(ScannerConfig::default())
    }

    pub fn with_config(config: ScannerConfig) -> Self {
        env_logger::try_init().ok();

        let mut actor = ActorIdentity::new("user-1", Some("1".to_string()));
        actor.username = "user".to_string();
        actor.role = "user".to_string();
        actor.tenant_name = Some("Firma ABC".to_string());
        let session = SessionContext::new(actor, "test-token").shared();

        let camera = MockCamera::new();
        let backend = MockBackend::new();
        let scanner = spawn_scanner(
            &config,
            ScannerDeps {
                session: session.clone(),
                backend: Arc::new(backend.clone()),
                source: Arc::new(camera.clone()),
                decoder: Arc::new(TextDecoder),
            },
        );

        log::info!("🧪 Scan engine harness ready");
        Self {
            camera,
            backend,
            session,
            handle: scanner.handle,
            outcomes: scanner.outcomes,
            task: Some(scanner.task),
        }
    }

    /// Start scanning and wait for the camera to be up
    pub async fn start(&self) -> Result<()> {
        self.handle.start().await?;
        Ok(())
    }

    /// Show a badge to the camera
    pub fn scan(&self, payload: &str) {
        if !self.camera.show(payload) {
            log::warn!("⚠️ No open stream to show {} to", payload);
        }
    }

    pub async fn next_outcome(&mut self) -> Result<ScanOutcome> {
        self.next_outcome_within(DEFAULT_TIMEOUT_MS).await
    }

    pub async fn next_outcome_within(&mut self, timeout_ms: u64) -> Result<ScanOutcome> {
        match timeout(Duration::from_millis(timeout_ms), self.outcomes.recv()).await {
            Ok(Some(outcome)) => {
                log::info!("📨 Outcome: {:?}", outcome);
                Ok(outcome)
            }
            Ok(None) => anyhow::bail!("outcome stream closed"),
            Err(_) => anyhow::bail!("no outcome within {}ms", timeout_ms),
        }
    }

    /// Outcome already delivered, if any
    pub fn try_next_outcome(&mut self) -> Option<ScanOutcome> {
        self.outcomes.try_recv().ok()
    }

    pub async fn wait_for_phase(&self, phase: Phase) -> Result<()> {
        let mut rx = self.handle.watch_phase();
        timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS), rx.wait_for(|p| *p == phase))
            .await
            .map_err(|_| anyhow::anyhow!("phase {:?} not reached, still {:?}", phase, self.handle.phase()))??;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.handle.shutdown().await;
        if let Some(task) = self.task.take() {
            task.await?;
        }
        log::info!("🧹 Harness shut down");
        Ok(())
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
