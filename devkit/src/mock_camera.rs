/*!
Mock camera for developing without a physical device

Implements `FrameSource` and records every open and release so tests can
assert that streams never overlap and are closed exactly once. Frames are
pushed into whichever stream is currently open.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use timeclock_scanner::camera::{Frame, FrameSource, FrameStream};
use timeclock_scanner::{CameraError, Facing};
use tokio::sync::mpsc;

#[derive(Default)]
struct CameraLedger {
    opened: Vec<Facing>,
    releases: Vec<u64>,
    open_now: usize,
    max_open: usize,
    deny: Option<CameraError>,
    next_id: u64,
    current: Option<(u64, mpsc::UnboundedSender<Option<Frame>>)>,
}

/// Mock camera that simulates a `FrameSource`
#[derive(Clone, Default)]
pub struct MockCamera {
    ledger: Arc<Mutex<CameraLedger>>,
}

impl MockCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `open` fail (permission denied, no device...)
    pub fn deny(&self, error: CameraError) {
        self.ledger.lock().deny = Some(error);
    }

    pub fn allow(&self) {
        self.ledger.lock().deny = None;
    }

    /// Show a badge to the open stream. Returns false when no stream is open.
    pub fn show(&self, payload: &str) -> bool {
        self.push(Some(Frame::new(payload.as_bytes().to_vec())))
    }

    /// A frame with nothing decodable in it
    pub fn show_blank(&self) -> bool {
        self.push(Some(Frame::new(Vec::new())))
    }

    /// Simulate the device disappearing
    pub fn unplug(&self) -> bool {
        self.push(None)
    }

    fn push(&self, frame: Option<Frame>) -> bool {
        let ledger = self.ledger.lock();
        match &ledger.current {
            Some((_, tx)) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Facing of every successful open, in order
    pub fn opened(&self) -> Vec<Facing> {
        self.ledger.lock().opened.clone()
    }

    /// Stream ids in release order
    pub fn releases(&self) -> Vec<u64> {
        self.ledger.lock().releases.clone()
    }

    pub fn open_streams(&self) -> usize {
        self.ledger.lock().open_now
    }

    pub fn max_concurrent_streams(&self) -> usize {
        self.ledger.lock().max_open
    }

    pub fn is_open(&self) -> bool {
        self.ledger.lock().current.is_some()
    }

    /// Wait until a stream is open, polling like the harness does for messages
    pub async fn wait_until_open(&self, timeout_ms: u64) -> bool {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if self.is_open() {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        self.is_open()
    }
}

#[async_trait]
impl FrameSource for MockCamera {
    async fn open(&self, facing: Facing) -> Result<Box<dyn FrameStream>, CameraError> {
        let mut ledger = self.ledger.lock();
        if let Some(err) = ledger.deny.clone() {
            log::info!("📷 [MOCK] Refused to open {} camera: {}", facing, err);
            return Err(err);
        }

        ledger.next_id += 1;
        let id = ledger.next_id;
        let (tx, rx) = mpsc::unbounded_channel();
        ledger.current = Some((id, tx));
        ledger.opened.push(facing);
        ledger.open_now += 1;
        ledger.max_open = ledger.max_open.max(ledger.open_now);

        log::info!("📷 [MOCK] Opened {} camera (stream {})", facing, id);
        Ok(Box::new(MockStream { id, rx, ledger: self.ledger.clone() }))
    }
}

struct MockStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<Option<Frame>>,
    ledger: Arc<Mutex<CameraLedger>>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_frame(&mut self) -> Option<Frame> {
        self.rx.recv().await.flatten()
    }

    async fn release(self: Box<Self>) {
        let mut ledger = self.ledger.lock();
        ledger.releases.push(self.id);
        ledger.open_now = ledger.open_now.saturating_sub(1);
        if matches!(&ledger.current, Some((id, _)) if *id == self.id) {
            ledger.current = None;
        }
        log::info!("📷 [MOCK] Released stream {}", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_show_release() {
        let camera = MockCamera::new();
        assert!(!camera.show("QR-EMP-001"));

        let mut stream = camera.open(Facing::Back).await.unwrap();
        assert!(camera.show("QR-EMP-001"));
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.data, b"QR-EMP-001");

        stream.release().await;
        assert_eq!(camera.releases(), vec![1]);
        assert_eq!(camera.open_streams(), 0);
        assert!(!camera.is_open());
    }

    #[tokio::test]
    async fn test_denied_open() {
        let camera = MockCamera::new();
        camera.deny(CameraError::NoDevice(Facing::Front));
        assert!(camera.open(Facing::Front).await.is_err());
        camera.allow();
        assert!(camera.open(Facing::Front).await.is_ok());
        assert_eq!(camera.opened(), vec![Facing::Front]);
    }
}
