//! Camera lifecycle adapter
//!
//! Wraps frame source acquisition and release:
//! - `start(facing)` opens one stream and spawns a frame pump
//! - `switch(facing)` releases the current stream before opening the next
//! - `stop()` is idempotent
//!
//! The pump runs every frame through the [`Decoder`] and forwards payloads
//! to the controller. Frames without a payload are decode noise and are
//! dropped here.

pub mod line;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::CameraError;
use crate::model::{CameraState, Facing, ScanAttempt};

pub use line::{LineFrameSource, TextDecoder};

/// Raw image (or reader line) captured by a frame source
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into(), captured_at: Instant::now() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeAttempt {
    NoPayload,
    Payload(String),
}

/// QR decoding capability. Failures are expected and are not errors.
pub trait Decoder: Send + Sync {
    fn decode(&self, frame: &Frame) -> DecodeAttempt;
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Acquire exclusive access to a camera facing the given direction
    async fn open(&self, facing: Facing) -> Result<Box<dyn FrameStream>, CameraError>;
}

#[async_trait]
pub trait FrameStream: Send {
    /// Next frame, or `None` when the device went away.
    /// Must be cancel-safe: the pump races it against its stop signal.
    async fn next_frame(&mut self) -> Option<Frame>;

    /// Release the device. Called exactly once per opened stream.
    async fn release(self: Box<Self>);
}

/// Events the pump sends to the controller
#[derive(Debug)]
pub enum CameraEvent {
    Decoded(ScanAttempt),
    StreamEnded { epoch: u64 },
}

struct Pump {
    epoch: u64,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct CameraAdapter {
    source: std::sync::Arc<dyn FrameSource>,
    decoder: std::sync::Arc<dyn Decoder>,
    events_tx: mpsc::Sender<CameraEvent>,
    state: CameraState,
    state_tx: watch::Sender<CameraState>,
    pump: Option<Pump>,
    epoch: u64,
}

impl CameraAdapter {
    pub fn new(
        source: std::sync::Arc<dyn FrameSource>,
        decoder: std::sync::Arc<dyn Decoder>,
        facing: Facing,
        events_tx: mpsc::Sender<CameraEvent>,
    ) -> Self {
        let state = CameraState { facing, running: false };
        let (state_tx, _) = watch::channel(state);
        Self {
            source,
            decoder,
            events_tx,
            state,
            state_tx,
            pump: None,
            epoch: 0,
        }
    }

    pub fn state(&self) -> CameraState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state_tx.subscribe()
    }

    /// Epoch of the stream currently open, if any
    pub fn current_epoch(&self) -> Option<u64> {
        self.pump.as_ref().map(|p| p.epoch)
    }

    pub async fn start(&mut self, facing: Facing) -> Result<(), CameraError> {
        if self.pump.is_some() {
            if self.state.facing == facing {
                return Ok(());
            }
            return self.switch(facing).await;
        }
        self.acquire(facing).await
    }

    /// Release the current stream, then open one facing the other way.
    /// When not running only the preferred facing changes.
    pub async fn switch(&mut self, facing: Facing) -> Result<(), CameraError> {
        if self.pump.is_none() {
            self.set_state(CameraState { facing, running: false });
            return Ok(());
        }
        self.release().await;
        self.acquire(facing).await
    }

    pub async fn stop(&mut self) {
        if self.pump.is_some() {
            self.release().await;
            info!("Camera stopped");
        }
        self.set_state(CameraState { facing: self.state.facing, running: false });
    }

    /// Forget a pump that ended on its own. Its stream is already released.
    pub async fn on_stream_ended(&mut self, epoch: u64) -> bool {
        if self.current_epoch() != Some(epoch) {
            return false;
        }
        warn!("Camera stream {} ended unexpectedly", epoch);
        self.release().await;
        self.set_state(CameraState { facing: self.state.facing, running: false });
        true
    }

    async fn acquire(&mut self, facing: Facing) -> Result<(), CameraError> {
        let stream = match self.source.open(facing).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Failed to open {} camera: {}", facing, e);
                self.set_state(CameraState { facing, running: false });
                return Err(e);
            }
        };

        self.epoch += 1;
        let epoch = self.epoch;
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_pump(
            epoch,
            stream,
            self.decoder.clone(),
            self.events_tx.clone(),
            stop_rx,
        ));
        self.pump = Some(Pump { epoch, stop_tx, handle });
        self.set_state(CameraState { facing, running: true });
        info!("Camera started ({} facing, stream {})", facing, epoch);
        Ok(())
    }

    /// Signal the pump and wait until it has released its stream
    async fn release(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.stop_tx.send(());
            if let Err(e) = pump.handle.await {
                warn!("Frame pump {} did not shut down cleanly: {}", pump.epoch, e);
            }
            debug!("Stream {} released", pump.epoch);
        }
    }

    fn set_state(&mut self, state: CameraState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

impl Drop for CameraAdapter {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            let _ = pump.stop_tx.send(());
        }
    }
}

async fn run_pump(
    epoch: u64,
    mut stream: Box<dyn FrameStream>,
    decoder: std::sync::Arc<dyn Decoder>,
    events_tx: mpsc::Sender<CameraEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let ended = loop {
        tokio::select! {
            _ = &mut stop_rx => break false,
            frame = stream.next_frame() => {
                let Some(frame) = frame else { break true };
                match decoder.decode(&frame) {
                    DecodeAttempt::NoPayload => trace!("No payload in frame"),
                    DecodeAttempt::Payload(payload) => {
                        let attempt = ScanAttempt::new(payload, epoch);
                        if events_tx.try_send(CameraEvent::Decoded(attempt)).is_err() {
                            trace!("Decode buffer full, dropping payload");
                        }
                    }
                }
            }
        }
    };

    stream.release().await;

    if ended {
        // The controller may be joining this pump instead of reading events
        tokio::select! {
            _ = events_tx.send(CameraEvent::StreamEnded { epoch }) => {}
            _ = stop_rx => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        opened: Vec<Facing>,
        released: usize,
        open_now: usize,
        max_open: usize,
    }

    struct TestSource {
        counters: Arc<Mutex<Counters>>,
        frames: Arc<Mutex<Option<mpsc::UnboundedSender<Option<Frame>>>>>,
        deny: bool,
    }

    struct TestStream {
        counters: Arc<Mutex<Counters>>,
        rx: mpsc::UnboundedReceiver<Option<Frame>>,
    }

    #[async_trait]
    impl FrameSource for TestSource {
        async fn open(&self, facing: Facing) -> Result<Box<dyn FrameStream>, CameraError> {
            if self.deny {
                return Err(CameraError::PermissionDenied("test".into()));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            *self.frames.lock() = Some(tx);
            let mut c = self.counters.lock();
            c.opened.push(facing);
            c.open_now += 1;
            c.max_open = c.max_open.max(c.open_now);
            Ok(Box::new(TestStream { counters: self.counters.clone(), rx }))
        }
    }

    #[async_trait]
    impl FrameStream for TestStream {
        async fn next_frame(&mut self) -> Option<Frame> {
            self.rx.recv().await.flatten()
        }

        async fn release(self: Box<Self>) {
            let mut c = self.counters.lock();
            c.released += 1;
            c.open_now -= 1;
        }
    }

    fn adapter(deny: bool) -> (CameraAdapter, Arc<Mutex<Counters>>, TestFrames, mpsc::Receiver<CameraEvent>) {
        let counters = Arc::new(Mutex::new(Counters::default()));
        let frames = Arc::new(Mutex::new(None));
        let source = TestSource { counters: counters.clone(), frames: frames.clone(), deny };
        let (tx, rx) = mpsc::channel(8);
        let adapter = CameraAdapter::new(Arc::new(source), Arc::new(TextDecoder::default()), Facing::Back, tx);
        (adapter, counters, TestFrames(frames), rx)
    }

    struct TestFrames(Arc<Mutex<Option<mpsc::UnboundedSender<Option<Frame>>>>>);

    impl TestFrames {
        fn push(&self, frame: Option<Frame>) {
            if let Some(tx) = self.0.lock().as_ref() {
                let _ = tx.send(frame);
            }
        }
    }

    #[tokio::test]
    async fn test_switch_releases_before_acquiring() {
        let (mut camera, counters, _frames, _rx) = adapter(false);

        camera.start(Facing::Back).await.unwrap();
        camera.switch(Facing::Front).await.unwrap();

        let c = counters.lock();
        assert_eq!(c.opened, vec![Facing::Back, Facing::Front]);
        assert_eq!(c.released, 1);
        assert_eq!(c.max_open, 1);
        drop(c);
        assert_eq!(camera.state(), CameraState { facing: Facing::Front, running: true });
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (mut camera, counters, _frames, _rx) = adapter(false);

        camera.stop().await;
        camera.start(Facing::Back).await.unwrap();
        camera.stop().await;
        camera.stop().await;

        assert_eq!(counters.lock().released, 1);
        assert!(!camera.state().running);
        assert_eq!(camera.current_epoch(), None);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_camera_stopped() {
        let (mut camera, _counters, _frames, _rx) = adapter(true);
        let err = camera.start(Facing::Front).await.unwrap_err();
        assert!(matches!(err, CameraError::PermissionDenied(_)));
        assert!(!camera.state().running);
    }

    #[tokio::test]
    async fn test_pump_forwards_payloads_and_drops_noise() {
        let (mut camera, _counters, frames, mut rx) = adapter(false);
        camera.start(Facing::Back).await.unwrap();

        frames.push(Some(Frame::new(b"   ".to_vec())));
        frames.push(Some(Frame::new(b"QR-EMP-001\n".to_vec())));

        match rx.recv().await.unwrap() {
            CameraEvent::Decoded(attempt) => {
                assert_eq!(attempt.payload, "QR-EMP-001");
                assert_eq!(Some(attempt.stream_epoch), camera.current_epoch());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_end_is_reported_once() {
        let (mut camera, counters, frames, mut rx) = adapter(false);
        camera.start(Facing::Back).await.unwrap();
        let epoch = camera.current_epoch().unwrap();

        frames.push(None);
        match rx.recv().await.unwrap() {
            CameraEvent::StreamEnded { epoch: ended } => assert_eq!(ended, epoch),
            other => panic!("unexpected event {other:?}"),
        }

        assert!(camera.on_stream_ended(epoch).await);
        assert!(!camera.on_stream_ended(epoch).await);
        assert_eq!(counters.lock().released, 1);
        assert!(!camera.state().running);
    }
}
