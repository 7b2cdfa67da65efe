//! Line-oriented frame source for hand-held readers
//!
//! USB QR readers in keyboard-wedge mode type one payload per line. Each line
//! is treated as a frame. Lines arrive on a channel that outlives any single
//! stream, so the "camera" can be reopened after a stop or switch. Facing is
//! accepted and ignored.
//!
//! Stdin is read on a plain OS thread: a blocking read cannot be cancelled,
//! and parked on the runtime's blocking pool it would hold up shutdown until
//! the next line is typed.

use async_trait::async_trait;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{DecodeAttempt, Decoder, Frame, FrameSource, FrameStream};
use crate::error::CameraError;
use crate::model::Facing;

const LINE_BUFFER: usize = 16;

pub struct LineFrameSource {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl LineFrameSource {
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self { lines: Arc::new(Mutex::new(lines)) }
    }

    /// Read lines from stdin on a dedicated thread
    pub fn stdin() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    match line {
                        Ok(line) => {
                            if tx.blocking_send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Reading stdin failed: {}", e);
                            break;
                        }
                    }
                }
                debug!("Stdin reader finished");
            })?;
        Ok(Self::new(rx))
    }
}

#[async_trait]
impl FrameSource for LineFrameSource {
    async fn open(&self, facing: Facing) -> Result<Box<dyn FrameStream>, CameraError> {
        // Only one stream may hold the reader at a time
        let guard = self.lines.clone().try_lock_owned().map_err(|_| {
            CameraError::Device("line reader already in use".to_string())
        })?;
        debug!("Line reader opened ({} facing requested)", facing);
        Ok(Box::new(LineStream { lines: guard }))
    }
}

struct LineStream {
    lines: OwnedMutexGuard<mpsc::Receiver<String>>,
}

#[async_trait]
impl FrameStream for LineStream {
    async fn next_frame(&mut self) -> Option<Frame> {
        // `Receiver::recv` is cancel-safe; `None` once the reader is gone
        self.lines.recv().await.map(|line| Frame::new(line.into_bytes()))
    }

    async fn release(self: Box<Self>) {
        debug!("Line reader released");
    }
}

/// Treats frame bytes as UTF-8 text; blank frames carry no payload
#[derive(Debug, Default, Clone)]
pub struct TextDecoder;

impl Decoder for TextDecoder {
    fn decode(&self, frame: &Frame) -> DecodeAttempt {
        match std::str::from_utf8(&frame.data) {
            Ok(text) => {
                let payload = text.trim();
                if payload.is_empty() {
                    DecodeAttempt::NoPayload
                } else {
                    DecodeAttempt::Payload(payload.to_string())
                }
            }
            Err(_) => DecodeAttempt::NoPayload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_decoder() {
        let decoder = TextDecoder;
        assert_eq!(
            decoder.decode(&Frame::new(b" QR-EMP-001\r\n".to_vec())),
            DecodeAttempt::Payload("QR-EMP-001".into())
        );
        assert_eq!(decoder.decode(&Frame::new(b"\n".to_vec())), DecodeAttempt::NoPayload);
        assert_eq!(decoder.decode(&Frame::new(vec![0xff, 0xfe])), DecodeAttempt::NoPayload);
    }

    #[tokio::test]
    async fn test_line_source_reopens_on_shared_reader() {
        let (tx, rx) = mpsc::channel(4);
        let source = LineFrameSource::new(rx);
        tx.send("QR-EMP-001".to_string()).await.unwrap();
        tx.send("QR-EMP-002".to_string()).await.unwrap();

        let mut first = source.open(Facing::Back).await.unwrap();
        assert!(source.open(Facing::Front).await.is_err());
        let frame = first.next_frame().await.unwrap();
        assert_eq!(frame.data, b"QR-EMP-001");
        first.release().await;

        let mut second = source.open(Facing::Front).await.unwrap();
        let frame = second.next_frame().await.unwrap();
        assert_eq!(frame.data, b"QR-EMP-002");

        drop(tx);
        assert!(second.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_pending_read_is_cancel_safe() {
        let (tx, rx) = mpsc::channel(4);
        let source = LineFrameSource::new(rx);
        let mut stream = source.open(Facing::Back).await.unwrap();

        // A read abandoned mid-wait loses nothing
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), stream.next_frame()).await;
        assert!(waited.is_err());

        tx.send("QR-EMP-001".to_string()).await.unwrap();
        let frame = stream.next_frame().await.unwrap();
        assert_eq!(frame.data, b"QR-EMP-001");
    }
}
