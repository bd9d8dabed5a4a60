//! Single-writer discipline for the control connection
//!
//! The connection is not safe for concurrent unsynchronized writers: the
//! handshake and every route handler that sends a response funnel their
//! frames through one `FrameWriter`. Reads stay on the session's background
//! task and never touch this path.

use backhaul_proto::{frame, FrameError, Packet, SequenceCounter};
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

pub struct FrameWriter {
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    counter: Arc<SequenceCounter>,
}

impl FrameWriter {
    pub fn new<W>(writer: W, counter: Arc<SequenceCounter>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Mutex::new(Box::new(writer)),
            counter,
        }
    }

    /// Encode and send one packet, assigning a sequence number if unset.
    ///
    /// The whole frame goes out under one lock acquisition, so frames from
    /// concurrent producers never interleave.
    pub async fn send(&self, packet: &mut Packet) -> Result<(), FrameError> {
        let mut inner = self.inner.lock().await;
        frame::write_frame(&mut *inner, packet, &self.counter).await
    }

    /// Shut down the write side of the connection
    pub async fn shutdown(&self) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        let mut inner = self.inner.lock().await;
        inner.shutdown().await
    }
}
