//! TCP forward handler
//!
//! The concrete route handler the CLI registers: payloads arriving for one
//! remote port are written to a local TCP service, and whatever the service
//! sends back is pumped to the master as packets tagged with the same remote
//! port. An inbound packet with an empty payload closes the local connection,
//! mirroring the close convention on the return path.

use crate::router::{RouteError, RouteHandler};
use crate::writer::FrameWriter;
use backhaul_proto::Packet;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

pub struct TcpForwardHandler {
    remote_port: u16,
    target_addr: String,
    local: Mutex<Option<OwnedWriteHalf>>,
}

impl TcpForwardHandler {
    pub fn new(remote_port: u16, target_addr: impl Into<String>) -> Self {
        Self {
            remote_port,
            target_addr: target_addr.into(),
            local: Mutex::new(None),
        }
    }

    /// Connect to the local target and start the response pump
    async fn connect(&self, writer: Arc<FrameWriter>) -> Result<OwnedWriteHalf, RouteError> {
        let stream = TcpStream::connect(&self.target_addr).await.map_err(|e| {
            RouteError::Connect {
                address: self.target_addr.clone(),
                source: e,
            }
        })?;

        tracing::debug!(
            remote_port = self.remote_port,
            target = %self.target_addr,
            "connected to local target"
        );

        let (read_half, write_half) = stream.into_split();
        let remote_port = self.remote_port;
        tokio::spawn(async move {
            pump_responses(read_half, writer, remote_port).await;
        });

        Ok(write_half)
    }

    async fn disconnect(&self) {
        let mut local = self.local.lock().await;
        if let Some(mut write_half) = local.take() {
            tracing::debug!(
                remote_port = self.remote_port,
                target = %self.target_addr,
                "closing local connection"
            );
            let _ = write_half.shutdown().await;
        }
    }
}

#[async_trait]
impl RouteHandler for TcpForwardHandler {
    async fn handle(&self, packet: Packet, writer: Arc<FrameWriter>) -> Result<(), RouteError> {
        if packet.payload.is_empty() {
            self.disconnect().await;
            return Ok(());
        }

        let mut local = self.local.lock().await;
        if local.is_none() {
            *local = Some(self.connect(writer).await?);
        }
        if let Some(write_half) = local.as_mut() {
            write_half.write_all(&packet.payload).await?;
        }
        Ok(())
    }

    async fn close(&self) {
        self.disconnect().await;
    }
}

/// Read local responses and send them to the master through the shared writer.
/// An EOF from the local service becomes an empty packet, signaling close.
async fn pump_responses(mut read_half: OwnedReadHalf, writer: Arc<FrameWriter>, remote_port: u16) {
    let mut buffer = vec![0u8; 16384];
    loop {
        match read_half.read(&mut buffer).await {
            Ok(0) => {
                tracing::debug!(remote_port, "local target closed");
                let mut packet = Packet::new(remote_port, Vec::new());
                let _ = writer.send(&mut packet).await;
                break;
            }
            Ok(n) => {
                let mut packet = Packet::new(remote_port, buffer[..n].to_vec());
                if let Err(e) = writer.send(&mut packet).await {
                    tracing::warn!(remote_port, error = %e, "failed to send response packet");
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(remote_port, error = %e, "local read failed");
                break;
            }
        }
    }
}
