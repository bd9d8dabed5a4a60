//! Route registry: remote port -> handler
//!
//! Routes are registered before (or while) a session runs and are torn down
//! in bulk when the session closes. The registry is consumed by the session's
//! background reader, which dispatches each inbound packet to the handler for
//! its remote port.

use crate::writer::FrameWriter;
use backhaul_proto::{FrameError, Packet};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors scoped to a single route. These never terminate the session.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to reach local target {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("io error on route: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame error on route: {0}")]
    Frame(#[from] FrameError),
}

/// Handler for traffic addressed to one remote port
#[async_trait]
pub trait RouteHandler: Send + Sync {
    /// Handle one inbound packet. `writer` is the session's shared frame
    /// writer for sending responses back to the master.
    async fn handle(&self, packet: Packet, writer: Arc<FrameWriter>) -> Result<(), RouteError>;

    /// Release per-route resources. Called exactly once at registry close.
    async fn close(&self) {}
}

/// Registry of remote-port routes.
///
/// `None` in the table slot means the registry has been closed.
pub struct RouteRegistry {
    routes: Mutex<Option<HashMap<u16, Arc<dyn RouteHandler>>>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Some(HashMap::new())),
        }
    }

    /// Register or replace the handler for a remote port. Last writer wins;
    /// the displaced handler, if any, is returned so the caller can release
    /// it. Registering against a closed registry drops the handler.
    pub fn add_route(
        &self,
        remote_port: u16,
        handler: Arc<dyn RouteHandler>,
    ) -> Option<Arc<dyn RouteHandler>> {
        if let Ok(mut guard) = self.routes.lock() {
            match guard.as_mut() {
                Some(routes) => {
                    tracing::debug!(remote_port, "registered route");
                    return routes.insert(remote_port, handler);
                }
                None => {
                    tracing::warn!(remote_port, "route registered after close, dropping");
                }
            }
        }
        None
    }

    /// Dispatch one inbound packet to the handler for its remote port.
    /// Unknown ports and handler failures are logged, never propagated.
    pub async fn dispatch(&self, packet: Packet, writer: Arc<FrameWriter>) {
        let remote_port = packet.remote_port;
        let handler = match self.routes.lock() {
            Ok(guard) => guard
                .as_ref()
                .and_then(|routes| routes.get(&remote_port).cloned()),
            Err(_) => None,
        };

        match handler {
            Some(handler) => {
                if let Err(e) = handler.handle(packet, writer).await {
                    tracing::warn!(remote_port, error = %e, "route handler failed");
                }
            }
            None => {
                tracing::debug!(remote_port, "no route for inbound packet");
            }
        }
    }

    /// Close every registered handler exactly once. Idempotent; registrations
    /// racing with close are dropped rather than leaked into a closed table.
    pub async fn close(&self) {
        let drained = match self.routes.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };

        if let Some(routes) = drained {
            for (remote_port, handler) in routes {
                tracing::debug!(remote_port, "closing route");
                handler.close().await;
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.routes.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    pub fn len(&self) -> usize {
        match self.routes.lock() {
            Ok(guard) => guard.as_ref().map(HashMap::len).unwrap_or(0),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        handled: AtomicUsize,
        closed: AtomicUsize,
    }

    impl CountingHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                handled: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RouteHandler for CountingHandler {
        async fn handle(
            &self,
            _packet: Packet,
            _writer: Arc<FrameWriter>,
        ) -> Result<(), RouteError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_writer() -> Arc<FrameWriter> {
        let (client, _server) = tokio::io::duplex(1024);
        Arc::new(FrameWriter::new(
            client,
            Arc::new(backhaul_proto::SequenceCounter::new()),
        ))
    }

    #[tokio::test]
    async fn test_dispatch_reaches_handler() {
        let registry = RouteRegistry::new();
        let handler = CountingHandler::new();
        registry.add_route(7000, handler.clone());

        registry
            .dispatch(Packet::new(7000, vec![1, 2, 3]), test_writer())
            .await;
        registry
            .dispatch(Packet::new(9999, vec![]), test_writer())
            .await;

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let registry = RouteRegistry::new();
        let first = CountingHandler::new();
        let second = CountingHandler::new();

        assert!(registry.add_route(7000, first.clone()).is_none());
        let displaced = registry.add_route(7000, second.clone());
        assert!(displaced.is_some());
        assert_eq!(registry.len(), 1);

        registry.close().await;

        // Only the live handler is closed; the displaced one was returned to
        // the caller and never double-closed by the registry.
        assert_eq!(first.closed.load(Ordering::SeqCst), 0);
        assert_eq!(second.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_exactly_once() {
        let registry = RouteRegistry::new();
        let handler = CountingHandler::new();
        registry.add_route(7000, handler.clone());

        registry.close().await;
        registry.close().await;

        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert!(registry.is_closed());
    }

    #[tokio::test]
    async fn test_add_after_close_is_dropped() {
        let registry = RouteRegistry::new();
        registry.close().await;

        let handler = CountingHandler::new();
        registry.add_route(7000, handler.clone());

        assert_eq!(registry.len(), 0);
        registry
            .dispatch(Packet::new(7000, vec![]), test_writer())
            .await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
    }
}
