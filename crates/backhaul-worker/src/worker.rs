//! Worker session lifecycle
//!
//! One session = one outbound TCP connection to the master. The foreground
//! flow dials (with a bounded retry loop), spawns the background reader,
//! writes the handshake frame, then blocks on the stop context. Teardown
//! closes the route registry strictly before the connection, so routes stop
//! accepting dispatch before their transport disappears.

use crate::config::WorkerConfig;
use crate::context::StopContext;
use crate::error::WorkerError;
use crate::router::{RouteHandler, RouteRegistry};
use crate::writer::FrameWriter;
use backhaul_proto::{frame, FrameError, Packet, SequenceCounter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::sleep;

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Dialing,
    Handshaking,
    Active,
    Closing,
    Terminated,
    Faulted,
}

/// The reverse tunnel worker.
///
/// Constructed once, `init`-ed once, then `start`-ed; `start` is the blocking
/// lifetime of the tunnel. After `start` returns the worker is terminated and
/// must be re-`init`-ed before reuse.
pub struct Worker {
    config: WorkerConfig,
    sequence: Arc<SequenceCounter>,
    router: Mutex<Arc<RouteRegistry>>,
    ctx: Mutex<Option<StopContext>>,
    fault: Arc<Mutex<Option<WorkerError>>>,
    state: Arc<Mutex<SessionState>>,
    initialized: AtomicBool,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            sequence: Arc::new(SequenceCounter::new()),
            router: Mutex::new(Arc::new(RouteRegistry::new())),
            ctx: Mutex::new(None),
            fault: Arc::new(Mutex::new(None)),
            state: Arc::new(Mutex::new(SessionState::Idle)),
            initialized: AtomicBool::new(false),
        }
    }

    /// Apply configuration defaults and construct a fresh route registry.
    /// Idempotent; required before `start` and again before reusing a
    /// terminated worker.
    pub fn init(&mut self) {
        self.config.apply_defaults();
        if let Ok(mut router) = self.router.lock() {
            *router = Arc::new(RouteRegistry::new());
        }
        if let Ok(mut ctx) = self.ctx.lock() {
            *ctx = None;
        }
        if let Ok(mut fault) = self.fault.lock() {
            *fault = None;
        }
        set_state(&self.state, SessionState::Idle);
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Register or replace the handler for a remote port
    pub fn add_route(&self, remote_port: u16, handler: Arc<dyn RouteHandler>) {
        self.router().add_route(remote_port, handler);
    }

    pub fn router(&self) -> Arc<RouteRegistry> {
        match self.router.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        match self.state.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Request shutdown. No-op if `start` has not produced a stop context
    /// yet; idempotent otherwise. Never blocks for termination - callers that
    /// need synchronous shutdown should wait for `start` to return.
    pub fn stop(&self) {
        if let Ok(guard) = self.ctx.lock() {
            if let Some(ctx) = guard.as_ref() {
                tracing::info!(worker_id = %self.config.worker_id, "stop requested");
                ctx.cancel();
            }
        }
    }

    /// Run the session to completion.
    ///
    /// Blocks until the stop context signals, then tears down in order:
    /// route registry first, connection second. Returns the fault that ended
    /// the session, or `Ok(())` on a clean stop or an orderly close by the
    /// master.
    pub async fn start(&self) -> Result<(), WorkerError> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(WorkerError::NotInitialized);
        }
        {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match *state {
                SessionState::Idle => {}
                SessionState::Terminated | SessionState::Faulted => {
                    return Err(WorkerError::NeedsReinit);
                }
                _ => return Err(WorkerError::AlreadyRunning),
            }
            *state = SessionState::Dialing;
        }
        tracing::debug!(worker_id = %self.config.worker_id, "session state: Dialing");

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                set_state(&self.state, SessionState::Faulted);
                return Err(e);
            }
        };

        let ctx = StopContext::new();
        if let Ok(mut guard) = self.ctx.lock() {
            *guard = Some(ctx.clone());
        }

        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(FrameWriter::new(write_half, self.sequence.clone()));

        // The background reader owns the read side for the rest of the
        // session; its exit moves the whole session toward Closing.
        ctx.add(1);
        let reader_ctx = ctx.clone();
        let reader_router = self.router();
        let reader_writer = writer.clone();
        let reader_fault = self.fault.clone();
        tokio::spawn(async move {
            read_loop(read_half, reader_router, reader_writer, &reader_ctx, reader_fault).await;
            reader_ctx.finish();
        });

        set_state(&self.state, SessionState::Handshaking);
        let mut hello = Packet::new(0, self.config.worker_id.clone().into_bytes());
        if let Err(e) = writer.send(&mut hello).await {
            // An unauthenticated session must not linger in Active
            tracing::error!(worker_id = %self.config.worker_id, error = %e, "handshake failed");
            ctx.cancel();
            self.teardown(&writer, &ctx).await;
            set_state(&self.state, SessionState::Faulted);
            return Err(WorkerError::Handshake(e));
        }

        tracing::info!(
            worker_id = %self.config.worker_id,
            master = %self.config.master_addr,
            "session active"
        );
        set_state(&self.state, SessionState::Active);
        ctx.cancelled().await;

        set_state(&self.state, SessionState::Closing);
        self.teardown(&writer, &ctx).await;

        let fault = match self.fault.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match fault {
            Some(e) => {
                set_state(&self.state, SessionState::Faulted);
                Err(e)
            }
            None => {
                tracing::info!(worker_id = %self.config.worker_id, "session terminated");
                set_state(&self.state, SessionState::Terminated);
                Ok(())
            }
        }
    }

    /// Dial the master with a bounded retry loop: up to `retry_max_attempts`
    /// attempts spaced by `retry_interval`, a fatal `Dial` error afterwards.
    async fn dial(&self) -> Result<TcpStream, WorkerError> {
        let addr = &self.config.master_addr;
        let interval = self.config.retry_interval;
        let max_attempts = self.config.retry_max_attempts;
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    tracing::info!(
                        worker_id = %self.config.worker_id,
                        master = %addr,
                        attempt,
                        "connected to master"
                    );
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.config.worker_id,
                        master = %addr,
                        attempt,
                        max_attempts,
                        error = %e,
                        "dial attempt failed"
                    );
                    last_err = Some(e);
                    if attempt < max_attempts {
                        sleep(interval).await;
                    }
                }
            }
        }

        Err(WorkerError::Dial {
            addr: addr.clone(),
            attempts: max_attempts,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::Other, "retry ceiling is zero")
            }),
        })
    }

    /// Ordered teardown: routes stop accepting dispatch before their
    /// transport disappears, then the reader is joined.
    async fn teardown(&self, writer: &FrameWriter, ctx: &StopContext) {
        self.router().close().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(worker_id = %self.config.worker_id, error = %e, "connection shutdown");
        }
        ctx.wait_idle().await;
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    router: Arc<RouteRegistry>,
    writer: Arc<FrameWriter>,
    ctx: &StopContext,
    fault: Arc<Mutex<Option<WorkerError>>>,
) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => {
                tracing::debug!("reader stopping on cancellation");
                break;
            }
            result = frame::read_frame(&mut read_half) => {
                match result {
                    Ok(packet) => router.dispatch(packet, writer.clone()).await,
                    Err(FrameError::Eof) => {
                        // Orderly close by the master is not a fault
                        tracing::info!("master closed the connection");
                        ctx.cancel();
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "read failed, cancelling session");
                        if let Ok(mut slot) = fault.lock() {
                            slot.get_or_insert(WorkerError::Read(e));
                        }
                        ctx.cancel();
                        break;
                    }
                }
            }
        }
    }
}

fn set_state(state: &Mutex<SessionState>, next: SessionState) {
    let mut guard = match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    tracing::debug!(from = ?*guard, to = ?next, "session state");
    *guard = next;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_worker_is_idle() {
        let worker = Worker::new(WorkerConfig::default());
        assert_eq!(worker.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_start_requires_init() {
        let worker = Worker::new(WorkerConfig::default());
        assert!(matches!(
            worker.start().await,
            Err(WorkerError::NotInitialized)
        ));
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let worker = Worker::new(WorkerConfig::default());
        worker.stop();
        worker.stop();
        assert_eq!(worker.state(), SessionState::Idle);
    }

    #[test]
    fn test_init_applies_defaults() {
        let mut worker = Worker::new(WorkerConfig::new("localhost:7070"));
        worker.init();
        assert!(!worker.worker_id().is_empty());
    }
}
