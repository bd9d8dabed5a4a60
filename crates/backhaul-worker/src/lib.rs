//! Backhaul worker - reverse tunnel client
//!
//! A worker dials out to a master over a single TCP control connection,
//! authenticates with a handshake frame, and serves traffic addressed to the
//! master's remote ports by dispatching inbound packets to locally registered
//! route handlers. All traffic is multiplexed over the one outbound
//! connection the worker initiated, so it can operate from behind NAT.

pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod router;
pub mod worker;
pub mod writer;

pub use config::WorkerConfig;
pub use context::StopContext;
pub use error::WorkerError;
pub use forward::TcpForwardHandler;
pub use router::{RouteError, RouteHandler, RouteRegistry};
pub use worker::{SessionState, Worker};
pub use writer::FrameWriter;
