//! Worker error taxonomy

use backhaul_proto::FrameError;
use thiserror::Error;

/// Errors that can terminate a worker session
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to dial master {addr} after {attempts} attempts: {source}")]
    Dial {
        addr: String,
        attempts: u32,
        source: std::io::Error,
    },

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("handshake write failed: {0}")]
    Handshake(#[source] FrameError),

    #[error("connection lost: {0}")]
    Read(#[source] FrameError),

    #[error("worker already running")]
    AlreadyRunning,

    #[error("worker not initialized")]
    NotInitialized,

    #[error("worker session ended; call init() before starting again")]
    NeedsReinit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_display() {
        let err = WorkerError::Dial {
            addr: "master.example.com:7070".to_string(),
            attempts: 3,
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("after 3 attempts"));
        assert!(msg.contains("master.example.com:7070"));
    }
}
