//! Packet model

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};

/// One multiplexed message on the tunnel.
///
/// Only `sequence` and `remote_port` are meaningful to the session core; the
/// payload is produced and consumed by the application layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Send-order sequence number; 0 means "not yet assigned"
    pub sequence: u32,

    /// Master-side port this packet belongs to (routing key)
    pub remote_port: u16,

    /// Opaque application payload
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a packet with an unassigned sequence number
    pub fn new(remote_port: u16, payload: Vec<u8>) -> Self {
        Self {
            sequence: 0,
            remote_port,
            payload,
        }
    }
}

/// Per-session send sequence counter.
///
/// Strictly increasing, the first assigned value is 1. Assignment is
/// linearizable across concurrent writers. Behavior at u32 wraparound is
/// unspecified.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Hand out the next sequence value
    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last value handed out (0 if none yet)
    pub fn current(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_sequence_starts_at_one() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.current(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
        assert_eq!(counter.current(), 2);
    }

    #[test]
    fn test_sequence_gapless_from_prior_value() {
        let counter = SequenceCounter::new();
        counter.next();
        counter.next();
        let c = counter.current();

        let assigned: Vec<u32> = (0..5).map(|_| counter.next()).collect();
        let expected: Vec<u32> = (c + 1..=c + 5).collect();
        assert_eq!(assigned, expected);
    }

    #[test]
    fn test_sequence_no_duplicates_concurrent() {
        let counter = Arc::new(SequenceCounter::new());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| counter.next()).collect::<Vec<u32>>()
            }));
        }

        let mut all: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        let before = all.len();
        all.dedup();
        assert_eq!(all.len(), before);
        assert_eq!(all, (1..=800).collect::<Vec<u32>>());
    }
}
