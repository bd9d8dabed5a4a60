//! Backhaul wire protocol
//!
//! This crate defines the packet model and the length-prefixed framing used on
//! the single control connection between a worker and its master.

pub mod frame;
pub mod packet;

pub use frame::{decode, encode, read_frame, write_frame, FrameError};
pub use packet::{Packet, SequenceCounter};

/// Magic bytes prefixing every frame on the wire
pub const FRAME_MAGIC: [u8; 4] = *b"BHL1";

/// Frame header size: magic (4) + body length (4)
pub const HEADER_LEN: usize = FRAME_MAGIC.len() + 4;

/// Maximum frame body size (16MB)
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;
