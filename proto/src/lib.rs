//! Pawtrack Shared Wire Types
//!
//! This crate provides the frame type, frame codec, and payload cipher
//! shared by rover and base devices. A position report travels the radio
//! link as `encrypt(encode(frame), key)`; the receiving side reverses the
//! two steps and rejects anything that does not survive both.

pub mod cipher;
pub mod codec;
pub mod frame;

pub use cipher::{decrypt, encrypt, CipherError};
pub use codec::{decode, encode, CodecError, MAX_FRAME_SIZE};
pub use frame::Frame;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current timestamp in seconds since the Unix epoch
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Radio protocol parameters shared by both roles
pub mod protocol {
    /// Longest accepted device identifier
    pub const MAX_DEVICE_ID_LEN: usize = 20;

    /// Wire format magic, first bytes of every plaintext frame
    pub const FRAME_MAGIC: [u8; 2] = *b"PT";

    /// Wire format version
    pub const FRAME_VERSION: u8 = 0x01;
}
