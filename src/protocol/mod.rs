//! Node wire protocol
//!
//! Packets are a variable-length identifier followed by a serialized payload,
//! carried in length-prefixed frames that are encrypted once the handshake
//! has installed a channel cipher.
//!
//! # Identifiers
//! - `0` SharedSecret, `1` Hello, `2` Ready, `3` Ping, `4` Pong
//! - `5` Routes, `6` BinaryData, `7` BinaryEnd
//! - `8` PlayerAdd, `9` PlayerRemove, `10` DisconnectPlayer

pub mod codec;
pub mod messages;
pub mod packet;
pub mod varint;

use crate::crypto::KeyError;
use thiserror::Error;

pub use codec::{PacketCodec, MAX_FRAME_SIZE};
pub use messages::{BinaryData, BinaryEnd, DisconnectPlayer, Hello, NodeMessage, Route, Routes};
pub use packet::{decode, encode, Packet, PacketId};

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
    #[error("Frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("Cipher error: {0}")]
    Cipher(#[from] KeyError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for ProtocolError {
    fn from(e: postcard::Error) -> Self {
        ProtocolError::MalformedPacket(e.to_string())
    }
}
