//! Length-prefixed packet framing with optional encryption
//!
//! Frame layout: `varint(len) || body`. The body is the packet's identifier
//! and payload, sealed by the channel cipher once encryption is enabled.

use crate::crypto::ChannelCipher;
use crate::protocol::packet::Packet;
use crate::protocol::varint::{peek_varint, put_varint, varint_len};
use crate::protocol::ProtocolError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame body accepted from a peer
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Packet codec for `Framed` streams
pub struct PacketCodec {
    cipher: Option<ChannelCipher>,
    max_frame_size: usize,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self {
            cipher: None,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            cipher: None,
            max_frame_size,
        }
    }

    /// Seal and open every subsequent frame with `cipher`
    pub fn enable_encryption(&mut self, cipher: ChannelCipher) {
        self.cipher = Some(cipher);
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let plain = item.to_bytes();
        let body = match self.cipher.as_mut() {
            Some(cipher) => Bytes::from(cipher.seal(&plain)?),
            None => plain.freeze(),
        };

        if body.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                limit: self.max_frame_size,
            });
        }

        dst.reserve(varint_len(body.len() as u32) + body.len());
        put_varint(dst, body.len() as u32);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let (len, header) = match peek_varint(src)? {
            Some(prefix) => prefix,
            None => return Ok(None),
        };
        let len = len as usize;

        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                limit: self.max_frame_size,
            });
        }

        if src.len() < header + len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }

        src.advance(header);
        let body = src.split_to(len).freeze();

        let body = match self.cipher.as_mut() {
            Some(cipher) => Bytes::from(cipher.open(&body)?),
            None => body,
        };

        Packet::from_bytes(body).map(Some)
    }
}
