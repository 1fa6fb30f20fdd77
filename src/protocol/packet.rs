//! Packet identifiers and the identifier + payload envelope

use crate::protocol::varint::{put_varint, read_varint, varint_len};
use crate::protocol::ProtocolError;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Known packet identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketId {
    SharedSecret = 0,
    Hello = 1,
    Ready = 2,
    Ping = 3,
    Pong = 4,
    Routes = 5,
    BinaryData = 6,
    BinaryEnd = 7,
    PlayerAdd = 8,
    PlayerRemove = 9,
    DisconnectPlayer = 10,
}

impl PacketId {
    pub fn from_u32(value: u32) -> Option<Self> {
        let id = match value {
            0 => PacketId::SharedSecret,
            1 => PacketId::Hello,
            2 => PacketId::Ready,
            3 => PacketId::Ping,
            4 => PacketId::Pong,
            5 => PacketId::Routes,
            6 => PacketId::BinaryData,
            7 => PacketId::BinaryEnd,
            8 => PacketId::PlayerAdd,
            9 => PacketId::PlayerRemove,
            10 => PacketId::DisconnectPlayer,
            _ => return None,
        };
        Some(id)
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Get packet name for logging
    pub fn name(&self) -> &'static str {
        match self {
            PacketId::SharedSecret => "SharedSecret",
            PacketId::Hello => "Hello",
            PacketId::Ready => "Ready",
            PacketId::Ping => "Ping",
            PacketId::Pong => "Pong",
            PacketId::Routes => "Routes",
            PacketId::BinaryData => "BinaryData",
            PacketId::BinaryEnd => "BinaryEnd",
            PacketId::PlayerAdd => "PlayerAdd",
            PacketId::PlayerRemove => "PlayerRemove",
            PacketId::DisconnectPlayer => "DisconnectPlayer",
        }
    }
}

/// A single protocol packet.
///
/// The identifier is kept as a raw integer so packets from newer nodes
/// survive decoding; [`Packet::kind`] maps it onto [`PacketId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(id: PacketId, payload: impl Into<Bytes>) -> Self {
        Self {
            id: id.as_u32(),
            payload: payload.into(),
        }
    }

    /// Identifier-only packet (Ready, Ping, Pong)
    pub fn empty(id: PacketId) -> Self {
        Self::new(id, Bytes::new())
    }

    /// Serialize `value` as the payload of a new packet
    pub fn encode<T: Serialize>(id: PacketId, value: &T) -> Result<Self, ProtocolError> {
        let payload = postcard::to_allocvec(value)?;
        Ok(Self::new(id, payload))
    }

    /// Deserialize the payload, rejecting truncated input and trailing bytes
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let (value, rest) = postcard::take_from_bytes::<T>(&self.payload)?;
        if !rest.is_empty() {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} trailing bytes after payload",
                rest.len()
            )));
        }
        Ok(value)
    }

    pub fn kind(&self) -> Option<PacketId> {
        PacketId::from_u32(self.id)
    }

    pub fn is(&self, id: PacketId) -> bool {
        self.id == id.as_u32()
    }

    /// Name for logging, falling back to the numeric id
    pub fn type_name(&self) -> String {
        match self.kind() {
            Some(kind) => kind.name().to_string(),
            None => format!("Unknown({})", self.id),
        }
    }

    /// Identifier followed by payload, without any framing
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(varint_len(self.id) + self.payload.len());
        put_varint(&mut buf, self.id);
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(mut body: Bytes) -> Result<Self, ProtocolError> {
        let (id, consumed) = read_varint(&body)?;
        let payload = body.split_off(consumed);
        Ok(Self { id, payload })
    }
}

/// `encode(id, value) -> bytes`
pub fn encode<T: Serialize>(id: PacketId, value: &T) -> Result<Bytes, ProtocolError> {
    Ok(Packet::encode(id, value)?.to_bytes().freeze())
}

/// `decode(bytes) -> (id, value)`
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<(u32, T), ProtocolError> {
    let packet = Packet::from_bytes(Bytes::copy_from_slice(bytes))?;
    let value = packet.decode()?;
    Ok((packet.id, value))
}
