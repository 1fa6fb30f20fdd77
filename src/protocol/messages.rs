//! Payload types carried by protocol packets
//!
//! Payloads use postcard's serde encoding: varint integers and length
//! prefixes, UTF-8 strings and byte sequences prefixed with their length,
//! sequences prefixed with their element count, struct fields in declaration
//! order. Fixed-width fields opt in through [`fixed_be`].

use crate::protocol::packet::{Packet, PacketId};
use crate::protocol::ProtocolError;
use serde::{Deserialize, Serialize};

/// A proxy domain to backend mapping distributed to nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    /// Stable identifier, unique across the route set
    pub route_id: String,
    /// Public domain the node accepts connections for
    pub proxy_domain: String,
    /// Backend host the node forwards to
    pub server_host: String,
    /// Backend port, fixed-width on the wire
    #[serde(with = "fixed_be")]
    pub server_port: u16,
}

impl Route {
    pub fn new(
        route_id: impl Into<String>,
        proxy_domain: impl Into<String>,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            route_id: route_id.into(),
            proxy_domain: proxy_domain.into(),
            server_host: server_host.into(),
            server_port,
        }
    }
}

/// Big-endian fixed-width integers on the wire, plain numbers in JSON
mod fixed_be {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_u16(*value)
        } else {
            value.to_be_bytes().serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        if deserializer.is_human_readable() {
            u16::deserialize(deserializer)
        } else {
            <[u8; 2]>::deserialize(deserializer).map(u16::from_be_bytes)
        }
    }
}

/// Payload of a Routes packet: the full route set, replace-whole-set semantics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routes {
    pub routes: Vec<Route>,
}

impl Routes {
    pub fn packet(routes: &[Route]) -> Result<Packet, ProtocolError> {
        Packet::encode(
            PacketId::Routes,
            &Routes {
                routes: routes.to_vec(),
            },
        )
    }
}

/// Node identification sent after the handshake.
///
/// Older nodes stop after `version`, so the trailing fields are optional on
/// the wire and an empty value is treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hello {
    pub key: String,
    pub version: String,
    pub passphrase: Option<String>,
    pub arch: Option<String>,
    pub hash: Option<Vec<u8>>,
}

impl Hello {
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn to_packet(&self) -> Result<Packet, ProtocolError> {
        let mut payload = Vec::new();
        payload.extend(postcard::to_allocvec(&self.key)?);
        payload.extend(postcard::to_allocvec(&self.version)?);

        let has_hash = self.hash.as_ref().is_some_and(|h| !h.is_empty());
        let has_arch = has_hash || self.arch.as_ref().is_some_and(|a| !a.is_empty());
        let has_passphrase =
            has_arch || self.passphrase.as_ref().is_some_and(|p| !p.is_empty());

        if has_passphrase {
            let passphrase = self.passphrase.clone().unwrap_or_default();
            payload.extend(postcard::to_allocvec(&passphrase)?);
        }
        if has_arch {
            let arch = self.arch.clone().unwrap_or_default();
            payload.extend(postcard::to_allocvec(&arch)?);
        }
        if has_hash {
            let hash = self.hash.clone().unwrap_or_default();
            payload.extend(postcard::to_allocvec(&hash)?);
        }

        Ok(Packet::new(PacketId::Hello, payload))
    }

    pub fn from_packet(packet: &Packet) -> Result<Self, ProtocolError> {
        let rest: &[u8] = &packet.payload;
        let (key, rest) = postcard::take_from_bytes::<String>(rest)?;
        let (version, rest) = postcard::take_from_bytes::<String>(rest)?;

        let (passphrase, rest) = take_optional::<String>(rest)?;
        let (arch, rest) = take_optional::<String>(rest)?;
        let (hash, rest) = take_optional::<Vec<u8>>(rest)?;

        if !rest.is_empty() {
            return Err(ProtocolError::MalformedPacket(format!(
                "{} trailing bytes after hello",
                rest.len()
            )));
        }

        Ok(Self {
            key,
            version,
            passphrase: passphrase.filter(|p| !p.is_empty()),
            arch: arch.filter(|a| !a.is_empty()),
            hash: hash.filter(|h| !h.is_empty()),
        })
    }
}

fn take_optional<'a, T: serde::de::DeserializeOwned>(
    rest: &'a [u8],
) -> Result<(Option<T>, &'a [u8]), ProtocolError> {
    if rest.is_empty() {
        return Ok((None, rest));
    }
    let (value, rest) = postcard::take_from_bytes::<T>(rest)?;
    Ok((Some(value), rest))
}

/// One chunk of a binary transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryData {
    pub label: String,
    pub data: Vec<u8>,
}

/// Terminates a binary transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryEnd {
    pub label: String,
}

/// Asks a node to drop a player connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPlayer {
    pub player_uuid: String,
    pub proxy_host: String,
}

/// Packets a node sends to the master, decoded once per read
#[derive(Debug, Clone, PartialEq)]
pub enum NodeMessage {
    Hello(Hello),
    Ping,
    /// Anything the master does not act on, kept for forward compatibility
    Unhandled { id: u32 },
}

impl NodeMessage {
    pub fn parse(packet: &Packet) -> Result<Self, ProtocolError> {
        match packet.kind() {
            Some(PacketId::Hello) => Ok(NodeMessage::Hello(Hello::from_packet(packet)?)),
            Some(PacketId::Ping) => Ok(NodeMessage::Ping),
            _ => Ok(NodeMessage::Unhandled { id: packet.id }),
        }
    }
}
