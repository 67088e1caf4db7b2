//! Packet types and wire framing.
//!
//! Two packet layers exist. The *external* packet is the wire-facing
//! structure exchanged with clients and, in payload form, with hosts on the
//! external network. The *internal* packet travels between mesh nodes over
//! the link layer and carries either an external packet (DATA), a liveness
//! beacon (HELLO), or route-discovery state (ROUTING / ROUTING_DONE).
//!
//! ## External packet wire layout (big endian)
//!
//! ```text
//! ┌──────────┬──────┬────────┬─────────────┬───────────┬──────────┬─────────────┬─────────┐
//! │ checksum │ kind │ seq_nr │ source_ipv4 │ dest_ipv4 │ dest_port│ payload_len │ payload │
//! │   (4B)   │ (1B) │  (2B)  │    (16B)    │   (16B)   │   (2B)   │    (2B)     │ (0-64K) │
//! └──────────┴──────┴────────┴─────────────┴───────────┴──────────┴─────────────┴─────────┘
//! ```
//!
//! The checksum is the additive complement of every byte after the checksum
//! field, computed over the packed byte image above.

use crate::error::{MeshError, Result};
use crate::route::{PacketRoute, RoutePayload, RoutingContext};
use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

/// Node identifier. Ids `1..=N` are the known population; 0 means "none".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u16);

impl NodeId {
    /// The "none / inactive" id
    pub const NONE: NodeId = NodeId(0);

    pub fn new(raw: u16) -> Self {
        NodeId(raw)
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Slot index for tables indexed by `id - 1`
    pub fn index(self) -> usize {
        debug_assert!(self.0 != 0, "NodeId::NONE has no slot");
        self.0 as usize - 1
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExternalKind {
    /// Client request bound for the external network
    Http = 0,
    /// A chunk of the external host's answer, streamed back to the client
    Response = 1,
    /// The mesh could not deliver the request
    Failure = 2,
}

impl ExternalKind {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(ExternalKind::Http),
            1 => Ok(ExternalKind::Response),
            2 => Ok(ExternalKind::Failure),
            other => Err(MeshError::UnknownPacketKind(other)),
        }
    }
}

/// Length of the fixed header that precedes the payload
pub const EXTERNAL_HEADER_LEN: usize = 4 + 1 + 2 + 16 + 16 + 2 + 2;

/// Additive-complement checksum over every byte after the checksum field
pub fn checksum(packed: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for &b in &packed[4..] {
        sum = sum.wrapping_add(b as u32);
    }
    !sum
}

/// Pack a dotted-quad address string into the fixed 16-byte field
pub fn pack_ipv4(addr: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    let bytes = addr.as_bytes();
    let n = bytes.len().min(16);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// Recover the address string from a NUL-padded 16-byte field
pub fn ipv4_text(field: &[u8; 16]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(16);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

/// The wire-facing packet exchanged with clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalPacket {
    pub checksum: u32,
    pub kind: ExternalKind,
    pub seq_nr: u16,
    pub source_ipv4: [u8; 16],
    pub dest_ipv4: [u8; 16],
    pub dest_port: u16,
    pub payload: Vec<u8>,
}

impl ExternalPacket {
    /// Build a client request packet, checksum already sealed
    pub fn http(source_ipv4: &str, dest_ipv4: &str, dest_port: u16, payload: &[u8]) -> Self {
        let mut packet = Self {
            checksum: 0,
            kind: ExternalKind::Http,
            seq_nr: 0,
            source_ipv4: pack_ipv4(source_ipv4),
            dest_ipv4: pack_ipv4(dest_ipv4),
            dest_port,
            payload: payload.to_vec(),
        };
        packet.seal();
        packet
    }

    /// Build one response chunk for `request`, addressed back at its source
    pub fn response_to(request: &ExternalPacket, chunk: &[u8], seq_nr: u16, client_port: u16) -> Self {
        let mut packet = Self {
            checksum: 0,
            kind: ExternalKind::Response,
            seq_nr,
            source_ipv4: request.dest_ipv4,
            dest_ipv4: request.source_ipv4,
            dest_port: client_port,
            payload: chunk.to_vec(),
        };
        packet.seal();
        packet
    }

    /// Build the failure notification for a request that could not be routed
    pub fn failure_for(request: &ExternalPacket, client_port: u16) -> Self {
        let mut packet = Self {
            checksum: 0,
            kind: ExternalKind::Failure,
            seq_nr: 0,
            source_ipv4: request.dest_ipv4,
            dest_ipv4: request.source_ipv4,
            dest_port: client_port,
            payload: Vec::new(),
        };
        packet.seal();
        packet
    }

    pub fn encoded_len(&self) -> usize {
        EXTERNAL_HEADER_LEN + self.payload.len()
    }

    /// Serialize to the packed wire image
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.push(self.kind as u8);
        out.extend_from_slice(&self.seq_nr.to_be_bytes());
        out.extend_from_slice(&self.source_ipv4);
        out.extend_from_slice(&self.dest_ipv4);
        out.extend_from_slice(&self.dest_port.to_be_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Recompute and store the checksum for the current contents
    pub fn seal(&mut self) {
        self.checksum = 0;
        let packed = self.encode();
        self.checksum = checksum(&packed);
    }

    /// True iff the stored checksum matches the packed byte image
    pub fn verify_checksum(&self) -> bool {
        self.checksum == checksum(&self.encode())
    }

    /// Parse a packet from a complete wire image
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < EXTERNAL_HEADER_LEN {
            return Err(MeshError::TruncatedPacket(format!(
                "{} bytes, header needs {}",
                bytes.len(),
                EXTERNAL_HEADER_LEN
            )));
        }
        let mut cursor = &bytes[..];
        let checksum = cursor.read_u32::<BigEndian>()?;
        let kind = ExternalKind::from_byte(cursor.read_u8()?)?;
        let seq_nr = cursor.read_u16::<BigEndian>()?;
        let mut source_ipv4 = [0u8; 16];
        cursor.read_exact(&mut source_ipv4)?;
        let mut dest_ipv4 = [0u8; 16];
        cursor.read_exact(&mut dest_ipv4)?;
        let dest_port = cursor.read_u16::<BigEndian>()?;
        let payload_len = cursor.read_u16::<BigEndian>()? as usize;
        if cursor.len() < payload_len {
            return Err(MeshError::TruncatedPacket(format!(
                "payload declares {} bytes, {} available",
                payload_len,
                cursor.len()
            )));
        }
        Ok(Self {
            checksum,
            kind,
            seq_nr,
            source_ipv4,
            dest_ipv4,
            dest_port,
            payload: cursor[..payload_len].to_vec(),
        })
    }

    /// Read exactly one packet from a stream
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; EXTERNAL_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let payload_len =
            u16::from_be_bytes([header[EXTERNAL_HEADER_LEN - 2], header[EXTERNAL_HEADER_LEN - 1]])
                as usize;
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;
        let mut bytes = header.to_vec();
        bytes.extend_from_slice(&payload);
        Self::decode(&bytes)
    }

    /// Write the packed wire image to a stream
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode())?;
        Ok(())
    }

    pub fn source_text(&self) -> String {
        ipv4_text(&self.source_ipv4)
    }

    pub fn dest_text(&self) -> String {
        ipv4_text(&self.dest_ipv4)
    }
}

/// Body of an internal packet, one arm per internal packet type
#[derive(Debug, Clone)]
pub enum InternalBody {
    /// An external packet in transit through the mesh
    Data(ExternalPacket),
    /// Neighbor liveness beacon
    Hello,
    /// Advisory purge (logged only)
    Purge,
    /// Route-discovery flood state
    Routing(RoutingContext),
    /// A discovered route walking back toward the discovery origin
    RoutingDone(RoutePayload),
}

impl InternalBody {
    /// Short tag for log lines
    pub fn kind_str(&self) -> &'static str {
        match self {
            InternalBody::Data(_) => "DATA",
            InternalBody::Hello => "HELLO",
            InternalBody::Purge => "PURGE",
            InternalBody::Routing(_) => "ROUTING",
            InternalBody::RoutingDone(_) => "ROUTING_DONE",
        }
    }
}

/// Packet exchanged between mesh nodes over the link layer
#[derive(Debug, Clone)]
pub struct InternalPacket {
    /// The node the packet was last sent by
    pub prev_node_id: NodeId,
    /// Final mesh destination, if one is known (ROUTING_DONE); else NONE
    pub dest_node_id: NodeId,
    /// Source route the packet travels along (empty for HELLO/PURGE/ROUTING)
    pub route: PacketRoute,
    /// DATA only: carries gateway output back toward the origin
    pub is_response: bool,
    pub body: InternalBody,
}

impl InternalPacket {
    /// Wrap an external packet for forwarding along `route`
    pub fn data(from: NodeId, external: ExternalPacket, route: PacketRoute) -> Self {
        Self {
            prev_node_id: from,
            dest_node_id: NodeId::NONE,
            route,
            is_response: false,
            body: InternalBody::Data(external),
        }
    }

    pub fn hello(from: NodeId, to: NodeId) -> Self {
        Self {
            prev_node_id: from,
            dest_node_id: to,
            route: PacketRoute::empty(),
            is_response: false,
            body: InternalBody::Hello,
        }
    }

    pub fn purge(from: NodeId, to: NodeId) -> Self {
        Self {
            prev_node_id: from,
            dest_node_id: to,
            route: PacketRoute::empty(),
            is_response: false,
            body: InternalBody::Purge,
        }
    }

    pub fn routing(from: NodeId, to: NodeId, context: RoutingContext) -> Self {
        Self {
            prev_node_id: from,
            dest_node_id: to,
            route: PacketRoute::empty(),
            is_response: false,
            body: InternalBody::Routing(context),
        }
    }

    pub fn routing_done(from: NodeId, origin: NodeId, payload: RoutePayload) -> Self {
        Self {
            prev_node_id: from,
            dest_node_id: origin,
            route: PacketRoute::empty(),
            is_response: false,
            body: InternalBody::RoutingDone(payload),
        }
    }

    /// Payload size in bytes as it would occupy the wire
    pub fn payload_len(&self) -> usize {
        match &self.body {
            InternalBody::Data(external) => external.encoded_len(),
            InternalBody::Hello | InternalBody::Purge => 0,
            InternalBody::Routing(context) => context.path.len() * 2 + context.visited.len(),
            InternalBody::RoutingDone(payload) => payload.route.path.len() * 2,
        }
    }
}
