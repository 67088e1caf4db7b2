//! Error types for the mesh runtime.

use crate::packet::NodeId;
use thiserror::Error;

/// Mesh runtime error type
#[derive(Error, Debug)]
pub enum MeshError {
    /// Packet bytes were shorter than the fixed header or declared payload
    #[error("truncated packet: {0}")]
    TruncatedPacket(String),

    /// Unknown external packet type tag on the wire
    #[error("unknown packet kind: {0}")]
    UnknownPacketKind(u8),

    /// The link layer has no path to the destination right now
    #[error("no link to node {0}")]
    LinkDown(NodeId),

    /// Worker pool rejected a task because it is stopped
    #[error("worker pool stopped")]
    PoolStopped,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
