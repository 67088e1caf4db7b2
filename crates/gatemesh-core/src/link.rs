//! The link layer the protocol engine runs on top of.
//!
//! The engine never talks to a radio (or a socket, in simulation) directly;
//! it sees exactly the capabilities below. The in-process simulation
//! transport in [`crate::sim`] implements them over shared queues; a
//! deployment substitutes real radio or UDP plumbing without touching the
//! engine.

use crate::error::Result;
use crate::packet::{InternalPacket, NodeId};

/// Capabilities a transport must supply to every node
pub trait LinkLayer: Send + Sync {
    /// Transmit `packet` toward `dest`. The implementation copies the
    /// packet before returning, so the caller keeps ownership. Returns the
    /// accepted payload length, or [`crate::error::MeshError::LinkDown`]
    /// when there is currently no link from the sender (`packet.prev_node_id`)
    /// to `dest`.
    fn send(&self, packet: &InternalPacket, dest: NodeId) -> Result<usize>;

    /// Produce the next packet addressed to `node`, blocking until one is
    /// available. Returns `None` once the node has been disconnected.
    fn recv(&self, node: NodeId) -> Option<InternalPacket>;

    /// True iff `node` can reach the designated external network right now
    fn can_connect(&self, node: NodeId) -> bool;

    /// The node ids `node` should probe with HELLO
    fn known_nodes(&self, node: NodeId) -> Vec<NodeId>;

    /// Detach `node` from the link: any blocked or future `recv` returns
    /// `None`. Called during node shutdown.
    fn disconnect(&self, node: NodeId);
}
