//! In-process mesh simulation.
//!
//! Models the radio side of the mesh without hardware: nodes sit on a 2-D
//! plane, a packet makes it across a link iff sender and receiver are
//! within radio range, and a node is gateway-capable iff it is within range
//! of the external uplink coordinate. Per-node packet queues stand in for
//! the air interface.
//!
//! [`MeshSim`] builds a whole mesh over one shared [`SimTransport`] and
//! runs every node on its own worker, which is what the CLI `sim` command
//! and the end-to-end tests drive.

use crate::config::NodeConfig;
use crate::error::{MeshError, Result};
use crate::link::LinkLayer;
use crate::node::Node;
use crate::packet::{InternalPacket, NodeId};
use crate::pool::WorkerPool;
use crate::{lock_ok, wait_ok};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Position on the simulation plane (abstract units)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another coordinate
    pub fn distance_to(&self, other: &Coord) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Simulation topology configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of nodes (ids 1..=node_count)
    pub node_count: u16,
    /// Radio range: links longer than this drop packets
    pub range: f64,
    /// Node positions, indexed by `id - 1`
    pub positions: Vec<Coord>,
    /// Where the external network can be reached from
    pub uplink: Coord,
    /// A node is gateway-capable iff it sits within this distance of the
    /// uplink. Independent of the radio range so a dense mesh can still
    /// have a single gateway.
    pub uplink_range: f64,
}

impl SimConfig {
    /// Nodes on a straight line, `spacing` apart, uplink at the far end
    /// so only the last node starts out gateway-capable.
    pub fn line(node_count: u16, spacing: f64, range: f64) -> Self {
        let positions: Vec<Coord> = (0..node_count)
            .map(|i| Coord::new(i as f64 * spacing, 0.0))
            .collect();
        let uplink = positions
            .last()
            .copied()
            .unwrap_or(Coord::new(0.0, 0.0));
        Self {
            node_count,
            range,
            positions,
            uplink,
            uplink_range: spacing / 2.0,
        }
    }

    /// Nodes scattered over a rectangle with a reproducible seed
    pub fn scattered(node_count: u16, width: f64, height: f64, range: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let positions: Vec<Coord> = (0..node_count)
            .map(|_| Coord::new(rng.gen_range(0.0..width), rng.gen_range(0.0..height)))
            .collect();
        Self {
            node_count,
            range,
            positions,
            uplink: Coord::new(width / 2.0, height / 2.0),
            uplink_range: range,
        }
    }

    pub fn with_uplink(mut self, x: f64, y: f64) -> Self {
        self.uplink = Coord::new(x, y);
        self
    }

    pub fn with_position(mut self, id: u16, x: f64, y: f64) -> Self {
        self.positions[(id - 1) as usize] = Coord::new(x, y);
        self
    }
}

struct EndpointState {
    queue: VecDeque<InternalPacket>,
    open: bool,
}

/// One node's receive side of the simulated air interface
struct Endpoint {
    state: Mutex<EndpointState>,
    cond: Condvar,
}

impl Endpoint {
    fn new() -> Self {
        Self {
            state: Mutex::new(EndpointState {
                queue: VecDeque::new(),
                open: true,
            }),
            cond: Condvar::new(),
        }
    }
}

struct Topology {
    positions: Vec<Coord>,
    alive: Vec<bool>,
    uplink: Coord,
}

/// The in-process link layer: geometric reachability over shared queues
pub struct SimTransport {
    range: f64,
    uplink_range: f64,
    topology: Mutex<Topology>,
    endpoints: Vec<Endpoint>,
}

impl SimTransport {
    pub fn new(config: &SimConfig) -> Arc<Self> {
        debug_assert_eq!(config.positions.len(), config.node_count as usize);
        let endpoints = (0..config.node_count).map(|_| Endpoint::new()).collect();
        Arc::new(Self {
            range: config.range,
            uplink_range: config.uplink_range,
            topology: Mutex::new(Topology {
                positions: config.positions.clone(),
                alive: vec![true; config.node_count as usize],
                uplink: config.uplink,
            }),
            endpoints,
        })
    }

    fn endpoint(&self, node: NodeId) -> &Endpoint {
        &self.endpoints[node.index()]
    }

    /// True iff a packet from `a` currently reaches `b`
    pub fn in_range(&self, a: NodeId, b: NodeId) -> bool {
        let topology = lock_ok(&self.topology);
        topology.alive[a.index()]
            && topology.alive[b.index()]
            && topology.positions[a.index()].distance_to(&topology.positions[b.index()])
                <= self.range
    }

    /// Move a node on the plane
    pub fn set_position(&self, node: NodeId, x: f64, y: f64) {
        lock_ok(&self.topology).positions[node.index()] = Coord::new(x, y);
    }

    /// Move the external uplink
    pub fn set_uplink(&self, x: f64, y: f64) {
        lock_ok(&self.topology).uplink = Coord::new(x, y);
    }

    /// Take a node off the air entirely (links and uplink both die)
    pub fn kill(&self, node: NodeId) {
        lock_ok(&self.topology).alive[node.index()] = false;
        self.disconnect(node);
    }

    /// Non-blocking receive, for tests that inspect queued traffic
    pub fn try_recv(&self, node: NodeId) -> Option<InternalPacket> {
        lock_ok(&self.endpoint(node).state).queue.pop_front()
    }
}

impl LinkLayer for SimTransport {
    fn send(&self, packet: &InternalPacket, dest: NodeId) -> Result<usize> {
        let sender = packet.prev_node_id;
        if sender.is_none() || !self.in_range(sender, dest) {
            return Err(MeshError::LinkDown(dest));
        }
        let endpoint = self.endpoint(dest);
        let mut state = lock_ok(&endpoint.state);
        if !state.open {
            return Err(MeshError::LinkDown(dest));
        }
        state.queue.push_back(packet.clone());
        drop(state);
        endpoint.cond.notify_one();
        Ok(packet.payload_len())
    }

    fn recv(&self, node: NodeId) -> Option<InternalPacket> {
        let endpoint = self.endpoint(node);
        let mut state = lock_ok(&endpoint.state);
        while state.queue.is_empty() && state.open {
            state = wait_ok(&endpoint.cond, state);
        }
        state.queue.pop_front()
    }

    fn can_connect(&self, node: NodeId) -> bool {
        let topology = lock_ok(&self.topology);
        topology.alive[node.index()]
            && topology.positions[node.index()].distance_to(&topology.uplink) <= self.uplink_range
    }

    fn known_nodes(&self, _node: NodeId) -> Vec<NodeId> {
        (1..=self.endpoints.len() as u16).map(NodeId::new).collect()
    }

    fn disconnect(&self, node: NodeId) {
        let endpoint = self.endpoint(node);
        lock_ok(&endpoint.state).open = false;
        endpoint.cond.notify_all();
    }
}

/// A whole mesh running in one process: N nodes over one shared transport,
/// each driven by its own worker.
pub struct MeshSim {
    transport: Arc<SimTransport>,
    nodes: Vec<Arc<Node>>,
    pool: WorkerPool,
}

impl MeshSim {
    /// Build and start every node. Returns once all nodes are running.
    pub fn start(sim_config: SimConfig, node_config: NodeConfig) -> Result<Self> {
        let node_config = node_config.with_known_nodes(sim_config.node_count);
        let transport = SimTransport::new(&sim_config);

        let mut nodes = Vec::with_capacity(sim_config.node_count as usize);
        for raw in 1..=sim_config.node_count {
            nodes.push(Node::init(
                NodeId::new(raw),
                node_config.clone(),
                transport.clone(),
            )?);
        }

        let pool = WorkerPool::new(nodes.len(), nodes.len().max(1));
        pool.start();
        for node in &nodes {
            let node = Arc::clone(node);
            pool.submit(move || {
                let _ = node.run();
            })?;
        }

        // wait for every node to flip its running flag, so a `shutdown`
        // right after this call cannot race a node that has not started yet
        let deadline = Instant::now() + Duration::from_secs(5);
        while nodes.iter().any(|n| !n.is_running()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        Ok(Self {
            transport,
            nodes,
            pool,
        })
    }

    pub fn node(&self, id: NodeId) -> &Arc<Node> {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn transport(&self) -> &Arc<SimTransport> {
        &self.transport
    }

    /// Node death: off the air and shut down
    pub fn kill_node(&self, id: NodeId) {
        self.transport.kill(id);
        self.node(id).close();
    }

    /// Close every node and join all the workers
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.close();
        }
        self.pool.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coord_distance() {
        let a = Coord::new(0.0, 0.0);
        let b = Coord::new(3.0, 4.0);
        assert!((a.distance_to(&b) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_line_topology() {
        let config = SimConfig::line(3, 100.0, 150.0);
        let transport = SimTransport::new(&config);
        assert!(transport.in_range(NodeId::new(1), NodeId::new(2)));
        assert!(transport.in_range(NodeId::new(2), NodeId::new(3)));
        assert!(!transport.in_range(NodeId::new(1), NodeId::new(3)));
        // uplink defaults to the far end of the line
        assert!(transport.can_connect(NodeId::new(3)));
        assert!(!transport.can_connect(NodeId::new(1)));
    }

    #[test]
    fn test_send_respects_range() {
        let config = SimConfig::line(3, 100.0, 150.0);
        let transport = SimTransport::new(&config);
        let hello = InternalPacket::hello(NodeId::new(1), NodeId::new(3));
        assert!(transport.send(&hello, NodeId::new(3)).is_err());
        assert!(transport.send(&hello, NodeId::new(2)).is_ok());
        assert!(transport.try_recv(NodeId::new(2)).is_some());
    }

    #[test]
    fn test_recv_returns_queued_packets_in_order() {
        let config = SimConfig::line(2, 50.0, 100.0);
        let transport = SimTransport::new(&config);
        let hello = InternalPacket::hello(NodeId::new(1), NodeId::new(2));
        let purge = InternalPacket::purge(NodeId::new(1), NodeId::new(2));
        transport.send(&hello, NodeId::new(2)).unwrap();
        transport.send(&purge, NodeId::new(2)).unwrap();
        let first = transport.recv(NodeId::new(2)).unwrap();
        assert_eq!(first.prev_node_id, NodeId::new(1));
        assert_eq!(first.body.kind_str(), "HELLO");
        let second = transport.recv(NodeId::new(2)).unwrap();
        assert_eq!(second.body.kind_str(), "PURGE");
    }

    #[test]
    fn test_disconnect_unblocks_recv() {
        let config = SimConfig::line(2, 50.0, 100.0);
        let transport = SimTransport::new(&config);
        let waiter = transport.clone();
        let handle = std::thread::spawn(move || waiter.recv(NodeId::new(2)));
        std::thread::sleep(std::time::Duration::from_millis(20));
        transport.disconnect(NodeId::new(2));
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn test_kill_drops_links_and_uplink() {
        let config = SimConfig::line(2, 50.0, 100.0);
        let transport = SimTransport::new(&config);
        assert!(transport.can_connect(NodeId::new(2)));
        transport.kill(NodeId::new(2));
        assert!(!transport.in_range(NodeId::new(1), NodeId::new(2)));
        assert!(!transport.can_connect(NodeId::new(2)));
        let hello = InternalPacket::hello(NodeId::new(1), NodeId::new(2));
        assert!(transport.send(&hello, NodeId::new(2)).is_err());
    }

    #[test]
    fn test_moving_a_node_changes_reachability() {
        let config = SimConfig::line(2, 50.0, 100.0);
        let transport = SimTransport::new(&config);
        assert!(transport.in_range(NodeId::new(1), NodeId::new(2)));
        transport.set_position(NodeId::new(2), 5_000.0, 0.0);
        assert!(!transport.in_range(NodeId::new(1), NodeId::new(2)));
    }
}
