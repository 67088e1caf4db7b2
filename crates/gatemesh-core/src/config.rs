//! Node configuration.
//!
//! All tunables recognized by the protocol engine live here. The defaults
//! match the values the in-process simulation runs with; a deployment
//! adjusts them per device.

use serde::{Deserialize, Serialize};

/// Configuration for a single mesh node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Seconds between HELLO sweeps (also the neighbor-expiry scan period)
    pub hello_interval_s: u64,
    /// Drop a neighbor that has not sent a HELLO for this many seconds
    pub neighbor_expiry_s: u64,
    /// Size of the known-node population (ids 1..=known_nodes_count)
    pub known_nodes_count: u16,
    /// Capacity of the accepted-client connection ring
    pub max_connections: usize,
    /// Worker threads per node
    pub max_threads: usize,
    /// Worker FIFO capacity
    pub queue_size: usize,
    /// Discard discovered routes slower than this (microseconds)
    pub max_route_time_us: u64,
    /// Cap on the latency-normalizing pre-gateway sleep (microseconds)
    pub max_wait_us: u64,
    /// Node `id` listens for clients on `device_port_start + id`
    pub device_port_start: u16,
    /// Port the client listens on for RESPONSE/FAILURE packets
    pub client_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            hello_interval_s: 3,
            neighbor_expiry_s: 9, // 3x the HELLO interval
            known_nodes_count: 8,
            max_connections: 8,
            max_threads: 8,
            queue_size: 8,
            max_route_time_us: 10_000_000,
            max_wait_us: 1_000_000,
            device_port_start: 8086,
            client_port: 8085,
        }
    }
}

impl NodeConfig {
    pub fn with_known_nodes(mut self, count: u16) -> Self {
        self.known_nodes_count = count;
        self
    }

    pub fn with_hello_interval(mut self, secs: u64) -> Self {
        self.hello_interval_s = secs;
        self.neighbor_expiry_s = secs * 3;
        self
    }

    pub fn with_neighbor_expiry(mut self, secs: u64) -> Self {
        self.neighbor_expiry_s = secs;
        self
    }

    pub fn with_ports(mut self, device_port_start: u16, client_port: u16) -> Self {
        self.device_port_start = device_port_start;
        self.client_port = client_port;
        self
    }

    /// TCP port node `id` accepts client connections on
    pub fn device_port(&self, id: crate::packet::NodeId) -> u16 {
        self.device_port_start + id.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::NodeId;

    #[test]
    fn test_defaults() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.neighbor_expiry_s, 3 * cfg.hello_interval_s);
        assert_eq!(cfg.max_threads, 8);
    }

    #[test]
    fn test_device_port() {
        let cfg = NodeConfig::default().with_ports(9000, 9500);
        assert_eq!(cfg.device_port(NodeId::new(3)), 9003);
    }

    #[test]
    fn test_hello_interval_scales_expiry() {
        let cfg = NodeConfig::default().with_hello_interval(5);
        assert_eq!(cfg.neighbor_expiry_s, 15);
    }
}
