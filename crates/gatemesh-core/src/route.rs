//! Source routes and route-discovery state.
//!
//! A [`PacketRoute`] is the ordered list of node ids a DATA packet travels
//! along, with a cursor marking how far it has come. A [`Route`] is a
//! recorded path from a discovery origin to a gateway-capable node, with
//! the measured round-trip cost of the discovery flood along that path.

use crate::packet::NodeId;
use std::sync::OnceLock;
use std::time::Instant;

/// Microseconds on a process-local monotonic clock
pub fn monotonic_micros() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// The source route carried inside a DATA packet.
///
/// Invariants: `path[0]` is the origin, `path[len - 1]` the terminal hop,
/// `0 <= step < len`, and the path is simple (no duplicate ids).
#[derive(Debug, Clone, Default)]
pub struct PacketRoute {
    pub path: Vec<NodeId>,
    pub step: usize,
    /// Whether the latency-normalizing sleep has already been paid
    pub has_slept: bool,
}

impl PacketRoute {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A route containing only the origin node, cursor at the start
    pub fn single(origin: NodeId) -> Self {
        Self {
            path: vec![origin],
            step: 0,
            has_slept: false,
        }
    }

    /// Turn a discovered route into a walkable packet route
    pub fn from_route(route: &Route) -> Self {
        Self {
            path: route.path.clone(),
            step: 0,
            has_slept: false,
        }
    }

    pub fn len(&self) -> usize {
        self.path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// The node the cursor currently points at
    pub fn current_hop(&self) -> NodeId {
        self.path[self.step]
    }

    /// The last id in the route: the node that must deliver or fall back
    pub fn final_hop(&self) -> NodeId {
        self.path[self.path.len() - 1]
    }

    /// Reversal of the prefix actually walked (`path[0..=step]`), cursor
    /// reset to the start. Used for failure propagation.
    pub fn reverse_walked(&self) -> PacketRoute {
        let mut path: Vec<NodeId> = self.path[..=self.step].to_vec();
        path.reverse();
        PacketRoute {
            path,
            step: 0,
            has_slept: false,
        }
    }

    /// Splice a new suffix onto the walked prefix: `path[0..step]` followed
    /// by the whole of `suffix`. The suffix's first hop must be the node
    /// currently holding the packet, so the cursor position is preserved.
    pub fn combine(prefix: &PacketRoute, suffix: &PacketRoute) -> PacketRoute {
        let mut path = Vec::with_capacity(prefix.step + suffix.path.len());
        path.extend_from_slice(&prefix.path[..prefix.step]);
        path.extend_from_slice(&suffix.path);
        PacketRoute {
            path,
            step: prefix.step,
            has_slept: prefix.has_slept || suffix.has_slept,
        }
    }
}

/// A recorded path from `source_id` to a gateway-capable `destination_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub source_id: NodeId,
    pub destination_id: NodeId,
    pub path: Vec<NodeId>,
    /// Measured microseconds of the discovery flood along this path. A copy
    /// handed out by the routing table carries the normalized sleep instead.
    pub time_taken_us: u64,
}

impl Route {
    pub fn new(source_id: NodeId, destination_id: NodeId, path: Vec<NodeId>, time_taken_us: u64) -> Self {
        Self {
            source_id,
            destination_id,
            path,
            time_taken_us,
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.path.contains(&id)
    }
}

/// State carried by a ROUTING packet during the depth-first discovery flood
#[derive(Debug, Clone)]
pub struct RoutingContext {
    /// The node that initiated the discovery
    pub source_id: NodeId,
    /// Size of the known population; bounds the flood depth
    pub total_nodes: u16,
    /// Nodes already visited by this branch, slot-indexed by `id - 1`
    pub visited: Vec<bool>,
    /// The path this branch has walked so far
    pub path: Vec<NodeId>,
    /// Monotonic microseconds at flood start
    pub t0_us: u64,
}

impl RoutingContext {
    /// Fresh context for a flood starting at `source_id`
    pub fn start(source_id: NodeId, total_nodes: u16) -> Self {
        Self {
            source_id,
            total_nodes,
            visited: vec![false; total_nodes as usize],
            path: Vec::with_capacity(total_nodes as usize),
            t0_us: monotonic_micros(),
        }
    }

    /// Microseconds elapsed since the flood started
    pub fn elapsed_us(&self) -> u64 {
        monotonic_micros().saturating_sub(self.t0_us)
    }
}

/// A discovered route walking back along its path toward the origin
#[derive(Debug, Clone)]
pub struct RoutePayload {
    pub route: Route,
    /// How many hops back from the gateway the packet has come
    pub step_from_destination: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[u16]) -> Vec<NodeId> {
        raw.iter().copied().map(NodeId::new).collect()
    }

    #[test]
    fn test_single() {
        let route = PacketRoute::single(NodeId::new(4));
        assert_eq!(route.len(), 1);
        assert_eq!(route.final_hop(), NodeId::new(4));
        assert_eq!(route.current_hop(), NodeId::new(4));
    }

    #[test]
    fn test_reverse_walked_full() {
        let route = PacketRoute {
            path: ids(&[1, 4, 7, 5]),
            step: 3,
            has_slept: true,
        };
        let reversed = route.reverse_walked();
        assert_eq!(reversed.path, ids(&[5, 7, 4, 1]));
        assert_eq!(reversed.step, 0);
        assert_eq!(reversed.final_hop(), NodeId::new(1));
    }

    #[test]
    fn test_reverse_walked_partial() {
        // failed two hops in: only the walked prefix is reversed
        let route = PacketRoute {
            path: ids(&[1, 2, 3, 4]),
            step: 1,
            has_slept: false,
        };
        let reversed = route.reverse_walked();
        assert_eq!(reversed.path, ids(&[2, 1]));
    }

    #[test]
    fn test_reverse_walked_at_origin() {
        let route = PacketRoute::single(NodeId::new(9));
        assert_eq!(route.reverse_walked().len(), 1);
    }

    #[test]
    fn test_combine_preserves_step() {
        let prefix = PacketRoute {
            path: ids(&[1, 2, 3]),
            step: 2,
            has_slept: true,
        };
        let suffix = PacketRoute {
            path: ids(&[3, 5, 6]),
            step: 0,
            has_slept: false,
        };
        let combined = PacketRoute::combine(&prefix, &suffix);
        assert_eq!(combined.path, ids(&[1, 2, 3, 5, 6]));
        assert_eq!(combined.step, 2);
        assert_eq!(combined.current_hop(), NodeId::new(3));
        assert!(combined.has_slept);
    }

    #[test]
    fn test_combine_at_origin() {
        let prefix = PacketRoute::single(NodeId::new(1));
        let suffix = PacketRoute {
            path: ids(&[1, 2, 3]),
            step: 0,
            has_slept: false,
        };
        let combined = PacketRoute::combine(&prefix, &suffix);
        assert_eq!(combined.path, ids(&[1, 2, 3]));
        assert_eq!(combined.step, 0);
    }

    #[test]
    fn test_routing_context_start() {
        let context = RoutingContext::start(NodeId::new(2), 8);
        assert_eq!(context.visited.len(), 8);
        assert!(context.path.is_empty());
        assert!(!context.visited.iter().any(|&v| v));
    }

    #[test]
    fn test_monotonic_micros_advances() {
        let a = monotonic_micros();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = monotonic_micros();
        assert!(b > a);
    }
}
