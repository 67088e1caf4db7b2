//! Neighbor table: slot-indexed liveness tracking fed by HELLO packets.
//!
//! A fixed-size array indexed by `id - 1` where each slot is either empty
//! or holds the neighbor's last-seen timestamp. All mutation happens under
//! the node's neighbor lock; this module only implements the table itself.

use crate::packet::NodeId;
use std::time::{Duration, Instant};

/// A directly reachable node, as last witnessed by a HELLO
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    pub node_id: NodeId,
    pub last_seen: Instant,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    /// Neighbors removed because their last HELLO is older than the expiry
    pub removed: Vec<NodeId>,
    /// Occupied slots before the sweep
    pub pre_count: usize,
    /// Neighbors first seen since the previous sweep
    pub new_count: usize,
}

impl SweepReport {
    /// Fraction of the pre-sweep population that was removed
    pub fn removed_frac(&self) -> f64 {
        if self.pre_count == 0 {
            0.0
        } else {
            self.removed.len() as f64 / self.pre_count as f64
        }
    }

    /// Fraction of the pre-sweep population that is newly arrived
    pub fn new_frac(&self) -> f64 {
        if self.pre_count == 0 {
            0.0
        } else {
            self.new_count as f64 / self.pre_count as f64
        }
    }
}

/// Fixed-size neighbor table, slot-indexed by node id
#[derive(Debug)]
pub struct NeighborTable {
    slots: Vec<Option<NeighborEntry>>,
    new_neighbors: usize,
}

impl NeighborTable {
    pub fn new(known_nodes_count: u16) -> Self {
        Self {
            slots: vec![None; known_nodes_count as usize],
            new_neighbors: 0,
        }
    }

    /// Record a HELLO from `id`. Returns true iff the neighbor is new.
    pub fn mark_seen(&mut self, id: NodeId) -> bool {
        let slot = &mut self.slots[id.index()];
        match slot {
            Some(entry) => {
                entry.last_seen = Instant::now();
                false
            }
            None => {
                *slot = Some(NeighborEntry {
                    node_id: id,
                    last_seen: Instant::now(),
                });
                self.new_neighbors += 1;
                true
            }
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.slots[id.index()].is_some()
    }

    /// Ids of all current neighbors
    pub fn ids(&self) -> Vec<NodeId> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| entry.node_id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_none())
    }

    /// Remove every neighbor not seen within `expiry` and report the churn.
    /// Resets the new-neighbor counter for the next interval.
    pub fn sweep(&mut self, expiry: Duration) -> SweepReport {
        let now = Instant::now();
        let pre_count = self.len();
        let mut removed = Vec::new();
        for slot in &mut self.slots {
            if let Some(entry) = slot {
                if now.duration_since(entry.last_seen) > expiry {
                    removed.push(entry.node_id);
                    *slot = None;
                }
            }
        }
        let new_count = self.new_neighbors;
        self.new_neighbors = 0;
        SweepReport {
            removed,
            pre_count,
            new_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_seen_new_and_refresh() {
        let mut table = NeighborTable::new(4);
        assert!(table.mark_seen(NodeId::new(2)));
        assert!(!table.mark_seen(NodeId::new(2)));
        assert!(table.contains(NodeId::new(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_sweep_removes_stale() {
        let mut table = NeighborTable::new(4);
        table.mark_seen(NodeId::new(1));
        table.mark_seen(NodeId::new(3));

        // nothing is stale against a generous expiry
        let report = table.sweep(Duration::from_secs(60));
        assert!(report.removed.is_empty());
        assert_eq!(report.pre_count, 2);
        assert_eq!(report.new_count, 2);

        // a zero expiry removes everything
        std::thread::sleep(Duration::from_millis(2));
        let report = table.sweep(Duration::from_millis(1));
        assert_eq!(report.removed.len(), 2);
        assert!(table.is_empty());
        // counter was reset by the first sweep
        assert_eq!(report.new_count, 0);
    }

    #[test]
    fn test_churn_fractions() {
        let report = SweepReport {
            removed: vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)],
            pre_count: 4,
            new_count: 1,
        };
        assert!(report.removed_frac() > 0.7);
        assert!(report.new_frac() < 0.5);

        let empty = SweepReport::default();
        assert_eq!(empty.removed_frac(), 0.0);
        assert_eq!(empty.new_frac(), 0.0);
    }

    #[test]
    fn test_ids() {
        let mut table = NeighborTable::new(8);
        table.mark_seen(NodeId::new(5));
        table.mark_seen(NodeId::new(2));
        let ids = table.ids();
        assert_eq!(ids, vec![NodeId::new(2), NodeId::new(5)]);
    }
}
