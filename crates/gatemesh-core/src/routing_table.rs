//! Routing table: discovered routes with latency-normalizing selection.
//!
//! Each entry is a route from this node to a gateway-capable node, tagged
//! with the measured time of the discovery flood along it. `get_random`
//! hands out a copy whose `time_taken_us` is rewritten into the sleep that
//! makes every route behave like the slowest observed one, capped at
//! `max_wait_us`.

use crate::packet::NodeId;
use crate::route::Route;
use rand::Rng;

/// Ordered collection of discovered routes
#[derive(Debug)]
pub struct RoutingTable {
    entries: Vec<Route>,
    max_wait_us: u64,
}

impl RoutingTable {
    pub fn new(max_wait_us: u64) -> Self {
        Self {
            entries: Vec::new(),
            max_wait_us,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Append a discovered route, taking ownership of it
    pub fn append(&mut self, route: Route) {
        self.entries.push(route);
    }

    /// Largest measured flood time across entries, capped at `max_wait_us`
    pub fn longest_time_used(&self) -> u64 {
        self.entries
            .iter()
            .map(|r| r.time_taken_us)
            .max()
            .unwrap_or(0)
            .min(self.max_wait_us)
    }

    /// Uniformly pick a route and return a copy whose `time_taken_us` now
    /// carries the normalizing sleep `max(longest_time_used - measured, 0)`.
    pub fn get_random(&self) -> Option<Route> {
        if self.entries.is_empty() {
            return None;
        }
        let longest = self.longest_time_used();
        let picked = &self.entries[rand::thread_rng().gen_range(0..self.entries.len())];
        let sleep_us = longest.saturating_sub(picked.time_taken_us);
        Some(Route::new(
            picked.source_id,
            picked.destination_id,
            picked.path.clone(),
            sleep_us,
        ))
    }

    /// Drop every entry
    pub fn purge_all(&mut self) {
        self.entries.clear();
    }

    /// Drop every entry whose path contains `id`, returning how many went
    pub fn invalidate_containing(&mut self, id: NodeId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|r| !r.contains(id));
        before - self.entries.len()
    }

    /// Snapshot of the current entries
    pub fn routes(&self) -> Vec<Route> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(dest: u16, path: &[u16], time_us: u64) -> Route {
        Route::new(
            NodeId::new(path[0]),
            NodeId::new(dest),
            path.iter().copied().map(NodeId::new).collect(),
            time_us,
        )
    }

    #[test]
    fn test_empty() {
        let table = RoutingTable::new(1_000_000);
        assert!(table.is_empty());
        assert_eq!(table.longest_time_used(), 0);
        assert!(table.get_random().is_none());
    }

    #[test]
    fn test_longest_time_capped() {
        let mut table = RoutingTable::new(500);
        table.append(route(3, &[1, 2, 3], 200));
        table.append(route(4, &[1, 4], 9_000));
        assert_eq!(table.longest_time_used(), 500);
    }

    #[test]
    fn test_get_random_normalizes_sleep() {
        let mut table = RoutingTable::new(1_000_000);
        table.append(route(3, &[1, 2, 3], 400));
        let picked = table.get_random().unwrap();
        // single entry: it is the slowest, so it sleeps nothing
        assert_eq!(picked.time_taken_us, 0);
        assert_eq!(picked.path.len(), 3);

        table.append(route(4, &[1, 4], 1_000));
        for _ in 0..32 {
            let picked = table.get_random().unwrap();
            if picked.destination_id == NodeId::new(3) {
                assert_eq!(picked.time_taken_us, 600);
            } else {
                assert_eq!(picked.time_taken_us, 0);
            }
        }
        // the stored entries keep their measured times
        assert_eq!(table.longest_time_used(), 1_000);
    }

    #[test]
    fn test_entry_slower_than_cap_sleeps_zero() {
        let mut table = RoutingTable::new(500);
        table.append(route(3, &[1, 2, 3], 9_000));
        let picked = table.get_random().unwrap();
        assert_eq!(picked.time_taken_us, 0);
    }

    #[test]
    fn test_invalidate_containing() {
        let mut table = RoutingTable::new(1_000_000);
        table.append(route(3, &[1, 2, 3], 10));
        table.append(route(5, &[1, 4, 5], 10));
        table.append(route(6, &[1, 2, 6], 10));

        let removed = table.invalidate_containing(NodeId::new(2));
        assert_eq!(removed, 2);
        assert_eq!(table.len(), 1);
        assert_eq!(table.routes()[0].destination_id, NodeId::new(5));
    }

    #[test]
    fn test_purge_all() {
        let mut table = RoutingTable::new(1_000_000);
        table.append(route(3, &[1, 2, 3], 10));
        table.append(route(4, &[1, 4], 10));
        table.purge_all();
        assert!(table.is_empty());
    }
}
