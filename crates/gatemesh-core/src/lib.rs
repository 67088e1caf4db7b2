//! # Gatemesh Core
//!
//! A cooperative mesh routing runtime. A fixed population of wireless-like
//! nodes forwards client traffic toward whichever nodes can currently reach
//! the external network ("gateway-capable" nodes), survives unreliable
//! links and node deaths, and reports undeliverable requests back to the
//! client with an explicit FAILURE packet.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              Client                                   │
//! │        one TCP connection in, RESPONSE/FAILURE packets back           │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             Node                                      │
//! │  ┌────────────┐ ┌────────────┐ ┌─────────────┐ ┌──────────────────┐  │
//! │  │  external  │ │  internal  │ │    HELLO    │ │     worker       │  │
//! │  │  listener  │ │ recv loop  │ │   poller    │ │  pool + FIFO     │  │
//! │  └────────────┘ └────────────┘ └─────────────┘ └──────────────────┘  │
//! │  ┌──────────────────────────┐ ┌───────────────────────────────────┐  │
//! │  │     forwarding engine    │ │          route discovery          │  │
//! │  │ (route → bogo → failure) │ │     (depth-first flood + done)    │  │
//! │  └──────────────────────────┘ └───────────────────────────────────┘  │
//! │  ┌──────────────────────────┐ ┌───────────────────────────────────┐  │
//! │  │      neighbor table      │ │           routing table           │  │
//! │  └──────────────────────────┘ └───────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                       LinkLayer (send/recv/…)                         │
//! │      in-process geometric simulation, or real radio/UDP plumbing      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use gatemesh_core::{MeshSim, NodeConfig, SimConfig};
//!
//! // three nodes on a line; only the far end reaches the uplink
//! let sim = SimConfig::line(3, 100.0, 150.0);
//! let cfg = NodeConfig::default().with_ports(9000, 9500);
//! let mesh = MeshSim::start(sim, cfg).unwrap();
//! // ... clients connect to 9001..=9003 ...
//! mesh.shutdown();
//! ```

pub mod config;
pub mod error;
pub mod link;
pub mod neighbor;
pub mod node;
pub mod packet;
pub mod pool;
pub mod route;
pub mod routing_table;
pub mod sim;

pub(crate) mod comms_external;
pub(crate) mod comms_internal;
pub(crate) mod discovery;

// Re-export main types
pub use config::NodeConfig;
pub use error::{MeshError, Result};
pub use link::LinkLayer;
pub use neighbor::{NeighborEntry, NeighborTable, SweepReport};
pub use node::Node;
pub use packet::{ExternalKind, ExternalPacket, InternalBody, InternalPacket, NodeId};
pub use pool::WorkerPool;
pub use route::{PacketRoute, Route, RoutePayload, RoutingContext};
pub use routing_table::RoutingTable;
pub use sim::{Coord, MeshSim, SimConfig, SimTransport};

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Lock a mutex, recovering the guard if a panicking thread poisoned it
pub(crate) fn lock_ok<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Condvar wait with the same poison recovery
pub(crate) fn wait_ok<'a, T>(cond: &Condvar, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
    cond.wait(guard).unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Bounded condvar wait with the same poison recovery
pub(crate) fn wait_timeout_ok<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    timeout: Duration,
) -> MutexGuard<'a, T> {
    cond.wait_timeout(guard, timeout)
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .0
}
