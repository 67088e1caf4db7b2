//! Node state and lifecycle.
//!
//! A node owns its neighbor table, routing table, worker pool, and client
//! listener. `init` allocates everything, `run` starts the permanent tasks
//! (internal receive loop, HELLO poller) and polls the listener for client
//! connections, `close` drains it all cooperatively.

use crate::comms_external;
use crate::comms_internal;
use crate::config::NodeConfig;
use crate::error::Result;
use crate::link::LinkLayer;
use crate::neighbor::NeighborTable;
use crate::packet::NodeId;
use crate::pool::WorkerPool;
use crate::route::Route;
use crate::routing_table::RoutingTable;
use crate::{lock_ok, wait_timeout_ok};
use rand::seq::SliceRandom;
use socket2::{Domain, Socket, Type};
use std::io::Write;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How long the accept poll sleeps between checks of the listener
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Fixed-capacity ring of accepted client sockets, kept so `close` can
/// best-effort notify clients before shutting them down
struct ConnectionRing {
    slots: Vec<Option<TcpStream>>,
    next: usize,
}

impl ConnectionRing {
    fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, next: 0 }
    }

    fn insert(&mut self, stream: TcpStream) {
        self.slots[self.next] = Some(stream);
        self.next = (self.next + 1) % self.slots.len();
    }

    fn notify_and_shutdown(&mut self) {
        for slot in &mut self.slots {
            if let Some(mut stream) = slot.take() {
                if stream.write_all(b"q").is_ok() {
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                }
            }
        }
    }
}

/// A single mesh node
pub struct Node {
    id: NodeId,
    cfg: NodeConfig,
    link: Arc<dyn LinkLayer>,
    running: AtomicBool,
    pub(crate) neighbors: Mutex<NeighborTable>,
    pub(crate) routing: Mutex<RoutingTable>,
    pool: WorkerPool,
    listener: TcpListener,
    connections: Mutex<ConnectionRing>,
    known_nodes: Vec<NodeId>,
    /// Woken at close time so interval sleeps end early
    shutdown: (Mutex<()>, Condvar),
}

impl Node {
    /// Allocate a node: bind the client listener, pre-size the tables,
    /// create the worker pool, and ask the link for the known population.
    pub fn init(id: NodeId, cfg: NodeConfig, link: Arc<dyn LinkLayer>) -> Result<Arc<Node>> {
        let port = cfg.device_port(id);
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        let addr: SocketAddr = ([0, 0, 0, 0], port).into();
        socket.bind(&addr.into())?;
        socket.listen(cfg.max_connections as i32)?;
        let listener: TcpListener = socket.into();
        listener.set_nonblocking(true)?;

        let known_nodes = link.known_nodes(id);

        let node = Arc::new(Node {
            id,
            neighbors: Mutex::new(NeighborTable::new(cfg.known_nodes_count)),
            routing: Mutex::new(RoutingTable::new(cfg.max_wait_us)),
            pool: WorkerPool::new(cfg.max_threads, cfg.queue_size),
            listener,
            connections: Mutex::new(ConnectionRing::new(cfg.max_connections)),
            known_nodes,
            shutdown: (Mutex::new(()), Condvar::new()),
            running: AtomicBool::new(false),
            link,
            cfg,
        });
        info!(node = %node.id, port, "initialized");
        Ok(node)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.cfg
    }

    pub(crate) fn link(&self) -> &dyn LinkLayer {
        self.link.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ids this node probes with HELLO
    pub fn known_nodes(&self) -> &[NodeId] {
        &self.known_nodes
    }

    /// Snapshot of current neighbor ids
    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        lock_ok(&self.neighbors).ids()
    }

    /// Number of routes currently cached
    pub fn route_count(&self) -> usize {
        lock_ok(&self.routing).len()
    }

    /// Snapshot of the cached routes
    pub fn routes(&self) -> Vec<Route> {
        lock_ok(&self.routing).routes()
    }

    /// Start the pool and the permanent tasks, then poll the listener for
    /// client connections until `close` flips the running flag. Blocks the
    /// calling thread for the node's lifetime.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.pool.start();

        let receiver = Arc::clone(self);
        self.pool.submit(move || comms_internal::recv_loop(receiver))?;
        let poller = Arc::clone(self);
        self.pool.submit(move || comms_internal::hello_poll_loop(poller))?;

        info!(node = %self.id, "running");

        while self.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    info!(node = %self.id, %peer, "accepted client connection");
                    if let Ok(clone) = stream.try_clone() {
                        lock_ok(&self.connections).insert(clone);
                    }
                    let handler = Arc::clone(self);
                    if self
                        .pool
                        .submit(move || comms_external::handle_client(handler, stream))
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    if self.is_running() {
                        warn!(node = %self.id, error = %e, "accept failed");
                    }
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        Ok(())
    }

    /// Cooperative shutdown: notify clients, detach from the link, stop the
    /// pool. Every suspension point observes this within one HELLO interval.
    pub fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.1.notify_all();
        lock_ok(&self.connections).notify_and_shutdown();
        self.link.disconnect(self.id);
        self.pool.stop();
        info!(node = %self.id, "shutdown complete");
    }

    /// Sleep up to `duration`, ending early on shutdown. Returns whether
    /// the node is still running.
    pub(crate) fn wait_while_running(&self, duration: Duration) -> bool {
        let (lock, cond) = &self.shutdown;
        let deadline = Instant::now() + duration;
        let mut guard = lock_ok(lock);
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = wait_timeout_ok(cond, guard, deadline - now);
        }
        drop(guard);
        self.is_running()
    }

    /// Uniform pick among neighbors that appear neither in `path` nor in
    /// `ignore`. Returns `None` when no candidate remains.
    pub(crate) fn random_neighbor_excluding(
        &self,
        path: &[NodeId],
        ignore: &[NodeId],
    ) -> Option<NodeId> {
        let eligible: Vec<NodeId> = lock_ok(&self.neighbors)
            .ids()
            .into_iter()
            .filter(|id| !path.contains(id) && !ignore.contains(id))
            .collect();
        eligible.choose(&mut rand::thread_rng()).copied()
    }
}
