//! Route discovery: a distributed depth-first flood toward any
//! gateway-capable node.
//!
//! The initiator seeds a ROUTING packet carrying a routing context (visited
//! bitmap, path so far, flood start time) and sends a branch to each of its
//! neighbors. Every branch stops at the first gateway-capable node it
//! reaches, which answers with a ROUTING_DONE packet that walks the path
//! backwards to the origin. There is no global completion signal: the
//! origin simply collects whichever ROUTING_DONE packets arrive.

use crate::lock_ok;
use crate::node::Node;
use crate::packet::{InternalPacket, NodeId};
use crate::route::{Route, RoutePayload, RoutingContext};
use tracing::{debug, warn};

/// Seed a discovery flood from this node
pub(crate) fn discover_routes(node: &Node) {
    debug!(node = %node.id(), "starting route discovery");
    let context = RoutingContext::start(node.id(), node.config().known_nodes_count);
    continue_flood(node, context);
}

/// One step of the flood, executed by each node a ROUTING packet reaches
pub(crate) fn continue_flood(node: &Node, mut context: RoutingContext) {
    match context.visited.get_mut(node.id().index()) {
        Some(slot) => *slot = true,
        None => {
            warn!(node = %node.id(), "node id outside the flood's population, dropping");
            return;
        }
    }
    context.path.push(node.id());

    if node.link().can_connect(node.id()) {
        let elapsed = context.elapsed_us();
        let route = Route::new(context.path[0], node.id(), context.path.clone(), elapsed);
        if context.path.len() == 1 {
            // the initiator is itself gateway-capable
            if elapsed <= node.config().max_route_time_us {
                lock_ok(&node.routing).append(route);
            }
            return;
        }
        // answer backwards through the neighbor this branch arrived from
        let back = context.path[context.path.len() - 2];
        let payload = RoutePayload {
            route,
            step_from_destination: 1,
        };
        let packet = InternalPacket::routing_done(node.id(), context.path[0], payload);
        if node.link().send(&packet, back).is_err() {
            debug!(node = %node.id(), to = %back, "routing done hop refused");
        }
        return;
    }

    for neighbor in node.neighbor_ids() {
        if context
            .visited
            .get(neighbor.index())
            .copied()
            .unwrap_or(true)
        {
            continue;
        }
        let branch = context.clone();
        let packet = InternalPacket::routing(node.id(), neighbor, branch);
        let _ = node.link().send(&packet, neighbor);
    }
}

/// A discovered route walking back toward its origin
pub(crate) fn handle_routing_done(node: &Node, origin: NodeId, mut payload: RoutePayload) {
    if origin == node.id() {
        if payload.route.time_taken_us > node.config().max_route_time_us {
            debug!(
                node = %node.id(),
                time_us = payload.route.time_taken_us,
                "discarding route slower than the cap"
            );
            return;
        }
        debug!(
            node = %node.id(),
            gateway = %payload.route.destination_id,
            hops = payload.route.path.len(),
            "route recorded"
        );
        lock_ok(&node.routing).append(payload.route);
        return;
    }

    payload.step_from_destination += 1;
    let Some(index) = payload
        .route
        .path
        .len()
        .checked_sub(payload.step_from_destination as usize + 1)
    else {
        warn!(node = %node.id(), "routing done walked past the origin, dropping");
        return;
    };
    let next = payload.route.path[index];
    let packet = InternalPacket::routing_done(node.id(), origin, payload);
    if node.link().send(&packet, next).is_err() {
        debug!(node = %node.id(), to = %next, "routing done hop refused");
    }
}
