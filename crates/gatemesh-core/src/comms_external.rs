//! External communication: client ingress and gateway egress.
//!
//! Ingress: each accepted client connection is handled by a short-lived
//! pool task that reads exactly one external packet, validates its
//! checksum, wraps it into an internal packet whose route contains only
//! this node, and runs the forwarding decision tree as if the packet had
//! just arrived off the link.
//!
//! Egress: at a gateway-capable terminal node, open TCP to the payload's
//! destination, stream the answer back as RESPONSE packets over the
//! reversed route. At the origin, a response packet is delivered to the
//! client by connecting back to the client's listening port.

use crate::comms_internal;
use crate::node::Node;
use crate::packet::{ExternalPacket, InternalBody, InternalPacket};
use crate::route::PacketRoute;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How often a blocked gateway read re-checks the running flag
const EGRESS_READ_POLL: Duration = Duration::from_millis(500);

/// Short-lived task for one accepted client connection
pub(crate) fn handle_client(node: Arc<Node>, mut stream: TcpStream) {
    let request = match ExternalPacket::read_from(&mut stream) {
        Ok(packet) => packet,
        Err(e) => {
            warn!(node = %node.id(), error = %e, "failed to read client packet");
            let _ = stream.shutdown(Shutdown::Both);
            return;
        }
    };

    if !request.verify_checksum() {
        warn!(node = %node.id(), "checksum mismatch on ingress, dropping packet");
        let _ = stream.shutdown(Shutdown::Both);
        return;
    }

    info!(
        node = %node.id(),
        source = %request.source_text(),
        dest = %request.dest_text(),
        port = request.dest_port,
        "received external request"
    );

    let packet = InternalPacket::data(node.id(), request, PacketRoute::single(node.id()));
    comms_internal::handle_data(&node, packet);

    let _ = stream.shutdown(Shutdown::Both);
}

/// Deliver a terminal DATA packet to the outside world.
///
/// For a response, "outside" is the client listening on the packet's
/// destination address. For a request, it is the external host: the
/// payload is sent there and every chunk of the answer is wrapped into a
/// RESPONSE packet and sent back over the reversal of the packet's route.
/// Returns false when the external connect or send fails, in which case
/// the caller treats it as a delivery failure.
pub(crate) fn handle_send_external(node: &Arc<Node>, packet: &InternalPacket) -> bool {
    let InternalBody::Data(payload) = &packet.body else {
        return false;
    };
    let addr = format!("{}:{}", payload.dest_text(), payload.dest_port);
    info!(node = %node.id(), %addr, "handling outgoing delivery");

    let mut stream = match TcpStream::connect(&addr) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(node = %node.id(), %addr, error = %e, "external connect failed");
            return false;
        }
    };

    if packet.is_response {
        // reverse-direction delivery: hand the packet itself to the client
        return match payload.write_to(&mut stream) {
            Ok(()) => true,
            Err(e) => {
                warn!(node = %node.id(), %addr, error = %e, "client delivery failed");
                false
            }
        };
    }

    if let Err(e) = stream.write_all(&payload.payload) {
        warn!(node = %node.id(), %addr, error = %e, "external send failed");
        return false;
    }

    // the answer travels the route we came along, reversed
    let mut reversed: Vec<_> = packet.route.path.clone();
    reversed.reverse();
    let origin = reversed[reversed.len() - 1];

    let _ = stream.set_read_timeout(Some(EGRESS_READ_POLL));
    let mut seq_nr: u16 = 0;
    let mut buf = vec![0u8; u16::MAX as usize];
    while node.is_running() {
        let n = match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue;
            }
            Err(_) => break,
        };

        let response =
            ExternalPacket::response_to(payload, &buf[..n], seq_nr, node.config().client_port);
        let mut response_packet = InternalPacket::data(
            node.id(),
            response,
            PacketRoute {
                path: reversed.clone(),
                step: 0,
                has_slept: false,
            },
        );
        response_packet.is_response = true;
        response_packet.dest_node_id = origin;

        if reversed.len() == 1 {
            // this gateway is also the origin: deliver straight to the client
            if !handle_send_external(node, &response_packet) {
                warn!(node = %node.id(), seq_nr, "response delivery to client failed");
            }
        } else {
            response_packet.route.step = 1;
            let next = response_packet.route.current_hop();
            if node.link().send(&response_packet, next).is_err() {
                warn!(node = %node.id(), to = %next, seq_nr, "response hop refused");
            }
        }
        seq_nr += 1;
    }

    true
}
