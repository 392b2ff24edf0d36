//! ## Transfer engine of the NAT traversal messaging stack
//!
//! Two long-running workers make up the engine. The [`hub::Hub`] owns the
//! datagram socket: it tracks per-remote connection liveness, answers
//! heartbeats and feeds everything else into a bounded receive cache. The
//! [`peer::Peer`] is the dispatch loop of the reliability layer: it drains
//! arrivals, retransmits expired departures, reassembles fragments and
//! reports the outcome of every transfer through its handler.
//!
//! The embedder supplies the handlers. They are held as weak references,
//! so replacing or dropping an observer never keeps the engine alive and
//! never leaks it.

pub mod connection;
pub mod directory;
pub mod hub;
pub mod peer;
pub mod pool;
pub mod signer;

use crate::connection::ConnectionStatus;

use std::net::SocketAddr;

use bytes::Bytes;
use codec::{dmtp::Location, mtp::Package};

/// Observer of the socket hub.
///
/// Callbacks arrive on the hub's receive worker, outside of any collection
/// lock; per connection they are serialized and ordered.
pub trait HubHandler: Send + Sync {
    /// The derived status of a tracked connection changed. Fired exactly
    /// once per observed transition.
    #[allow(unused_variables)]
    fn on_connection_status_changed(
        &self,
        remote: SocketAddr,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
    }

    /// A datagram from `remote` was appended to the receive cache.
    #[allow(unused_variables)]
    fn on_connection_received_data(&self, remote: SocketAddr) {}
}

/// Observer and transport of the peer engine.
///
/// The engine never touches the OS socket itself: every outgoing datagram
/// goes through [`PeerHandler::send_data`], so the embedder decides how
/// bytes reach the remote (directly, through a relay, or not at all in
/// tests).
pub trait PeerHandler: Send + Sync {
    /// Perform the OS-level send. A negative return means the datagram was
    /// not sent; the departure stays pending and will be retried.
    fn send_data(&self, data: &[u8], destination: SocketAddr, source: SocketAddr) -> isize;

    /// A command body arrived. Returning `true` acknowledges it with a
    /// `CommandRespond`.
    fn on_received_command(
        &self,
        body: &Bytes,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> bool;

    /// A message body arrived, reassembled if it was fragmented. Returning
    /// `true` acknowledges it.
    fn on_received_message(
        &self,
        body: &Bytes,
        source: SocketAddr,
        destination: SocketAddr,
    ) -> bool;

    /// Policy gate consulted before a fragment enters the reassembly pool.
    #[allow(unused_variables)]
    fn check_fragment(&self, fragment: &Package, source: SocketAddr, destination: SocketAddr) -> bool {
        true
    }

    #[allow(unused_variables)]
    fn on_send_command_success(&self, sn: u32, destination: SocketAddr, source: SocketAddr) {}

    #[allow(unused_variables)]
    fn on_send_command_timeout(&self, sn: u32, destination: SocketAddr, source: SocketAddr) {}

    #[allow(unused_variables)]
    fn on_send_message_success(&self, sn: u32, destination: SocketAddr, source: SocketAddr) {}

    #[allow(unused_variables)]
    fn on_send_message_timeout(&self, sn: u32, destination: SocketAddr, source: SocketAddr) {}

    /// Fragments of a message that never completed are handed back before
    /// they are dropped, so the embedder may archive them.
    #[allow(unused_variables)]
    fn recycle_fragments(&self, fragments: &[Package], source: SocketAddr, destination: SocketAddr) {
    }
}

/// Storage interface for signed location records.
pub trait LocationHandler: Send + Sync {
    fn store_location(&self, location: Location) -> bool;

    fn clear_location(&self, location: &Location) -> bool;

    fn locations_of(&self, identifier: &str) -> Vec<Location>;
}

/// External signer for location records. The engine treats both operations
/// as opaque; the canonical byte layout they run over is
/// [`Location::signable_bytes`].
pub trait SignatureProvider: Send + Sync {
    fn sign(&self, data: &[u8]) -> Vec<u8>;

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}
