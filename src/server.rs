use crate::config::Config;

use std::{net::SocketAddr, sync::Arc};

use bytes::{Bytes, BytesMut};
use codec::{
    dmtp::{Command, Envelope, Location},
    mtp,
    stun::{
        Attributes, Message, MessageEncoder,
        attributes::{
            AttrKind, ChangeRequest, Data, ErrKind, ErrorCode, Lifetime, MappedAddress, Software,
            SourceAddress, StunError, UnknownAttributes, XorMappedAddress, XorPeerAddress,
            XorRelayedAddress,
        },
        methods::{
            ALLOCATE_REQUEST, ALLOCATE_RESPONSE, BINDING_ERROR, BINDING_REQUEST, BINDING_RESPONSE,
            DATA_INDICATION, SEND_INDICATION,
        },
    },
};
use service::{
    HubHandler, LocationHandler, PeerHandler,
    connection::ConnectionStatus,
    directory::{Directory, unix_time},
    hub::{Datagram, Hub},
    peer::Peer,
};

/// The node's request handler: one instance dispatches everything the hub
/// receives, either into the reliability engine (MTP datagrams) or through
/// the STUN/TURN answering machine, and serves the DMTP location commands
/// on top of the engine.
pub struct Server {
    config: Arc<Config>,
    hub: Arc<Hub>,
    peer: Arc<Peer>,
    directory: Arc<Directory>,
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        hub: Arc<Hub>,
        peer: Arc<Peer>,
        directory: Arc<Directory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            hub,
            peer,
            directory,
        })
    }

    /// The address this node advertises as its relayed transport.
    fn external(&self) -> SocketAddr {
        self.config
            .transport
            .external
            .unwrap_or_else(|| self.hub.local_addr())
    }

    fn handle_stun(&self, datagram: &Datagram) {
        let mut attributes = Attributes::default();
        let message = match Message::decode(&datagram.payload, &mut attributes) {
            Ok(it) => it,
            Err(e) => {
                log::trace!(
                    "dropped a malformed stun message: addr={:?}, {:?}",
                    datagram.source,
                    e
                );

                return;
            }
        };

        let source = datagram.source;
        let mut bytes = BytesMut::with_capacity(1280);

        match message.method() {
            BINDING_REQUEST => {
                log::info!("binding request: addr={:?}", source);

                // One socket, one interface: a filtering probe asking for a
                // changed address cannot be honored, and RFC3489 wants the
                // offending attribute called out.
                if let Some(change) = message.get::<ChangeRequest>() {
                    if change.ip || change.port {
                        let mut encoder =
                            MessageEncoder::extend(BINDING_ERROR, &message, &mut bytes);
                        encoder.append::<ErrorCode>(StunError::from(ErrKind::UnknownAttribute));
                        encoder.append::<UnknownAttributes>(vec![AttrKind::ChangeRequest as u16]);
                        encoder.flush();

                        self.hub.send(&bytes, source);
                        return;
                    }
                }

                let mut encoder = MessageEncoder::extend(BINDING_RESPONSE, &message, &mut bytes);
                encoder.append::<XorMappedAddress>(source);
                encoder.append::<MappedAddress>(source);
                encoder.append::<SourceAddress>(self.hub.local_addr());
                encoder.append::<Software>(crate::SOFTWARE);
                encoder.flush();

                self.hub.send(&bytes, source);
            }
            ALLOCATE_REQUEST => {
                log::info!("allocate request: addr={:?}", source);

                // This node relays through its own interface, so the
                // relayed address it hands out is simply its external
                // address; keeping the mapping warm is the client's
                // heartbeat's job.
                let mut encoder = MessageEncoder::extend(ALLOCATE_RESPONSE, &message, &mut bytes);
                encoder.append::<XorRelayedAddress>(self.external());
                encoder.append::<XorMappedAddress>(source);
                encoder.append::<Lifetime>(600);
                encoder.flush();

                self.hub.send(&bytes, source);
            }
            SEND_INDICATION => {
                let (Some(peer), Some(data)) =
                    (message.get::<XorPeerAddress>(), message.get::<Data>())
                else {
                    log::trace!("send indication without peer or data: addr={:?}", source);
                    return;
                };

                log::trace!(
                    "relaying: addr={:?} -> {:?}, size={}",
                    source,
                    peer,
                    data.len()
                );

                // Repackage as a data indication, the source rewritten to
                // the sender as this node saw it.
                let token: [u8; 12] = rand::random();
                let mut encoder = MessageEncoder::new(DATA_INDICATION, &token, &mut bytes);
                encoder.append::<XorPeerAddress>(source);
                encoder.append::<Data>(data);
                encoder.flush();

                self.hub.send(&bytes, peer);
            }
            method => {
                log::trace!("unhandled stun method: addr={:?}, {:?}", source, method);
            }
        }
    }

    fn handle_hi(&self, location: Location, source: SocketAddr) -> bool {
        // Track whoever introduces themselves; the heartbeat keeps their
        // NAT mapping warm from now on.
        self.hub.connect(source);

        if location.signature.is_none() {
            // First contact: challenge the client with the address this
            // node observed, so the signed record proves the mapping.
            let mut challenge = Location::new(&location.identifier, unix_time());
            challenge.mapped = Some(source);

            self.peer.send_command(
                Command::Sign(challenge).encode(),
                source,
                self.hub.local_addr(),
            );

            return true;
        }

        let stored = self.directory.store_location(location.clone());
        if stored {
            log::info!(
                "login: id={:?}, addr={:?}, mapped={:?}",
                location.identifier,
                source,
                location.mapped
            );
        } else {
            log::warn!(
                "rejected a location record: id={:?}, addr={:?}",
                location.identifier,
                source
            );
        }

        stored
    }

    fn handle_call(&self, identifier: &str, source: SocketAddr) -> bool {
        let locations = self.directory.locations_of(identifier);
        log::info!(
            "call: id={:?}, addr={:?}, known locations={}",
            identifier,
            source,
            locations.len()
        );

        if locations.is_empty() {
            // Nothing known: a bare FROM tells the caller the callee is
            // offline.
            self.peer.send_command(
                Command::From(Location::new(identifier, 0)).encode(),
                source,
                self.hub.local_addr(),
            );

            return true;
        }

        // Advise the caller of every location of the callee.
        for location in &locations {
            self.peer.send_command(
                Command::From(location.clone()).encode(),
                source,
                self.hub.local_addr(),
            );
        }

        // And push the caller's own record to the callee, so both sides
        // can start punching toward each other.
        if let Some(caller) = self.directory.find_by_address(source) {
            for location in &locations {
                let Some(destination) = location.mapped.or(location.source) else {
                    continue;
                };

                self.peer.send_command(
                    Command::From(caller.clone()).encode(),
                    destination,
                    self.hub.local_addr(),
                );
            }
        }

        true
    }

    fn handle_bye(&self, location: Location, source: SocketAddr) -> bool {
        let cleared = self.directory.clear_location(&location);
        if cleared {
            log::info!("logout: id={:?}, addr={:?}", location.identifier, source);
            self.hub.disconnect(source);
        }

        cleared
    }
}

impl HubHandler for Server {
    fn on_connection_status_changed(
        &self,
        remote: SocketAddr,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
        log::info!(
            "connection status changed: addr={:?}, {:?} -> {:?}",
            remote,
            old,
            new
        );
    }

    fn on_connection_received_data(&self, _remote: SocketAddr) {
        let Some(datagram) = self.hub.receive() else {
            return;
        };

        // MTP datagrams feed the reliability engine; everything else goes
        // through the STUN answering machine.
        if datagram.payload.len() >= 4 && datagram.payload[0..4] == mtp::MAGIC {
            self.peer.append_arrival(datagram);
        } else {
            self.handle_stun(&datagram);
        }
    }
}

impl PeerHandler for Server {
    fn send_data(&self, data: &[u8], destination: SocketAddr, _source: SocketAddr) -> isize {
        self.hub.send(data, destination)
    }

    fn on_received_command(
        &self,
        body: &Bytes,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        let command = match Command::decode(body) {
            Ok(it) => it,
            Err(e) => {
                log::trace!("dropped an unreadable command: addr={:?}, {:?}", source, e);
                return false;
            }
        };

        match command {
            Command::Hi(location) => self.handle_hi(location, source),
            Command::Call { identifier } => self.handle_call(&identifier, source),
            Command::Bye(location) => self.handle_bye(location, source),
            Command::Sign(_) | Command::From(_) => {
                // Server-issued commands have no business arriving here.
                log::trace!("unexpected command: addr={:?}", source);
                false
            }
        }
    }

    fn on_received_message(
        &self,
        body: &Bytes,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        // The node is not a mailbox; messages sent to it are only logged.
        match Envelope::decode(body) {
            Ok(it) => log::info!(
                "message: from={:?}, to={:?}, size={}, addr={:?}",
                it.sender,
                it.receiver,
                it.content.len(),
                source
            ),
            Err(_) => log::info!(
                "opaque message: size={}, addr={:?}",
                body.len(),
                source
            ),
        }

        true
    }

    fn on_send_command_success(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::trace!("command delivered: sn={}, addr={:?}", sn, destination);
    }

    fn on_send_command_timeout(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::warn!("command timed out: sn={}, addr={:?}", sn, destination);
    }

    fn on_send_message_success(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::trace!("message delivered: sn={}, addr={:?}", sn, destination);
    }

    fn on_send_message_timeout(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::warn!("message timed out: sn={}, addr={:?}", sn, destination);
    }

    fn recycle_fragments(
        &self,
        fragments: &[codec::mtp::Package],
        source: SocketAddr,
        _destination: SocketAddr,
    ) {
        log::warn!(
            "discarded an incomplete message: fragments={}, addr={:?}",
            fragments.len(),
            source
        );
    }
}
