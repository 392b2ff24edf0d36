//! ## Client SDK for the dim-node messaging stack
//!
//! Three things a client needs are packaged here: reflexive address
//! discovery against any STUN server ([`discover`]), relayed address
//! allocation ([`allocate`]), and the [`Client`] itself, which runs the
//! full login handshake against a node and then exchanges reliable
//! messages with other clients, directly or through the node's relay.

pub use codec;
pub use service;

use std::{
    collections::VecDeque,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket},
    sync::{Arc, Weak},
    time::Duration,
};

use anyhow::{Result, anyhow};
use bytes::{Bytes, BytesMut};
use codec::{
    dmtp::{Command, Envelope, Location},
    mtp,
    stun::{
        Attributes, Message, MessageEncoder,
        attributes::{
            Data, MappedAddress, XorMappedAddress, XorMappedAddressAlt, XorPeerAddress,
            XorRelayedAddress,
        },
        methods::{
            ALLOCATE_REQUEST, ALLOCATE_RESPONSE, BINDING_REQUEST, BINDING_RESPONSE,
            DATA_INDICATION, SEND_INDICATION,
        },
    },
};
use parking_lot::Mutex;
use service::{
    HubHandler, LocationHandler, PeerHandler, SignatureProvider,
    connection::ConnectionStatus,
    directory::{Directory, unix_time},
    hub::{Datagram, Hub, HubOptions},
    peer::{Peer, PeerOptions},
    pool::MemoryPool,
    signer::HmacSigner,
};

/// Ask a STUN server for this socket's public reflexive address.
///
/// Runs on a throwaway socket with a bounded retry schedule; the answer
/// therefore describes the NAT mapping of that throwaway socket. A client
/// learns the mapping of its long-lived socket during login, from the
/// node's challenge.
pub fn discover(server: SocketAddr) -> Result<SocketAddr> {
    let mut request = BytesMut::with_capacity(64);
    let token: [u8; 12] = rand::random();
    MessageEncoder::new(BINDING_REQUEST, &token, &mut request).flush();

    let response = exchange(server, &request, &token, BINDING_RESPONSE)?;

    let mut attributes = Attributes::default();
    let message = Message::decode(&response, &mut attributes)?;
    message
        .get::<XorMappedAddress>()
        .or_else(|| message.get::<XorMappedAddressAlt>())
        .or_else(|| message.get::<MappedAddress>())
        .ok_or_else(|| anyhow!("the binding response carries no mapped address"))
}

/// Ask a relay for a relayed transport address, returning
/// `(mapped, relayed)`.
pub fn allocate(server: SocketAddr) -> Result<(SocketAddr, SocketAddr)> {
    let mut request = BytesMut::with_capacity(64);
    let token: [u8; 12] = rand::random();
    MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut request).flush();

    let response = exchange(server, &request, &token, ALLOCATE_RESPONSE)?;

    let mut attributes = Attributes::default();
    let message = Message::decode(&response, &mut attributes)?;
    match (
        message.get::<XorMappedAddress>(),
        message.get::<XorRelayedAddress>(),
    ) {
        (Some(mapped), Some(relayed)) => Ok((mapped, relayed)),
        _ => Err(anyhow!("the allocate response is incomplete")),
    }
}

// One request, up to three attempts, answers matched on the transaction
// id and the expected method.
fn exchange(
    server: SocketAddr,
    request: &[u8],
    token: &[u8; 12],
    expect: codec::stun::methods::Method,
) -> Result<Vec<u8>> {
    let socket = UdpSocket::bind(match server {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    })?;

    socket.set_read_timeout(Some(Duration::from_millis(500)))?;

    let mut buf = [0u8; 1500];
    for _ in 0..3 {
        socket.send_to(request, server)?;

        let Ok((size, from)) = socket.recv_from(&mut buf) else {
            continue;
        };

        if from != server {
            continue;
        }

        let mut attributes = Attributes::default();
        let Ok(message) = Message::decode(&buf[..size], &mut attributes) else {
            continue;
        };

        if message.token() != token.as_slice() || message.method() != expect {
            continue;
        }

        return Ok(buf[..size].to_vec());
    }

    Err(anyhow!("no answer from the server: addr={:?}", server))
}

pub struct ClientOptions {
    pub bind: SocketAddr,
    /// The node serving logins, calls and relaying.
    pub server: SocketAddr,
    pub identifier: String,
    /// Deployment signing secret, shared with the node.
    pub secret: Option<String>,
}

enum LoginState {
    Anonymous,
    Challenged { sn: u32 },
    LoggedIn,
}

/// A messaging endpoint: owns its hub and reliability engine, performs
/// the `HI -> SIGN -> signed HI` login, resolves peers through `CALL`,
/// and exchanges envelopes with them.
pub struct Client {
    identifier: String,
    server: SocketAddr,
    hub: Arc<Hub>,
    peer: Arc<Peer>,
    signer: Arc<dyn SignatureProvider>,
    directory: Arc<Directory>,
    state: Mutex<LoginState>,
    mapped: Mutex<Option<SocketAddr>>,
    relayed: Mutex<Option<SocketAddr>>,
    relay_routes: Mutex<ahash::HashMap<SocketAddr, SocketAddr>>,
    inbox: Mutex<VecDeque<Envelope>>,
}

impl Client {
    pub fn start(options: ClientOptions) -> Result<Arc<Self>> {
        let signer: Arc<dyn SignatureProvider> = Arc::new(match &options.secret {
            Some(secret) => HmacSigner::new(secret.as_bytes()),
            None => HmacSigner::random(),
        });

        let hub = Hub::new(HubOptions {
            bind: options.bind,
            ..HubOptions::default()
        })?;

        let peer = Peer::new(PeerOptions::default(), Arc::new(MemoryPool::default()));
        let this = Arc::new(Self {
            identifier: options.identifier,
            server: options.server,
            directory: Arc::new(Directory::new(signer.clone())),
            state: Mutex::new(LoginState::Anonymous),
            mapped: Mutex::new(None),
            relayed: Mutex::new(None),
            relay_routes: Mutex::new(ahash::HashMap::default()),
            inbox: Mutex::new(VecDeque::new()),
            hub: hub.clone(),
            peer: peer.clone(),
            signer,
        });

        hub.set_handler(Arc::downgrade(&this) as Weak<dyn HubHandler>);
        peer.set_handler(Arc::downgrade(&this) as Weak<dyn PeerHandler>);

        // The node is the first tracked connection; the heartbeat keeps
        // the NAT mapping toward it warm.
        hub.connect(options.server);
        Ok(this)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.hub.local_addr()
    }

    /// The reflexive address the node challenged us with, once known.
    pub fn mapped(&self) -> Option<SocketAddr> {
        *self.mapped.lock()
    }

    /// Advertise the node as this client's relayed transport. The next
    /// signed record carries it, so unreachable peers can still deliver
    /// through the node.
    pub fn enable_relay(&self) {
        *self.relayed.lock() = Some(self.server);
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(*self.state.lock(), LoginState::LoggedIn)
    }

    /// Announce this identity to the node. The node answers with a SIGN
    /// challenge; the signed record follows automatically and
    /// [`Client::is_logged_in`] flips once the node acknowledged it.
    pub fn login(&self) -> u32 {
        let mut hello = Location::new(&self.identifier, unix_time());
        hello.source = Some(self.hub.local_addr());

        self.peer.send_command(
            Command::Hi(hello).encode(),
            self.server,
            self.hub.local_addr(),
        )
    }

    /// Retract this identity's location from the node.
    pub fn logout(&self) -> u32 {
        let sn = self.peer.send_command(
            Command::Bye(self.signed_location()).encode(),
            self.server,
            self.hub.local_addr(),
        );

        *self.state.lock() = LoginState::Anonymous;
        sn
    }

    /// Ask the node where an identifier can be reached. Answers arrive as
    /// FROM commands and land in the local contact directory.
    pub fn call(&self, identifier: &str) -> u32 {
        self.peer.send_command(
            Command::Call {
                identifier: identifier.to_string(),
            }
            .encode(),
            self.server,
            self.hub.local_addr(),
        )
    }

    /// The freshest known location of a peer.
    pub fn location_of(&self, identifier: &str) -> Option<Location> {
        self.directory.locations_of(identifier).into_iter().last()
    }

    /// Send a text straight to the peer's known address.
    pub fn send_text(&self, receiver: &str, text: &str) -> Result<u32> {
        let location = self
            .location_of(receiver)
            .ok_or_else(|| anyhow!("no known location, call them first"))?;

        let destination = location
            .source
            .or(location.mapped)
            .ok_or_else(|| anyhow!("the peer has no direct address"))?;

        self.hub.connect(destination);
        Ok(self
            .peer
            .send_message(self.envelope(receiver, text), destination, self.hub.local_addr()))
    }

    /// Send a text through the peer's relay. The reliability engine still
    /// runs end to end; only the datagrams travel wrapped in send and
    /// data indications.
    pub fn send_text_via_relay(&self, receiver: &str, text: &str) -> Result<u32> {
        let location = self
            .location_of(receiver)
            .ok_or_else(|| anyhow!("no known location, call them first"))?;

        let relay = location
            .relayed
            .ok_or_else(|| anyhow!("the peer offers no relay"))?;

        let destination = location
            .mapped
            .or(location.source)
            .ok_or_else(|| anyhow!("the relay cannot address the peer"))?;

        self.relay_routes.lock().insert(destination, relay);
        Ok(self
            .peer
            .send_message(self.envelope(receiver, text), destination, self.hub.local_addr()))
    }

    /// Pop the oldest received envelope, if any.
    pub fn poll_inbox(&self) -> Option<Envelope> {
        self.inbox.lock().pop_front()
    }

    fn envelope(&self, receiver: &str, text: &str) -> Bytes {
        Envelope {
            sender: self.identifier.clone(),
            receiver: receiver.to_string(),
            timestamp: unix_time(),
            content: Bytes::copy_from_slice(text.as_bytes()),
            signature: None,
            key: None,
            attachment: None,
        }
        .encode()
    }

    fn signed_location(&self) -> Location {
        let mut location = Location::new(&self.identifier, unix_time());
        location.source = Some(self.hub.local_addr());
        location.mapped = *self.mapped.lock();
        location.relayed = *self.relayed.lock();
        location.signature = Some(self.signer.sign(&location.signable_bytes()).into());
        location
    }

    fn deliver(&self, datagram: Datagram) {
        let payload = &datagram.payload;
        if payload.len() >= 4 && payload[0..4] == mtp::MAGIC {
            self.peer.append_arrival(datagram);
            return;
        }

        // Maybe a relayed datagram: unwrap the data indication and credit
        // the original sender.
        let mut attributes = Attributes::default();
        let Ok(message) = Message::decode(payload, &mut attributes) else {
            log::trace!(
                "dropped an unreadable datagram: addr={:?}, size={}",
                datagram.source,
                payload.len()
            );

            return;
        };

        if message.method() != DATA_INDICATION {
            return;
        }

        if let (Some(peer_addr), Some(data)) =
            (message.get::<XorPeerAddress>(), message.get::<Data>())
        {
            if data.len() >= 4 && data[0..4] == mtp::MAGIC {
                self.peer.append_arrival(Datagram {
                    payload: Bytes::copy_from_slice(data),
                    source: peer_addr,
                    destination: datagram.destination,
                });
            }
        }
    }
}

impl HubHandler for Client {
    fn on_connection_status_changed(
        &self,
        remote: SocketAddr,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
        log::trace!(
            "connection status changed: addr={:?}, {:?} -> {:?}",
            remote,
            old,
            new
        );
    }

    fn on_connection_received_data(&self, _remote: SocketAddr) {
        if let Some(datagram) = self.hub.receive() {
            self.deliver(datagram);
        }
    }
}

impl PeerHandler for Client {
    fn send_data(&self, data: &[u8], destination: SocketAddr, _source: SocketAddr) -> isize {
        // A destination with a relay route travels wrapped.
        if let Some(relay) = self.relay_routes.lock().get(&destination).copied() {
            let token: [u8; 12] = rand::random();
            let mut bytes = BytesMut::with_capacity(data.len() + 64);
            let mut encoder = MessageEncoder::new(SEND_INDICATION, &token, &mut bytes);
            encoder.append::<XorPeerAddress>(destination);
            encoder.append::<Data>(data);
            encoder.flush();

            return self.hub.send(&bytes, relay);
        }

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
            Command::Sign(challenge) => {
                if challenge.identifier != self.identifier {
                    return false;
                }

                // The node told us how it sees us; sign that and prove the
                // mapping.
                *self.mapped.lock() = challenge.mapped;

                let sn = self.peer.send_command(
                    Command::Hi(self.signed_location()).encode(),
                    self.server,
                    self.hub.local_addr(),
                );

                *self.state.lock() = LoginState::Challenged { sn };
                true
            }
            Command::From(location) => {
                if location.source.is_none() && location.mapped.is_none() {
                    log::info!("peer is offline: id={:?}", location.identifier);
                    return true;
                }

                let addr = location.mapped.or(location.source);
                if !self.directory.store_location(location) {
                    return false;
                }

                // Dial right away so both NAT mappings open.
                if let Some(addr) = addr {
                    self.hub.connect(addr);
                }

                true
            }
            _ => false,
        }
    }

    fn on_received_message(
        &self,
        body: &Bytes,
        source: SocketAddr,
        _destination: SocketAddr,
    ) -> bool {
        match Envelope::decode(body) {
            Ok(envelope) => {
                log::info!(
                    "message: from={:?}, size={}, addr={:?}",
                    envelope.sender,
                    envelope.content.len(),
                    source
                );

                self.inbox.lock().push_back(envelope);
            }
            Err(_) => {
                log::trace!("opaque message: size={}, addr={:?}", body.len(), source);
            }
        }

        true
    }

    fn on_send_command_success(&self, sn: u32, _destination: SocketAddr, _source: SocketAddr) {
        let mut state = self.state.lock();
        if let LoginState::Challenged { sn: expected } = *state {
            if expected == sn {
                *state = LoginState::LoggedIn;
                log::info!("logged in: id={:?}", self.identifier);
            }
        }
    }

    fn on_send_command_timeout(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::warn!("command timed out: sn={}, addr={:?}", sn, destination);
    }

    fn on_send_message_timeout(&self, sn: u32, destination: SocketAddr, _source: SocketAddr) {
        log::warn!("message timed out: sn={}, addr={:?}", sn, destination);
    }
}
