use crate::{
    HubHandler,
    connection::{Connection, ConnectionStatus},
};

use std::{
    collections::VecDeque,
    io::{self, ErrorKind},
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use ahash::{HashMap, HashMapExt};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

/// 4-byte heartbeat payloads. They keep NAT mappings warm and never reach
/// the receive cache.
pub const PING: &[u8] = b"PING";
pub const PONG: &[u8] = b"PONG";

/// Documented bound of the receive cache. Past it the oldest datagram is
/// dropped; there is no wire-level flow control.
pub const MAX_CACHE_SPACES: usize = 1024 * 1024 * 2;

/// One received datagram awaiting dispatch.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub payload: Bytes,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

pub struct HubOptions {
    pub bind: SocketAddr,
    /// Blocking read timeout of the receive worker.
    pub read_timeout: Duration,
    /// Cadence of heartbeat pings and error purges.
    pub ping_interval: Duration,
    pub cache_limit: usize,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            read_timeout: Duration::from_millis(2),
            ping_interval: Duration::from_secs(14),
            cache_limit: MAX_CACHE_SPACES,
        }
    }
}

/// The datagram socket wrapper: one socket, a set of tracked connections
/// and a bounded receive cache drained by the embedder.
///
/// The receive worker holds only a weak reference, so dropping the last
/// `Arc<Hub>` (or calling [`Hub::close`]) stops it.
pub struct Hub {
    socket: UdpSocket,
    local: SocketAddr,
    connections: RwLock<HashMap<SocketAddr, Connection>>,
    cache: Mutex<VecDeque<Datagram>>,
    handler: RwLock<Option<Weak<dyn HubHandler>>>,
    cache_limit: usize,
    closed: AtomicBool,
}

impl Hub {
    pub fn new(options: HubOptions) -> io::Result<Arc<Self>> {
        let socket = UdpSocket::bind(options.bind)?;
        socket.set_read_timeout(Some(options.read_timeout))?;

        let local = socket.local_addr()?;
        let this = Arc::new(Self {
            connections: RwLock::new(HashMap::with_capacity(1024)),
            cache: Mutex::new(VecDeque::with_capacity(1024)),
            handler: RwLock::new(None),
            cache_limit: options.cache_limit,
            closed: AtomicBool::new(false),
            socket,
            local,
        });

        // The receive worker: blocking reads with a short timeout, plus the
        // once-per-second status sweep and the heartbeat tick.
        let this_ = Arc::downgrade(&this);
        let ping_interval = options.ping_interval;
        thread::spawn(move || {
            let mut buf = vec![0u8; 2048];
            let mut next_sweep = Instant::now() + Duration::from_secs(1);
            let mut next_ping = Instant::now() + ping_interval;

            loop {
                let Some(this) = this_.upgrade() else {
                    break;
                };

                if this.closed.load(Ordering::Relaxed) {
                    break;
                }

                match this.socket.recv_from(&mut buf) {
                    Ok((size, source)) => this.accept(&buf[..size], source),
                    // An error will also be reported when a remote host shut
                    // down and its port answers with ICMP; that is per-event
                    // and harmless, like an empty read.
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::WouldBlock
                                | ErrorKind::TimedOut
                                | ErrorKind::ConnectionReset
                        ) => {}
                    Err(e) => {
                        // Anything else counts as nothing received.
                        log::warn!("udp socket receive failed: {}", e);

                        drop(this);
                        thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                }

                let now = Instant::now();
                if now >= next_sweep {
                    this.sweep(now);
                    next_sweep = now + Duration::from_secs(1);
                }

                if now >= next_ping {
                    this.ping();
                    this.purge();
                    next_ping = now + ping_interval;
                }
            }
        });

        Ok(this)
    }

    /// The observer is held weakly and may be replaced at any time.
    pub fn set_handler(&self, handler: Weak<dyn HubHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Start tracking a remote. Receiving from an untracked remote does not
    /// create a connection; this is the only place one is born.
    pub fn connect(&self, remote: SocketAddr) {
        self.connections
            .write()
            .entry(remote)
            .or_insert_with(|| Connection::new(remote, self.local));
    }

    pub fn disconnect(&self, remote: SocketAddr) {
        self.connections.write().remove(&remote);
    }

    /// The current derived status of a tracked remote.
    pub fn status_of(&self, remote: SocketAddr) -> Option<ConnectionStatus> {
        let lock = self.connections.read();
        let connection = lock.get(&remote)?;
        Some(ConnectionStatus::evaluate(
            Instant::now(),
            connection.sent_time(),
            connection.received_time(),
        ))
    }

    pub fn connections(&self) -> Vec<SocketAddr> {
        self.connections.read().keys().copied().collect()
    }

    /// Send one datagram. On success the connection's sent time moves,
    /// which may change its status. Returns the byte count, or a negative
    /// value when the OS send failed.
    pub fn send(&self, data: &[u8], destination: SocketAddr) -> isize {
        match self.socket.send_to(data, destination) {
            Ok(size) => {
                let transition = {
                    let mut lock = self.connections.write();
                    lock.get_mut(&destination)
                        .and_then(|it| it.touch_sent(Instant::now()))
                };

                self.notify_transition(destination, transition);
                size as isize
            }
            Err(e) => {
                log::trace!("udp socket send failed: addr={:?}, {}", destination, e);
                -1
            }
        }
    }

    /// Pop the oldest cached datagram.
    pub fn receive(&self) -> Option<Datagram> {
        self.cache.lock().pop_front()
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    /// Heartbeat the connections that need traffic to move: the ones never
    /// heard from, the ones being dialed and the ones awaiting a response.
    pub fn ping(&self) {
        let now = Instant::now();
        let targets: Vec<SocketAddr> = self
            .connections
            .read()
            .values()
            .filter(|it| {
                matches!(
                    ConnectionStatus::evaluate(now, it.sent_time(), it.received_time()),
                    ConnectionStatus::Default
                        | ConnectionStatus::Connecting
                        | ConnectionStatus::Expired
                )
            })
            .map(|it| it.remote)
            .collect();

        for remote in targets {
            self.send(PING, remote);
        }
    }

    /// Drop every connection whose remote is written off.
    pub fn purge(&self) {
        let now = Instant::now();
        self.connections.write().retain(|_, it| {
            ConnectionStatus::evaluate(now, it.sent_time(), it.received_time())
                != ConnectionStatus::Error
        });
    }

    /// Stop the receive worker. The socket itself is released when the hub
    /// drops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn accept(&self, data: &[u8], source: SocketAddr) {
        let transition = {
            let mut lock = self.connections.write();
            lock.get_mut(&source)
                .and_then(|it| it.touch_received(Instant::now()))
        };

        self.notify_transition(source, transition);

        // Heartbeats are answered here and never surface to the embedder.
        if data == PING {
            self.send(PONG, source);
            return;
        }

        if data == PONG {
            return;
        }

        {
            let mut cache = self.cache.lock();
            if cache.len() >= self.cache_limit {
                cache.pop_front();
            }

            cache.push_back(Datagram {
                payload: Bytes::copy_from_slice(data),
                source,
                destination: self.local,
            });
        }

        if let Some(handler) = self.handler() {
            handler.on_connection_received_data(source);
        }
    }

    // Observe transitions caused purely by time passing.
    fn sweep(&self, now: Instant) {
        let transitions: Vec<(SocketAddr, (ConnectionStatus, ConnectionStatus))> = {
            let mut lock = self.connections.write();
            lock.iter_mut()
                .filter_map(|(addr, it)| it.refresh(now).map(|transition| (*addr, transition)))
                .collect()
        };

        for (remote, transition) in transitions {
            self.notify_transition(remote, Some(transition));
        }
    }

    fn notify_transition(
        &self,
        remote: SocketAddr,
        transition: Option<(ConnectionStatus, ConnectionStatus)>,
    ) {
        let Some((old, new)) = transition else {
            return;
        };

        log::trace!(
            "connection status changed: addr={:?}, {:?} -> {:?}",
            remote,
            old,
            new
        );

        if let Some(handler) = self.handler() {
            handler.on_connection_status_changed(remote, old, new);
        }
    }

    fn handler(&self) -> Option<Arc<dyn HubHandler>> {
        self.handler.read().as_ref()?.upgrade()
    }
}
