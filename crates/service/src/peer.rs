use crate::{
    PeerHandler,
    hub::Datagram,
    pool::{Departure, Pool},
};

use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use codec::mtp::{self, Kind, MAX_BODY_SIZE, Package};
use parking_lot::RwLock;

/// Sleep of the dispatch loop when a pass moved nothing.
pub const IDLE_SLEEP: Duration = Duration::from_millis(100);

pub struct PeerOptions {
    /// Gap between transmission attempts of one departure.
    pub retry_interval: Duration,
    /// Retries after the initial transmission before the timeout fires.
    pub max_retries: u8,
    /// How long an incomplete reassembly slot may wait for its missing
    /// pages.
    pub assemble_timeout: Duration,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(2),
            max_retries: 5,
            assemble_timeout: Duration::from_secs(120),
        }
    }
}

/// The reliability engine: one dispatch loop draining arrivals,
/// retransmitting expired departures and expiring stale reassembly slots.
///
/// The loop holds a weak reference to the peer and checks a running flag
/// each pass, so dropping the last `Arc<Peer>` or calling [`Peer::stop`]
/// shuts it down; departures in flight are dropped without timeout
/// callbacks.
pub struct Peer {
    pool: Arc<dyn Pool>,
    handler: RwLock<Option<Weak<dyn PeerHandler>>>,
    options: PeerOptions,
    running: AtomicBool,
}

impl Peer {
    pub fn new(options: PeerOptions, pool: Arc<dyn Pool>) -> Arc<Self> {
        let this = Arc::new(Self {
            handler: RwLock::new(None),
            running: AtomicBool::new(true),
            options,
            pool,
        });

        let this_ = Arc::downgrade(&this);
        thread::spawn(move || {
            loop {
                let Some(this) = this_.upgrade() else {
                    break;
                };

                if !this.running.load(Ordering::Relaxed) {
                    break;
                }

                let Some(handler) = this.handler() else {
                    drop(this);
                    thread::sleep(IDLE_SLEEP);
                    continue;
                };

                let mut busy = false;

                // Drain the arrivals that were queued when the pass began;
                // later ones wait for the next pass so one noisy remote
                // cannot starve the retry timers.
                for _ in 0..this.pool.arrivals_len() {
                    let Some(arrival) = this.pool.shift_arrival() else {
                        break;
                    };

                    this.dispatch(handler.as_ref(), arrival);
                    busy = true;
                }

                // One expired departure per pass.
                let now = Instant::now();
                if let Some(departure) =
                    this.pool.shift_expired_departure(now, this.options.retry_interval)
                {
                    this.retry(handler.as_ref(), departure, now);
                    busy = true;
                } else {
                    for slot in this.pool.discard_fragments(now, this.options.assemble_timeout) {
                        log::trace!(
                            "reassembly slot expired: sn={}, addr={:?}",
                            slot.sn,
                            slot.source
                        );

                        handler.recycle_fragments(&slot.fragments(), slot.source, slot.destination);
                    }
                }

                if !busy {
                    drop(this);
                    thread::sleep(IDLE_SLEEP);
                }
            }
        });

        this
    }

    /// The observer is held weakly and may be replaced at any time.
    pub fn set_handler(&self, handler: Weak<dyn PeerHandler>) {
        *self.handler.write() = Some(handler);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Queue one received datagram for dispatch. Arrivals are handled in
    /// FIFO order of enqueue.
    pub fn append_arrival(&self, arrival: Datagram) {
        self.pool.append_arrival(arrival);
    }

    /// Send a command body, reliably. The initial transmission happens on
    /// the calling thread; the dispatch loop owns the retries. Returns the
    /// allocated sequence number.
    pub fn send_command(&self, body: Bytes, destination: SocketAddr, source: SocketAddr) -> u32 {
        let package = Package::create(Kind::Command, None, body);
        let sn = package.head.sn;
        self.launch(Kind::Command, sn, vec![package], destination, source);
        sn
    }

    /// Send a message body, reliably, splitting it when it exceeds the
    /// datagram cap.
    pub fn send_message(&self, body: Bytes, destination: SocketAddr, source: SocketAddr) -> u32 {
        let package = Package::create(Kind::Message, None, body);
        let sn = package.head.sn;

        let packages = if package.body.len() > MAX_BODY_SIZE {
            package.split()
        } else {
            vec![package]
        };

        self.launch(Kind::Message, sn, packages, destination, source);
        sn
    }

    fn launch(
        &self,
        kind: Kind,
        sn: u32,
        packages: Vec<Package>,
        destination: SocketAddr,
        source: SocketAddr,
    ) {
        if let Some(handler) = self.handler() {
            for package in &packages {
                handler.send_data(&package.to_bytes(), destination, source);
            }
        }

        self.pool.append_departure(Departure {
            sn,
            kind,
            destination,
            source,
            packages,
            last_attempt: Instant::now(),
            tries: self.options.max_retries,
        });
    }

    fn retry(&self, handler: &dyn PeerHandler, mut departure: Departure, now: Instant) {
        if departure.tries == 0 {
            log::trace!(
                "departure timed out: sn={}, addr={:?}",
                departure.sn,
                departure.destination
            );

            match departure.kind {
                Kind::Command => handler.on_send_command_timeout(
                    departure.sn,
                    departure.destination,
                    departure.source,
                ),
                _ => handler.on_send_message_timeout(
                    departure.sn,
                    departure.destination,
                    departure.source,
                ),
            }

            return;
        }

        for package in &departure.packages {
            handler.send_data(&package.to_bytes(), departure.destination, departure.source);
        }

        departure.tries -= 1;
        departure.last_attempt = now;
        self.pool.append_departure(departure);
    }

    fn dispatch(&self, handler: &dyn PeerHandler, arrival: Datagram) {
        let package = match Package::parse(&arrival.payload) {
            Ok(it) => it,
            Err(e) => {
                // Malformed datagrams never disturb peer state.
                log::trace!(
                    "dropped an unparseable datagram: addr={:?}, {:?}",
                    arrival.source,
                    e
                );

                return;
            }
        };

        let (source, destination) = (arrival.source, arrival.destination);
        match package.head.kind {
            Kind::CommandRespond | Kind::MessageRespond => {
                if let Some(departure) = self.pool.delete_departure(&package, source, destination) {
                    match departure.kind {
                        Kind::Command => handler.on_send_command_success(
                            departure.sn,
                            departure.destination,
                            departure.source,
                        ),
                        _ => handler.on_send_message_success(
                            departure.sn,
                            departure.destination,
                            departure.source,
                        ),
                    }
                }
            }
            Kind::Command => {
                if handler.on_received_command(&package.body, source, destination) {
                    self.respond(
                        handler,
                        Kind::CommandRespond,
                        package.head.sn,
                        Bytes::from_static(mtp::OK),
                        source,
                        destination,
                    );
                }
            }
            Kind::Message => {
                if handler.on_received_message(&package.body, source, destination) {
                    self.respond(
                        handler,
                        Kind::MessageRespond,
                        package.head.sn,
                        Bytes::from_static(mtp::OK),
                        source,
                        destination,
                    );
                }
            }
            Kind::MessageFragment => {
                let (sn, pages, offset) = (package.head.sn, package.head.pages, package.head.offset);

                if handler.check_fragment(&package, source, destination) {
                    if let Some(assembled) =
                        self.pool.insert_fragment(package, source, destination, Instant::now())
                    {
                        handler.on_received_message(&assembled.body, source, destination);
                    }
                }

                // Each fragment is acknowledged individually, accepted or
                // not, so the sender can retire it.
                self.respond(
                    handler,
                    Kind::MessageRespond,
                    sn,
                    mtp::fragment_respond_body(pages, offset),
                    source,
                    destination,
                );
            }
        }
    }

    // Responds are fire-and-forget: they are never tracked as departures.
    fn respond(
        &self,
        handler: &dyn PeerHandler,
        kind: Kind,
        sn: u32,
        body: Bytes,
        destination: SocketAddr,
        source: SocketAddr,
    ) {
        assert!(
            matches!(kind, Kind::CommandRespond | Kind::MessageRespond),
            "responding with an unsupported type"
        );

        let package = Package::create(kind, Some(sn), body);
        handler.send_data(&package.to_bytes(), destination, source);
    }

    fn handler(&self) -> Option<Arc<dyn PeerHandler>> {
        self.handler.read().as_ref()?.upgrade()
    }
}
