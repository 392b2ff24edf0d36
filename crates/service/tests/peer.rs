use std::{
    net::SocketAddr,
    sync::{
        Arc, Weak,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use bytes::Bytes;
use codec::mtp::{Kind, Package};
use dim_node_service::{
    PeerHandler,
    hub::Datagram,
    peer::{Peer, PeerOptions},
    pool::MemoryPool,
};
use parking_lot::Mutex;

/// A transport that delivers datagrams straight into the remote peer's
/// arrival queue, with an optional budget of silently dropped sends.
struct Wire {
    address: SocketAddr,
    remote: Mutex<Option<Weak<Peer>>>,
    drop_next: AtomicUsize,
    sent: AtomicUsize,
    commands: Mutex<Vec<Bytes>>,
    messages: Mutex<Vec<Bytes>>,
    command_success: Mutex<Vec<u32>>,
    command_timeout: Mutex<Vec<u32>>,
    message_success: Mutex<Vec<u32>>,
    message_timeout: Mutex<Vec<u32>>,
    recycled: Mutex<Vec<usize>>,
}

impl Wire {
    fn new(port: u16) -> Arc<Self> {
        Arc::new(Self {
            address: format!("127.0.0.1:{}", port).parse().unwrap(),
            remote: Mutex::new(None),
            drop_next: AtomicUsize::new(0),
            sent: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            command_success: Mutex::new(Vec::new()),
            command_timeout: Mutex::new(Vec::new()),
            message_success: Mutex::new(Vec::new()),
            message_timeout: Mutex::new(Vec::new()),
            recycled: Mutex::new(Vec::new()),
        })
    }
}

impl PeerHandler for Wire {
    fn send_data(&self, data: &[u8], destination: SocketAddr, _source: SocketAddr) -> isize {
        self.sent.fetch_add(1, Ordering::Relaxed);

        if self
            .drop_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |it| it.checked_sub(1))
            .is_ok()
        {
            return data.len() as isize;
        }

        if let Some(remote) = self.remote.lock().as_ref().and_then(|it| it.upgrade()) {
            remote.append_arrival(Datagram {
                payload: Bytes::copy_from_slice(data),
                source: self.address,
                destination,
            });
        }

        data.len() as isize
    }

    fn on_received_command(&self, body: &Bytes, _: SocketAddr, _: SocketAddr) -> bool {
        self.commands.lock().push(body.clone());
        true
    }

    fn on_received_message(&self, body: &Bytes, _: SocketAddr, _: SocketAddr) -> bool {
        self.messages.lock().push(body.clone());
        true
    }

    fn on_send_command_success(&self, sn: u32, _: SocketAddr, _: SocketAddr) {
        self.command_success.lock().push(sn);
    }

    fn on_send_command_timeout(&self, sn: u32, _: SocketAddr, _: SocketAddr) {
        self.command_timeout.lock().push(sn);
    }

    fn on_send_message_success(&self, sn: u32, _: SocketAddr, _: SocketAddr) {
        self.message_success.lock().push(sn);
    }

    fn on_send_message_timeout(&self, sn: u32, _: SocketAddr, _: SocketAddr) {
        self.message_timeout.lock().push(sn);
    }

    fn recycle_fragments(&self, fragments: &[Package], _: SocketAddr, _: SocketAddr) {
        self.recycled.lock().push(fragments.len());
    }
}

struct Endpoint {
    peer: Arc<Peer>,
    wire: Arc<Wire>,
}

fn endpoint(port: u16, options: PeerOptions) -> Endpoint {
    let wire = Wire::new(port);
    let peer = Peer::new(options, Arc::new(MemoryPool::default()));
    peer.set_handler(Arc::downgrade(&wire) as Weak<dyn PeerHandler>);
    Endpoint { peer, wire }
}

fn link(a: &Endpoint, b: &Endpoint) {
    *a.wire.remote.lock() = Some(Arc::downgrade(&b.peer));
    *b.wire.remote.lock() = Some(Arc::downgrade(&a.peer));
}

fn wait_for(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }

        thread::sleep(Duration::from_millis(10));
    }

    predicate()
}

// Short enough to retry within a test, long enough that a respond always
// lands before the next retry fires.
fn quick_options() -> PeerOptions {
    PeerOptions {
        retry_interval: Duration::from_millis(300),
        max_retries: 3,
        assemble_timeout: Duration::from_secs(120),
    }
}

#[test]
fn test_empty_command_still_elicits_a_respond() {
    let a = endpoint(9001, PeerOptions::default());
    let b = endpoint(9002, PeerOptions::default());
    link(&a, &b);

    let sn = a.peer.send_command(Bytes::new(), b.wire.address, a.wire.address);

    assert!(wait_for(
        || a.wire.command_success.lock().as_slice() == [sn],
        Duration::from_secs(3)
    ));

    let commands = b.wire.commands.lock();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].is_empty());
}

#[test]
fn test_fragmented_message_is_delivered_once() {
    let a = endpoint(9003, PeerOptions::default());
    let b = endpoint(9004, PeerOptions::default());
    link(&a, &b);

    let body: Vec<u8> = (0..1500u32).map(|it| it as u8).collect();
    let sn = a.peer.send_message(Bytes::from(body.clone()), b.wire.address, a.wire.address);

    assert!(wait_for(
        || a.wire.message_success.lock().as_slice() == [sn],
        Duration::from_secs(3)
    ));

    let messages = b.wire.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].as_ref(), body.as_slice());
}

#[test]
fn test_small_message_is_not_fragmented() {
    let a = endpoint(9005, PeerOptions::default());
    let b = endpoint(9006, PeerOptions::default());
    link(&a, &b);

    // Exactly the body cap: one datagram on the wire.
    let sn = a.peer.send_message(Bytes::from(vec![7u8; 512]), b.wire.address, a.wire.address);

    assert!(wait_for(
        || a.wire.message_success.lock().as_slice() == [sn],
        Duration::from_secs(3)
    ));

    // One message out; everything else the endpoint sent is responds.
    assert_eq!(a.wire.sent.load(Ordering::Relaxed), 1);
    assert_eq!(b.wire.messages.lock().len(), 1);
}

#[test]
fn test_lost_datagram_is_retransmitted() {
    let a = endpoint(9007, quick_options());
    let b = endpoint(9008, quick_options());
    link(&a, &b);

    // The first transmission vanishes on the wire.
    a.wire.drop_next.store(1, Ordering::Relaxed);
    let sn = a.peer.send_command(Bytes::from_static(b"again"), b.wire.address, a.wire.address);

    assert!(wait_for(
        || a.wire.command_success.lock().as_slice() == [sn],
        Duration::from_secs(3)
    ));

    // Exactly one success, exactly one delivery.
    thread::sleep(Duration::from_millis(300));
    assert_eq!(a.wire.command_success.lock().as_slice(), [sn]);
    assert_eq!(b.wire.commands.lock().len(), 1);
}

#[test]
fn test_exhausted_retries_fire_the_timeout_once() {
    // Nobody on the other side.
    let a = endpoint(9009, quick_options());

    let sn = a.peer.send_command(Bytes::from_static(b"void"), "127.0.0.1:9010".parse().unwrap(), a.wire.address);

    assert!(wait_for(
        || a.wire.command_timeout.lock().as_slice() == [sn],
        Duration::from_secs(3)
    ));

    // The initial transmission plus every retry went out; no success ever
    // fired.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(a.wire.sent.load(Ordering::Relaxed), 4);
    assert_eq!(a.wire.command_timeout.lock().as_slice(), [sn]);
    assert!(a.wire.command_success.lock().is_empty());
}

#[test]
fn test_duplicate_fragment_does_not_redeliver() {
    let a = endpoint(9011, PeerOptions::default());
    let b = endpoint(9012, PeerOptions::default());
    link(&a, &b);

    let message = Package::create(Kind::Message, Some(77), Bytes::from(vec![3u8; 1100]));
    let fragments = message.split();

    let inject = |fragment: &Package| {
        b.peer.append_arrival(Datagram {
            payload: fragment.to_bytes(),
            source: a.wire.address,
            destination: b.wire.address,
        });
    };

    inject(&fragments[0]);
    inject(&fragments[0]);
    inject(&fragments[1]);
    inject(&fragments[2]);

    assert!(wait_for(
        || !b.wire.messages.lock().is_empty(),
        Duration::from_secs(3)
    ));

    thread::sleep(Duration::from_millis(300));
    assert_eq!(b.wire.messages.lock().len(), 1);

    // Every fragment was acknowledged, the duplicate included.
    assert_eq!(b.wire.sent.load(Ordering::Relaxed), 4);
}

#[test]
fn test_stale_fragments_are_recycled() {
    let a = endpoint(9013, PeerOptions::default());
    let b = endpoint(
        9014,
        PeerOptions {
            assemble_timeout: Duration::from_millis(200),
            ..PeerOptions::default()
        },
    );
    link(&a, &b);

    let message = Package::create(Kind::Message, Some(78), Bytes::from(vec![4u8; 1100]));
    let fragments = message.split();

    // Only one of three pages ever arrives.
    b.peer.append_arrival(Datagram {
        payload: fragments[0].to_bytes(),
        source: a.wire.address,
        destination: b.wire.address,
    });

    assert!(wait_for(
        || b.wire.recycled.lock().as_slice() == [1],
        Duration::from_secs(3)
    ));

    assert!(b.wire.messages.lock().is_empty());
}

#[test]
fn test_stopping_drops_departures_without_timeouts() {
    let a = endpoint(9015, quick_options());

    a.peer.send_command(Bytes::from_static(b"late"), "127.0.0.1:9016".parse().unwrap(), a.wire.address);
    a.peer.stop();

    // Sleep past the whole retry horizon: the timeout would have fired by
    // now had the loop kept running.
    thread::sleep(Duration::from_millis(1700));
    assert!(a.wire.command_timeout.lock().is_empty());
    assert!(!a.peer.is_running());
}
