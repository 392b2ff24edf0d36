use std::{
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use dim_node_service::{
    HubHandler,
    connection::ConnectionStatus,
    hub::{Hub, HubOptions, PING, PONG},
};
use parking_lot::Mutex;

#[derive(Default)]
struct Recorder {
    transitions: Mutex<Vec<(SocketAddr, ConnectionStatus, ConnectionStatus)>>,
    received_from: Mutex<Vec<SocketAddr>>,
}

impl HubHandler for Recorder {
    fn on_connection_status_changed(
        &self,
        remote: SocketAddr,
        old: ConnectionStatus,
        new: ConnectionStatus,
    ) {
        self.transitions.lock().push((remote, old, new));
    }

    fn on_connection_received_data(&self, remote: SocketAddr) {
        self.received_from.lock().push(remote);
    }
}

fn local_hub(options: HubOptions) -> (Arc<Hub>, Arc<Recorder>) {
    let hub = Hub::new(HubOptions {
        bind: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
        ..options
    })
    .unwrap();

    let recorder = Arc::new(Recorder::default());
    hub.set_handler(Arc::downgrade(&recorder) as Weak<dyn HubHandler>);
    (hub, recorder)
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

#[test]
fn test_send_and_receive_track_the_connection() {
    let (a, a_recorder) = local_hub(HubOptions::default());
    let (b, b_recorder) = local_hub(HubOptions::default());

    a.connect(b.local_addr());
    b.connect(a.local_addr());

    assert_eq!(a.status_of(b.local_addr()), Some(ConnectionStatus::Default));

    // A dials B.
    assert!(a.send(b"hello", b.local_addr()) > 0);
    assert_eq!(a.status_of(b.local_addr()), Some(ConnectionStatus::Connecting));

    assert!(wait_for(|| b.cached() == 1, Duration::from_secs(2)));
    let datagram = b.receive().unwrap();
    assert_eq!(datagram.payload.as_ref(), b"hello");
    assert_eq!(datagram.source, a.local_addr());
    assert_eq!(datagram.destination, b.local_addr());
    assert_eq!(b_recorder.received_from.lock().as_slice(), [a.local_addr()]);

    // B answers; both ends see a two-way link.
    assert!(b.send(b"hi there", a.local_addr()) > 0);
    assert!(wait_for(|| a.cached() == 1, Duration::from_secs(2)));

    assert_eq!(a.status_of(b.local_addr()), Some(ConnectionStatus::Connected));
    assert_eq!(b.status_of(a.local_addr()), Some(ConnectionStatus::Connected));

    // Each transition was observed exactly once, in order.
    let transitions = a_recorder.transitions.lock();
    let observed: Vec<(ConnectionStatus, ConnectionStatus)> = transitions
        .iter()
        .map(|(_, old, new)| (*old, *new))
        .collect();

    assert_eq!(
        observed,
        vec![
            (ConnectionStatus::Default, ConnectionStatus::Connecting),
            (ConnectionStatus::Connecting, ConnectionStatus::Connected),
        ]
    );
}

#[test]
fn test_heartbeats_never_reach_the_cache() {
    let (hub, recorder) = local_hub(HubOptions::default());

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    probe
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // A ping comes back as a pong and is swallowed.
    probe.send_to(PING, hub.local_addr()).unwrap();

    let mut buf = [0u8; 64];
    let (size, from) = probe.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..size], PONG);
    assert_eq!(from, hub.local_addr());

    // A stray pong is discarded outright.
    probe.send_to(PONG, hub.local_addr()).unwrap();

    thread::sleep(Duration::from_millis(200));
    assert_eq!(hub.cached(), 0);
    assert!(recorder.received_from.lock().is_empty());
}

#[test]
fn test_cache_drops_oldest_beyond_the_limit() {
    let (hub, _recorder) = local_hub(HubOptions {
        cache_limit: 4,
        ..HubOptions::default()
    });

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    for index in 0..6u8 {
        probe.send_to(&[index], hub.local_addr()).unwrap();
        // Give the receive worker room; datagram order matters here.
        thread::sleep(Duration::from_millis(20));
    }

    assert!(wait_for(|| hub.cached() == 4, Duration::from_secs(2)));

    let mut payloads = Vec::new();
    while let Some(datagram) = hub.receive() {
        payloads.push(datagram.payload[0]);
    }

    // The two oldest were dropped.
    assert_eq!(payloads, vec![2, 3, 4, 5]);
}

#[test]
fn test_idle_connections_are_pinged() {
    let (hub, _recorder) = local_hub(HubOptions {
        ping_interval: Duration::from_millis(100),
        ..HubOptions::default()
    });

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    probe
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    // A connection that never exchanged traffic sits in Default and gets
    // heartbeated.
    hub.connect(probe.local_addr().unwrap());

    let mut buf = [0u8; 64];
    let (size, from) = probe.recv_from(&mut buf).unwrap();
    assert_eq!(&buf[..size], PING);
    assert_eq!(from, hub.local_addr());
}

#[test]
fn test_close_stops_the_receive_worker() {
    let (hub, recorder) = local_hub(HubOptions::default());
    let target = hub.local_addr();

    hub.close();
    thread::sleep(Duration::from_millis(100));

    let probe = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    probe.send_to(b"anyone home", target).unwrap();

    thread::sleep(Duration::from_millis(200));
    assert!(hub.is_closed());
    assert_eq!(hub.cached(), 0);
    assert!(recorder.received_from.lock().is_empty());
}

#[test]
fn test_disconnect_forgets_the_remote() {
    let (hub, _recorder) = local_hub(HubOptions::default());
    let remote: SocketAddr = "127.0.0.1:4000".parse().unwrap();

    hub.connect(remote);
    assert_eq!(hub.connections(), vec![remote]);

    hub.disconnect(remote);
    assert!(hub.connections().is_empty());
    assert_eq!(hub.status_of(remote), None);
}
