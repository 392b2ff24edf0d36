use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

/// A connection is considered active when traffic moved within this window.
pub const EXPIRES: Duration = Duration::from_secs(28);

/// After this long without inbound traffic a silent remote is written off.
pub const LONG_EXPIRES: Duration = Duration::from_secs(120);

/// Derived liveness label of a connection.
///
/// The status is a pure function of the clock and the two timestamps; the
/// same inputs always yield the same label. Transitions happen purely by
/// time passing, so the tracker re-evaluates on every timestamp update and
/// on a periodic sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Never sent, or the last send fell out of the activity window.
    Default,
    /// Sent recently, nothing ever received.
    Connecting,
    /// Traffic moved both ways recently.
    Connected,
    /// Still hearing from the remote, but nothing was sent recently.
    Maintaining,
    /// Sent recently, the remote has been silent past the window.
    Expired,
    /// The remote has been silent past the long window and nothing was
    /// sent recently either.
    Error,
}

impl ConnectionStatus {
    /// Evaluate the status for a given clock reading.
    ///
    /// # Test
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    /// use dim_node_service::connection::ConnectionStatus;
    ///
    /// let base = Instant::now();
    /// let at = |secs| base + Duration::from_secs(secs);
    ///
    /// // Sent at t=0, received at t=1.
    /// let sent = Some(at(0));
    /// let received = Some(at(1));
    ///
    /// assert_eq!(
    ///     ConnectionStatus::evaluate(at(0), sent, None),
    ///     ConnectionStatus::Connecting
    /// );
    /// assert_eq!(
    ///     ConnectionStatus::evaluate(at(2), sent, received),
    ///     ConnectionStatus::Connected
    /// );
    ///
    /// // Past the send window the received side still holds the link.
    /// assert_eq!(
    ///     ConnectionStatus::evaluate(at(29), sent, received),
    ///     ConnectionStatus::Maintaining
    /// );
    ///
    /// // Then both sides fall silent.
    /// assert_eq!(
    ///     ConnectionStatus::evaluate(at(31), sent, received),
    ///     ConnectionStatus::Default
    /// );
    ///
    /// // A remote silent past the long window is an error.
    /// assert_eq!(
    ///     ConnectionStatus::evaluate(at(130), sent, received),
    ///     ConnectionStatus::Error
    /// );
    /// ```
    pub fn evaluate(now: Instant, sent: Option<Instant>, received: Option<Instant>) -> Self {
        let sent_recently = sent.map(|it| now.duration_since(it) <= EXPIRES).unwrap_or(false);

        match (sent_recently, received) {
            (true, None) => Self::Connecting,
            (true, Some(it)) if now.duration_since(it) <= EXPIRES => Self::Connected,
            (true, Some(_)) => Self::Expired,
            (false, Some(it)) if now.duration_since(it) <= EXPIRES => Self::Maintaining,
            (false, Some(it)) if now.duration_since(it) > LONG_EXPIRES => Self::Error,
            (false, _) => Self::Default,
        }
    }
}

/// One tracked remote: the pair of addresses and the last time traffic
/// moved in each direction.
#[derive(Debug, Clone)]
pub struct Connection {
    pub remote: SocketAddr,
    pub local: SocketAddr,
    sent_time: Option<Instant>,
    received_time: Option<Instant>,
    status: ConnectionStatus,
}

impl Connection {
    pub fn new(remote: SocketAddr, local: SocketAddr) -> Self {
        Self {
            remote,
            local,
            sent_time: None,
            received_time: None,
            status: ConnectionStatus::Default,
        }
    }

    /// The last observed status label.
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn sent_time(&self) -> Option<Instant> {
        self.sent_time
    }

    pub fn received_time(&self) -> Option<Instant> {
        self.received_time
    }

    /// Record an outbound datagram, reporting the status transition it
    /// caused, if any.
    pub fn touch_sent(&mut self, now: Instant) -> Option<(ConnectionStatus, ConnectionStatus)> {
        self.sent_time = Some(now);
        self.refresh(now)
    }

    /// Record an inbound datagram.
    pub fn touch_received(&mut self, now: Instant) -> Option<(ConnectionStatus, ConnectionStatus)> {
        self.received_time = Some(now);
        self.refresh(now)
    }

    /// Re-evaluate against the clock without recording traffic. Transitions
    /// caused purely by time passing are observed here.
    pub fn refresh(&mut self, now: Instant) -> Option<(ConnectionStatus, ConnectionStatus)> {
        let status = ConnectionStatus::evaluate(now, self.sent_time, self.received_time);
        if status == self.status {
            return None;
        }

        let old = self.status;
        self.status = status;
        Some((old, status))
    }
}
