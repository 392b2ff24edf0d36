//! ## Message Transfer Protocol packets
//!
//! MTP is the reliability layer of the stack: every datagram is one packet
//! made of a fixed 24-byte header and an opaque body. The header carries a
//! sequence number for acknowledgement matching and the `pages`/`offset`
//! pair for fragmentation bookkeeping:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      'D'      |      'I'      |      'M'      |      0x00     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |     Type      |         Sequence Number
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!                 |             Pages
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!                 |             Offset
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!                 |          Body Length
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!                 |           Reserved            |  Body ...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! All integers are in network byte order. Bodies above
//! [`MAX_BODY_SIZE`] are split into `MessageFragment` packets sharing the
//! original sequence number; a complete datagram therefore never exceeds
//! 576 bytes and survives an unfragmented IPv4 path.

use crate::Error;

use std::sync::atomic::{AtomicU32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

pub const MAGIC: [u8; 4] = *b"DIM\0";
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: usize = 24;

/// Body cap for one datagram. 24 + 512 keeps the whole packet inside the
/// 576-byte minimum IPv4 reassembly buffer.
pub const MAX_BODY_SIZE: usize = 512;

/// The acknowledgement body of a respond packet.
pub const OK: &[u8] = b"OK";

static SEQUENCE: AtomicU32 = AtomicU32::new(1);

/// Allocate a fresh sequence number: monotonic, wrapping, never zero.
pub fn next_sn() -> u32 {
    loop {
        let sn = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        if sn != 0 {
            return sn;
        }
    }
}

/// packet type.
///
/// A respond packet carries the sequence number of the packet it
/// acknowledges. The numeric mapping is private to this stack but fixed
/// within a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Command,
    CommandRespond,
    Message,
    MessageRespond,
    MessageFragment,
}

impl Kind {
    /// The respond type matching a request type, if the type expects one.
    pub fn respond(&self) -> Option<Kind> {
        match self {
            Kind::Command => Some(Kind::CommandRespond),
            Kind::Message | Kind::MessageFragment => Some(Kind::MessageRespond),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    /// # Test
    ///
    /// ```
    /// use dim_node_codec::mtp::Kind;
    ///
    /// assert_eq!(Kind::try_from(1).unwrap(), Kind::Command);
    /// assert_eq!(Kind::try_from(2).unwrap(), Kind::CommandRespond);
    /// assert_eq!(Kind::try_from(3).unwrap(), Kind::Message);
    /// assert_eq!(Kind::try_from(4).unwrap(), Kind::MessageRespond);
    /// assert_eq!(Kind::try_from(5).unwrap(), Kind::MessageFragment);
    /// assert!(Kind::try_from(0).is_err());
    /// ```
    fn try_from(value: u8) -> Result<Self, Error> {
        Ok(match value {
            1 => Self::Command,
            2 => Self::CommandRespond,
            3 => Self::Message,
            4 => Self::MessageRespond,
            5 => Self::MessageFragment,
            _ => return Err(Error::UnknownPackageKind),
        })
    }
}

impl From<Kind> for u8 {
    fn from(value: Kind) -> Self {
        match value {
            Kind::Command => 1,
            Kind::CommandRespond => 2,
            Kind::Message => 3,
            Kind::MessageRespond => 4,
            Kind::MessageFragment => 5,
        }
    }
}

/// packet header.
///
/// `pages >= 1` and `offset < pages` always hold; a packet that is not a
/// fragment carries `pages = 1, offset = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: Kind,
    pub sn: u32,
    pub pages: u32,
    pub offset: u32,
    pub body_len: u32,
}

impl Header {
    pub fn new(kind: Kind, sn: u32, body_len: u32) -> Self {
        Self {
            kind,
            sn,
            pages: 1,
            offset: 0,
            body_len,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put(MAGIC.as_slice());
        buf.put_u8(VERSION);
        buf.put_u8(self.kind.into());
        buf.put_u32(self.sn);
        buf.put_u32(self.pages);
        buf.put_u32(self.offset);
        buf.put_u32(self.body_len);
        buf.put_u16(0);
    }
}

/// One MTP packet: header plus body. The body is a cheap slice view over
/// the datagram it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub head: Header,
    pub body: Bytes,
}

impl Package {
    /// Build a packet, allocating a fresh sequence number when the caller
    /// does not provide one.
    ///
    /// The body must fit one datagram; larger `Message` bodies go through
    /// [`Package::split`]. Feeding an oversized body for any other type is
    /// a programmer error.
    pub fn create(kind: Kind, sn: Option<u32>, body: Bytes) -> Self {
        assert!(
            body.len() <= MAX_BODY_SIZE || kind == Kind::Message,
            "oversized body for a non-message packet"
        );

        Self {
            head: Header::new(kind, sn.unwrap_or_else(next_sn), body.len() as u32),
            body,
        }
    }

    /// try decoder bytes as packet.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use dim_node_codec::mtp::*;
    ///
    /// let pack = Package::create(Kind::Command, Some(42), Bytes::from_static(b"hello"));
    /// let bytes = pack.to_bytes();
    ///
    /// let parsed = Package::parse(&bytes).unwrap();
    /// assert_eq!(parsed.head, pack.head);
    /// assert_eq!(parsed.body.as_ref(), b"hello");
    /// ```
    pub fn parse(bytes: &Bytes) -> Result<Self, Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::InvalidInput);
        }

        if bytes[0..4] != MAGIC {
            return Err(Error::NotFoundMagicNumber);
        }

        if bytes[4] != VERSION {
            return Err(Error::UnknownVersion);
        }

        let kind = Kind::try_from(bytes[5])?;
        let sn = crate::tlv::as_u32(&bytes[6..10]);
        let pages = crate::tlv::as_u32(&bytes[10..14]);
        let offset = crate::tlv::as_u32(&bytes[14..18]);
        let body_len = crate::tlv::as_u32(&bytes[18..22]);

        if pages == 0 || offset >= pages {
            return Err(Error::InvalidInput);
        }

        if bytes.len() < HEADER_SIZE + body_len as usize {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            head: Header {
                kind,
                sn,
                pages,
                offset,
                body_len,
            },
            body: bytes.slice(HEADER_SIZE..HEADER_SIZE + body_len as usize),
        })
    }

    /// Serialize the packet into one datagram buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.head.encode(&mut buf);
        buf.put(self.body.as_ref());
        buf.freeze()
    }

    pub fn is_fragment(&self) -> bool {
        self.head.kind == Kind::MessageFragment
    }

    /// Partition a message body into fragments sharing this packet's
    /// sequence number.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use dim_node_codec::mtp::*;
    ///
    /// let body = Bytes::from(vec![0u8; 1500]);
    /// let pack = Package::create(Kind::Message, Some(7), body);
    /// let fragments = pack.split();
    ///
    /// assert_eq!(fragments.len(), 3);
    /// for (i, fragment) in fragments.iter().enumerate() {
    ///     assert_eq!(fragment.head.kind, Kind::MessageFragment);
    ///     assert_eq!(fragment.head.sn, 7);
    ///     assert_eq!(fragment.head.pages, 3);
    ///     assert_eq!(fragment.head.offset, i as u32);
    /// }
    /// ```
    pub fn split(&self) -> Vec<Package> {
        // Splitting anything but a message is an invariant violation, not a
        // peer fault.
        assert_eq!(self.head.kind, Kind::Message, "only messages fragment");

        let pages = self.body.len().div_ceil(MAX_BODY_SIZE);
        let mut packages = Vec::with_capacity(pages);

        for index in 0..pages {
            let start = index * MAX_BODY_SIZE;
            let end = (start + MAX_BODY_SIZE).min(self.body.len());
            let body = self.body.slice(start..end);

            packages.push(Package {
                head: Header {
                    kind: Kind::MessageFragment,
                    sn: self.head.sn,
                    pages: pages as u32,
                    offset: index as u32,
                    body_len: body.len() as u32,
                },
                body,
            });
        }

        packages
    }

    /// Rebuild a message from all of its fragments, in any arrival order.
    ///
    /// Returns `None` unless the input is exactly one fragment per offset
    /// of one sequence number.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::Bytes;
    /// use dim_node_codec::mtp::*;
    ///
    /// let body: Vec<u8> = (0..1200).map(|it| it as u8).collect();
    /// let pack = Package::create(Kind::Message, Some(9), Bytes::from(body.clone()));
    ///
    /// let mut fragments = pack.split();
    /// fragments.reverse();
    ///
    /// let assembled = Package::assemble(&fragments).unwrap();
    /// assert_eq!(assembled.head.kind, Kind::Message);
    /// assert_eq!(assembled.head.sn, 9);
    /// assert_eq!(assembled.head.pages, 1);
    /// assert_eq!(assembled.body.as_ref(), body.as_slice());
    /// ```
    pub fn assemble(fragments: &[Package]) -> Option<Package> {
        let first = fragments.first()?;
        let pages = first.head.pages as usize;
        if fragments.len() != pages {
            return None;
        }

        let mut ordered: Vec<Option<&Package>> = vec![None; pages];
        for fragment in fragments {
            if fragment.head.sn != first.head.sn
                || fragment.head.pages != first.head.pages
                || fragment.head.kind != Kind::MessageFragment
            {
                return None;
            }

            let offset = fragment.head.offset as usize;
            if offset >= pages || ordered[offset].is_some() {
                return None;
            }

            ordered[offset] = Some(fragment);
        }

        let mut body = BytesMut::with_capacity(pages * MAX_BODY_SIZE);
        for fragment in ordered.into_iter().flatten() {
            body.put(fragment.body.as_ref());
        }

        let body = body.freeze();
        Some(Package {
            head: Header::new(Kind::Message, first.head.sn, body.len() as u32),
            body,
        })
    }
}

/// The respond body acknowledging one fragment: `pages ‖ offset ‖ "OK"`,
/// so the sender can retire that individual fragment from its departure.
///
/// # Test
///
/// ```
/// use dim_node_codec::mtp::*;
///
/// let body = fragment_respond_body(3, 1);
/// assert_eq!(parse_fragment_respond(&body), Some((3, 1)));
/// assert_eq!(parse_fragment_respond(b"OK"), None);
/// ```
pub fn fragment_respond_body(pages: u32, offset: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(10);
    buf.put_u32(pages);
    buf.put_u32(offset);
    buf.put(OK);
    buf.freeze()
}

pub fn parse_fragment_respond(body: &[u8]) -> Option<(u32, u32)> {
    if body.len() < 10 || &body[8..10] != OK {
        return None;
    }

    Some((crate::tlv::as_u32(&body[0..4]), crate::tlv::as_u32(&body[4..8])))
}
