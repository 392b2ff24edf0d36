//! ## Direct Message Transfer Protocol fields
//!
//! DMTP rides inside MTP bodies as a sequence of byte-family
//! tag-length-value fields. Two frame shapes exist:
//!
//! - **Commands** (MTP type `Command`) carry exactly one top-level field
//!   whose tag names the command (`HI`, `SIGN`, `CALL`, `FROM`, `BYE`) and
//!   whose value nests the command's own field list.
//! - **Messages** (MTP type `Message`) carry a flat field list with sender,
//!   receiver, timestamp and content.
//!
//! Address fields use the same 8/20-byte MAPPED-ADDRESS shape as STUN,
//! without the XOR obfuscation. Timestamps are 4-byte big-endian seconds
//! since the Unix epoch. The numeric tag codes are private to this stack
//! but fixed within a deployment. A single field value never exceeds 255
//! bytes because of the 1-byte length; content and attachments span
//! repeated fields, concatenated in order on decode.

use crate::{
    Error,
    stun::attributes::Addr,
    tlv::{ByteLayout, TlvParser, as_u32, encode},
};

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use num_enum::TryFromPrimitive;

/// field tag.
#[repr(u8)]
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Identifier = 0x01,
    SourceAddress = 0x02,
    MappedAddress = 0x03,
    RelayedAddress = 0x04,
    Time = 0x05,
    Signature = 0x06,
    NatType = 0x07,

    Sender = 0x11,
    Receiver = 0x12,
    Content = 0x13,
    Attachment = 0x14,
    Key = 0x15,

    Hi = 0x21,
    Sign = 0x22,
    Call = 0x23,
    From = 0x24,
    Bye = 0x25,
}

/// A parsed field list: a zero-copy view over one frame.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use dim_node_codec::dmtp::*;
///
/// let mut buf = BytesMut::new();
/// put_str(FieldKind::Identifier, "alice", &mut buf);
/// put_time(1700000000, &mut buf);
///
/// let (fields, residual) = Fields::parse(&buf[..]);
/// assert_eq!(residual, 0);
/// assert_eq!(fields.get_str(FieldKind::Identifier), Some("alice"));
/// assert_eq!(fields.get_time(), Some(1700000000));
/// ```
pub struct Fields<'a>(Vec<(u8, &'a [u8])>);

impl<'a> Fields<'a> {
    /// Parse a frame, returning the well-formed prefix and the residual
    /// byte count. Unknown tags are kept; a truncated trailing field stops
    /// the parse without failing it.
    pub fn parse(bytes: &'a [u8]) -> (Self, usize) {
        let mut parser = TlvParser::<ByteLayout>::new(bytes);
        let fields = parser.by_ref().map(|it| (it.tag as u8, it.value)).collect();
        (Self(fields), parser.residual())
    }

    pub fn get(&self, kind: FieldKind) -> Option<&'a [u8]> {
        self.0
            .iter()
            .find(|(tag, _)| *tag == kind as u8)
            .map(|(_, value)| *value)
    }

    pub fn get_all(&self, kind: FieldKind) -> impl Iterator<Item = &'a [u8]> {
        self.0
            .iter()
            .filter(move |(tag, _)| *tag == kind as u8)
            .map(|(_, value)| *value)
    }

    pub fn get_str(&self, kind: FieldKind) -> Option<&'a str> {
        std::str::from_utf8(self.get(kind)?).ok()
    }

    pub fn get_addr(&self, kind: FieldKind) -> Option<SocketAddr> {
        Addr::try_from(self.get(kind)?, &[], false).ok()
    }

    pub fn get_time(&self) -> Option<u32> {
        let value = self.get(FieldKind::Time)?;
        if value.len() < 4 {
            return None;
        }

        Some(as_u32(value))
    }
}

pub fn put(kind: FieldKind, value: &[u8], buf: &mut BytesMut) {
    encode::<ByteLayout>(kind as u16, value, buf);
}

pub fn put_str(kind: FieldKind, value: &str, buf: &mut BytesMut) {
    put(kind, value.as_bytes(), buf);
}

pub fn put_addr(kind: FieldKind, value: &SocketAddr, buf: &mut BytesMut) {
    let mut bytes = BytesMut::with_capacity(20);
    Addr::into(value, &[], &mut bytes, false);
    put(kind, &bytes[..], buf);
}

pub fn put_time(value: u32, buf: &mut BytesMut) {
    put(FieldKind::Time, &value.to_be_bytes(), buf);
}

/// A signed statement about where an identifier can currently be reached.
///
/// `source` is the address the peer sees on its own socket, `mapped` the
/// reflexive address a STUN binding reported, `relayed` the TURN-allocated
/// fallback. Only the identifier is mandatory on the wire; storage imposes
/// its own stricter rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub identifier: String,
    pub source: Option<SocketAddr>,
    pub mapped: Option<SocketAddr>,
    pub relayed: Option<SocketAddr>,
    pub timestamp: u32,
    pub signature: Option<Bytes>,
    pub nat: Option<String>,
}

impl Location {
    pub fn new(identifier: &str, timestamp: u32) -> Self {
        Self {
            identifier: identifier.to_string(),
            source: None,
            mapped: None,
            relayed: None,
            timestamp,
            signature: None,
            nat: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        put_str(FieldKind::Identifier, &self.identifier, buf);

        if let Some(it) = &self.source {
            put_addr(FieldKind::SourceAddress, it, buf);
        }

        if let Some(it) = &self.mapped {
            put_addr(FieldKind::MappedAddress, it, buf);
        }

        if let Some(it) = &self.relayed {
            put_addr(FieldKind::RelayedAddress, it, buf);
        }

        put_time(self.timestamp, buf);

        if let Some(it) = &self.signature {
            put(FieldKind::Signature, it, buf);
        }

        if let Some(it) = &self.nat {
            put_str(FieldKind::NatType, it, buf);
        }
    }

    pub fn decode(fields: &Fields) -> Result<Self, Error> {
        Ok(Self {
            identifier: fields
                .get_str(FieldKind::Identifier)
                .ok_or(Error::MissingField)?
                .to_string(),
            source: fields.get_addr(FieldKind::SourceAddress),
            mapped: fields.get_addr(FieldKind::MappedAddress),
            relayed: fields.get_addr(FieldKind::RelayedAddress),
            timestamp: fields.get_time().unwrap_or(0),
            signature: fields
                .get(FieldKind::Signature)
                .map(|it| Bytes::copy_from_slice(it)),
            nat: fields.get_str(FieldKind::NatType).map(|it| it.to_string()),
        })
    }

    /// The canonical byte layout a signature covers:
    /// `source ‖ mapped ‖ relayed ‖ timestamp`, each address in
    /// MAPPED-ADDRESS shape, absent fields skipped, the timestamp 4-byte
    /// big-endian.
    ///
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::dmtp::Location;
    ///
    /// let mut a = Location::new("alice", 1700000000);
    /// a.mapped = Some("203.0.113.7:4444".parse().unwrap());
    ///
    /// let mut b = a.clone();
    /// b.signature = Some(vec![1, 2, 3].into());
    ///
    /// // The signature itself is not part of the signed bytes.
    /// assert_eq!(a.signable_bytes(), b.signable_bytes());
    /// ```
    pub fn signable_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);

        for addr in [&self.source, &self.mapped, &self.relayed].into_iter().flatten() {
            Addr::into(addr, &[], &mut buf, false);
        }

        buf.put_u32(self.timestamp);
        buf.freeze()
    }
}

/// A DMTP command frame.
///
/// `HI` announces (or, signed, proves) a login; `SIGN` is the server's
/// challenge carrying the mapped address the client must sign; `CALL` asks
/// the server for a peer's locations and `FROM` delivers them; `BYE`
/// retracts a stored location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Hi(Location),
    Sign(Location),
    Call { identifier: String },
    From(Location),
    Bye(Location),
}

impl Command {
    pub fn kind(&self) -> FieldKind {
        match self {
            Command::Hi(_) => FieldKind::Hi,
            Command::Sign(_) => FieldKind::Sign,
            Command::Call { .. } => FieldKind::Call,
            Command::From(_) => FieldKind::From,
            Command::Bye(_) => FieldKind::Bye,
        }
    }

    /// Encode the command as one MTP command body.
    ///
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::dmtp::*;
    ///
    /// let mut location = Location::new("alice", 1700000000);
    /// location.mapped = Some("203.0.113.7:4444".parse().unwrap());
    ///
    /// let body = Command::Hi(location.clone()).encode();
    /// match Command::decode(&body).unwrap() {
    ///     Command::Hi(it) => assert_eq!(it, location),
    ///     _ => panic!("expected a HI command"),
    /// }
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut nested = BytesMut::with_capacity(128);
        match self {
            Command::Hi(it) | Command::Sign(it) | Command::From(it) | Command::Bye(it) => {
                it.encode(&mut nested)
            }
            Command::Call { identifier } => {
                put_str(FieldKind::Identifier, identifier, &mut nested)
            }
        }

        let mut buf = BytesMut::with_capacity(nested.len() + 2);
        put(self.kind(), &nested[..], &mut buf);
        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let (fields, _) = Fields::parse(body);

        for kind in [
            FieldKind::Hi,
            FieldKind::Sign,
            FieldKind::Call,
            FieldKind::From,
            FieldKind::Bye,
        ] {
            let Some(nested) = fields.get(kind) else {
                continue;
            };

            let (fields, _) = Fields::parse(nested);
            return Ok(match kind {
                FieldKind::Hi => Command::Hi(Location::decode(&fields)?),
                FieldKind::Sign => Command::Sign(Location::decode(&fields)?),
                FieldKind::From => Command::From(Location::decode(&fields)?),
                FieldKind::Bye => Command::Bye(Location::decode(&fields)?),
                _ => Command::Call {
                    identifier: fields
                        .get_str(FieldKind::Identifier)
                        .ok_or(Error::MissingField)?
                        .to_string(),
                },
            });
        }

        Err(Error::MissingField)
    }
}

/// A user message: the flat field list inside an MTP `Message` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub receiver: String,
    pub timestamp: u32,
    pub content: Bytes,
    pub signature: Option<Bytes>,
    pub key: Option<Bytes>,
    pub attachment: Option<Bytes>,
}

impl Envelope {
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::dmtp::Envelope;
    ///
    /// let envelope = Envelope {
    ///     sender: "alice".to_string(),
    ///     receiver: "bob".to_string(),
    ///     timestamp: 1700000000,
    ///     content: "hello bob".into(),
    ///     signature: None,
    ///     key: None,
    ///     attachment: None,
    /// };
    ///
    /// let body = envelope.encode();
    /// assert_eq!(Envelope::decode(&body).unwrap(), envelope);
    /// ```
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128 + self.content.len());
        put_str(FieldKind::Sender, &self.sender, &mut buf);
        put_str(FieldKind::Receiver, &self.receiver, &mut buf);
        put_time(self.timestamp, &mut buf);

        // Content larger than one field's length byte spans repeated
        // fields.
        put_chunked(FieldKind::Content, &self.content, &mut buf);

        if let Some(it) = &self.signature {
            put(FieldKind::Signature, it, &mut buf);
        }

        if let Some(it) = &self.key {
            put(FieldKind::Key, it, &mut buf);
        }

        if let Some(it) = &self.attachment {
            put_chunked(FieldKind::Attachment, it, &mut buf);
        }

        buf.freeze()
    }

    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        let (fields, _) = Fields::parse(body);

        Ok(Self {
            sender: fields
                .get_str(FieldKind::Sender)
                .ok_or(Error::MissingField)?
                .to_string(),
            receiver: fields
                .get_str(FieldKind::Receiver)
                .ok_or(Error::MissingField)?
                .to_string(),
            timestamp: fields.get_time().unwrap_or(0),
            content: concat(fields.get_all(FieldKind::Content)).unwrap_or_default(),
            signature: fields
                .get(FieldKind::Signature)
                .map(Bytes::copy_from_slice),
            key: fields.get(FieldKind::Key).map(Bytes::copy_from_slice),
            attachment: concat(fields.get_all(FieldKind::Attachment)),
        })
    }
}

fn put_chunked(kind: FieldKind, value: &[u8], buf: &mut BytesMut) {
    if value.is_empty() {
        put(kind, value, buf);
        return;
    }

    for chunk in value.chunks(0xFF) {
        put(kind, chunk, buf);
    }
}

fn concat<'a>(chunks: impl Iterator<Item = &'a [u8]>) -> Option<Bytes> {
    let mut buf = BytesMut::new();
    let mut any = false;

    for chunk in chunks {
        buf.put(chunk);
        any = true;
    }

    any.then(|| buf.freeze())
}
