pub mod address;
mod error;

use crate::{Error as CodecError, tlv::as_u32};

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

pub use address::Addr;
pub use error::{Error as StunError, Kind as ErrKind};

/// attribute type.
///
/// The registry is populated once, at compile time, and never mutated:
/// lookups go through [`AttrKind::try_from`]. Codes in `0x0000-0x7FFF` are
/// comprehension-required, codes in `0x8000-0xFFFF` are
/// comprehension-optional; a code the registry does not carry decodes as a
/// raw value and never fails the message.
#[repr(u16)]
#[derive(TryFromPrimitive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrKind {
    MappedAddress = 0x0001,
    ResponseAddress = 0x0002,
    ChangeRequest = 0x0003,
    SourceAddress = 0x0004,
    ChangedAddress = 0x0005,
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    UnknownAttributes = 0x000A,
    ReflectedFrom = 0x000B,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    XorMappedAddress = 0x0020,
    XorMappedAddressAlt = 0x8020,
    Software = 0x8022,
    AlternateServer = 0x8023,
    Fingerprint = 0x8028,
}

impl AttrKind {
    /// Whether a receiver is required to understand the attribute to
    /// process the message.
    ///
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::attributes::*;
    ///
    /// assert!(is_comprehension_required(AttrKind::MappedAddress as u16));
    /// assert!(!is_comprehension_required(AttrKind::Software as u16));
    /// ```
    pub fn is_comprehension_required(&self) -> bool {
        is_comprehension_required(*self as u16)
    }
}

#[inline]
pub fn is_comprehension_required(code: u16) -> bool {
    code < 0x8000
}

/// dyn stun/turn message attribute.
pub trait Attribute<'a> {
    // current attribute inner type.
    type Item;

    /// current attribute type.
    const KIND: AttrKind;

    /// write the current attribute to the buffer.
    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]);

    /// convert buffer to current attribute.
    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError>;
}

/// The MAPPED-ADDRESS attribute indicates a reflexive transport address of
/// the client.  It consists of an 8-bit address family and a 16-bit port,
/// followed by a fixed-length value representing the IP address.
///
/// This attribute is used only by servers for achieving backwards
/// compatibility with RFC3489 clients.
pub struct MappedAddress;

impl<'a> Attribute<'a> for MappedAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::MappedAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The RESPONSE-ADDRESS attribute indicates where the response to a
/// Binding request should be sent (RFC3489 only).
pub struct ResponseAddress;

impl<'a> Attribute<'a> for ResponseAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::ResponseAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The CHANGE-REQUEST attribute is used by the client to request that the
/// server use a different address and/or port when sending the response,
/// which lets the client probe the NAT's filtering behavior.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 A B 0|
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// A is the "change IP" flag (bit 2) and B is the "change port" flag
/// (bit 1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeRequest {
    pub ip: bool,
    pub port: bool,
}

impl<'a> Attribute<'a> for ChangeRequest {
    type Item = ChangeRequest;

    const KIND: AttrKind = AttrKind::ChangeRequest;

    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use dim_node_codec::stun::attributes::*;
    ///
    /// let mut buf = BytesMut::new();
    /// let value = ChangeRequest { ip: true, port: false };
    ///
    /// ChangeRequest::serialize(value, &mut buf, &[]);
    /// assert_eq!(&buf[..], &[0x00, 0x00, 0x00, 0x04]);
    ///
    /// let decoded = ChangeRequest::deserialize(&buf[..], &[]).unwrap();
    /// assert_eq!(decoded, value);
    /// ```
    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        let mut flags = 0u32;
        if value.ip {
            flags |= 1 << 2;
        }

        if value.port {
            flags |= 1 << 1;
        }

        buf.put_u32(flags);
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::InvalidInput);
        }

        let flags = as_u32(buf);
        Ok(ChangeRequest {
            ip: flags & (1 << 2) != 0,
            port: flags & (1 << 1) != 0,
        })
    }
}

/// The SOURCE-ADDRESS attribute indicates the address the server sent the
/// response from (RFC3489 only).
pub struct SourceAddress;

impl<'a> Attribute<'a> for SourceAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::SourceAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The CHANGED-ADDRESS attribute names the alternate address the server
/// would use when honoring a CHANGE-REQUEST (RFC3489 only).
pub struct ChangedAddress;

impl<'a> Attribute<'a> for ChangedAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::ChangedAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The USERNAME attribute identifies the username and password combination
/// used in the message-integrity check.  Its value is a variable-length
/// UTF-8 encoded sequence.
pub struct UserName;

impl<'a> Attribute<'a> for UserName {
    type Item = &'a str;

    const KIND: AttrKind = AttrKind::UserName;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The MESSAGE-INTEGRITY attribute contains an HMAC-SHA1 of the STUN
/// message up to and including the attribute preceding it; since it uses
/// the SHA-1 hash, the HMAC is 20 bytes.  This stack carries the value as
/// opaque bytes; key management belongs to the embedder.
pub struct MessageIntegrity;

impl<'a> Attribute<'a> for MessageIntegrity {
    type Item = &'a [u8];

    const KIND: AttrKind = AttrKind::MessageIntegrity;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(buf)
    }
}

/// The ERROR-CODE attribute is used in error response messages.
pub struct ErrorCode;

impl<'a> Attribute<'a> for ErrorCode {
    type Item = StunError<'a>;

    const KIND: AttrKind = AttrKind::ErrorCode;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        value.into(buf)
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        StunError::try_from(buf)
    }
}

/// The UNKNOWN-ATTRIBUTES attribute is present only in an error response
/// with error code 420, and lists the comprehension-required codes the
/// server did not understand as a sequence of 16-bit values.
pub struct UnknownAttributes;

impl<'a> Attribute<'a> for UnknownAttributes {
    type Item = Vec<u16>;

    const KIND: AttrKind = AttrKind::UnknownAttributes;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        for code in value {
            buf.put_u16(code);
        }
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        if buf.len() % 2 != 0 {
            return Err(CodecError::InvalidInput);
        }

        Ok(buf
            .chunks_exact(2)
            .map(|it| u16::from_be_bytes([it[0], it[1]]))
            .collect())
    }
}

/// The REFLECTED-FROM attribute names the address the request came from,
/// as observed by the server (RFC3489 only).
pub struct ReflectedFrom;

impl<'a> Attribute<'a> for ReflectedFrom {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::ReflectedFrom;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The LIFETIME attribute represents the duration for which the server
/// will maintain an allocation in the absence of a refresh.  The value is
/// a 32-bit unsigned number of seconds remaining until expiration.
pub struct Lifetime;

impl<'a> Attribute<'a> for Lifetime {
    type Item = u32;

    const KIND: AttrKind = AttrKind::Lifetime;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value)
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::InvalidInput);
        }

        Ok(as_u32(buf))
    }
}

/// The XOR-PEER-ADDRESS specifies the address and port of the peer as seen
/// from the TURN server.  It is encoded in the same way as
/// XOR-MAPPED-ADDRESS.
pub struct XorPeerAddress;

impl<'a> Attribute<'a> for XorPeerAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::XorPeerAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, true)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, true)
    }
}

/// The DATA attribute is present in all Send and Data indications.  The
/// value portion of this attribute is variable length and consists of the
/// application data, the bytes that would immediately follow the UDP
/// header had the data been sent directly between the client and the
/// peer.
pub struct Data;

impl<'a> Attribute<'a> for Data {
    type Item = &'a [u8];

    const KIND: AttrKind = AttrKind::Data;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value);
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(buf)
    }
}

/// The REALM attribute contains the authentication realm, an unquoted
/// UTF-8 encoded realm-value.
pub struct Realm;

impl<'a> Attribute<'a> for Realm {
    type Item = &'a str;

    const KIND: AttrKind = AttrKind::Realm;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The NONCE attribute contains a server-chosen sequence of qdtext or
/// quoted-pair, fewer than 128 characters.
pub struct Nonce;

impl<'a> Attribute<'a> for Nonce {
    type Item = &'a str;

    const KIND: AttrKind = AttrKind::Nonce;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The XOR-RELAYED-ADDRESS is present in Allocate responses.  It specifies
/// the address and port that the server allocated to the client.  It is
/// encoded in the same way as XOR-MAPPED-ADDRESS.
pub struct XorRelayedAddress;

impl<'a> Attribute<'a> for XorRelayedAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::XorRelayedAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, true)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, true)
    }
}

/// The XOR-MAPPED-ADDRESS attribute is identical to the MAPPED-ADDRESS
/// attribute, except that the reflexive transport address is obfuscated
/// through the XOR function.
///
/// X-Port is computed by XOR'ing the mapped port with the most significant
/// 16 bits of the magic cookie.  If the IP address family is IPv4,
/// X-Address is computed by XOR'ing the mapped IP address with the magic
/// cookie.  If the IP address family is IPv6, X-Address is computed by
/// XOR'ing the mapped IP address with the concatenation of the magic
/// cookie and the 96-bit transaction ID.  In all cases, the XOR operation
/// works on its inputs in network byte order.
pub struct XorMappedAddress;

impl<'a> Attribute<'a> for XorMappedAddress {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::XorMappedAddress;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, true)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, true)
    }
}

/// The pre-standard code point for XOR-MAPPED-ADDRESS. Some deployed
/// servers still emit the attribute under `0x8020`; the value encoding is
/// identical.
pub struct XorMappedAddressAlt;

impl<'a> Attribute<'a> for XorMappedAddressAlt {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::XorMappedAddressAlt;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, true)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, true)
    }
}

/// The SOFTWARE attribute contains a textual description of the software
/// being used by the agent sending the message.  The attribute has no
/// impact on operation of the protocol and serves only as a tool for
/// diagnostic and debugging purposes.
pub struct Software;

impl<'a> Attribute<'a> for Software {
    type Item = &'a str;

    const KIND: AttrKind = AttrKind::Software;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put(value.as_bytes());
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        Ok(std::str::from_utf8(buf)?)
    }
}

/// The ALTERNATE-SERVER attribute carries an alternate transport address
/// the client should try, encoded like MAPPED-ADDRESS.
pub struct AlternateServer;

impl<'a> Attribute<'a> for AlternateServer {
    type Item = SocketAddr;

    const KIND: AttrKind = AttrKind::AlternateServer;

    fn serialize(value: Self::Item, buf: &mut BytesMut, token: &[u8]) {
        Addr::into(&value, token, buf, false)
    }

    fn deserialize(buf: &'a [u8], token: &'a [u8]) -> Result<Self::Item, CodecError> {
        Addr::try_from(buf, token, false)
    }
}

/// The FINGERPRINT attribute MAY be present in all STUN messages.
///
/// The value of the attribute is computed as the CRC-32 of the STUN
/// message up to (but excluding) the FINGERPRINT attribute itself,
/// XOR'ed with the 32-bit value 0x5354554e, which helps distinguishing
/// STUN packets from packets of other protocols.
pub struct Fingerprint;

impl<'a> Attribute<'a> for Fingerprint {
    type Item = u32;

    const KIND: AttrKind = AttrKind::Fingerprint;

    fn serialize(value: Self::Item, buf: &mut BytesMut, _: &[u8]) {
        buf.put_u32(value)
    }

    fn deserialize(buf: &'a [u8], _: &'a [u8]) -> Result<Self::Item, CodecError> {
        if buf.len() < 4 {
            return Err(CodecError::InvalidInput);
        }

        Ok(as_u32(buf))
    }
}
