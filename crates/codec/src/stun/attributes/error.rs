use crate::tlv::as_u16;

use std::cmp::{Eq, PartialEq};

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

/// The error codes a node in this stack may emit, along with their
/// recommended reason phrases:
///
/// 400  Bad Request: The request was malformed.  The client SHOULD NOT
///      retry the request without modification from the previous attempt.
///
/// 420  Unknown Attribute: The server received a STUN packet containing a
///      comprehension-required attribute that it did not understand.
///
/// 500  Server Error: The server has suffered a temporary error.  The
///      client should try again.
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Copy, Clone, Debug)]
pub enum Kind {
    TryAlternate = 0x0300,
    BadRequest = 0x0400,
    Unauthorized = 0x0401,
    Forbidden = 0x0403,
    UnknownAttribute = 0x0414,
    AllocationMismatch = 0x0425,
    StaleNonce = 0x0426,
    ServerError = 0x0500,
    InsufficientCapacity = 0x0508,
}

/// The ERROR-CODE attribute is used in error response messages.  It
/// contains a numeric error code value in the range of 300 to 699 plus a
/// textual reason phrase encoded in UTF-8.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           Reserved, should be 0         |Class|     Number    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      Reason Phrase (variable)                                ..
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, Debug)]
pub struct Error<'a> {
    pub code: u16,
    pub message: &'a str,
}

impl Error<'_> {
    /// create error from error type.
    pub fn from(code: Kind) -> Self {
        Self {
            code: code as u16,
            message: code.into(),
        }
    }

    /// encode the error type as bytes.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use dim_node_codec::stun::attributes::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x04, 0x00, 0x42, 0x61, 0x64, 0x20, 0x52, 0x65, 0x71,
    ///     0x75, 0x65, 0x73, 0x74,
    /// ];
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let error = StunError::from(ErrKind::BadRequest);
    /// error.into(&mut buf);
    /// assert_eq!(&buf[..], &buffer);
    /// ```
    pub fn into(self, buf: &mut BytesMut) {
        buf.put_u16(0x0000);
        buf.put_u16(self.code);
        buf.put(self.message.as_bytes());
    }
}

impl<'a> TryFrom<&'a [u8]> for Error<'a> {
    type Error = crate::Error;

    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::attributes::*;
    /// use std::convert::TryFrom;
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x04, 0x00, 0x42, 0x61, 0x64, 0x20, 0x52, 0x65, 0x71,
    ///     0x75, 0x65, 0x73, 0x74,
    /// ];
    ///
    /// let error = StunError::try_from(&buffer[..]).unwrap();
    /// assert_eq!(error.code, ErrKind::BadRequest as u16);
    /// assert_eq!(error.message, "Bad Request");
    /// ```
    fn try_from(packet: &'a [u8]) -> Result<Self, Self::Error> {
        if packet.len() < 4 || as_u16(&packet[..2]) != 0x0000 {
            return Err(crate::Error::InvalidInput);
        }

        Ok(Self {
            code: as_u16(&packet[2..4]),
            message: std::str::from_utf8(&packet[4..])?,
        })
    }
}

impl From<Kind> for &'static str {
    #[rustfmt::skip]
    fn from(val: Kind) -> Self {
        match val {
            Kind::TryAlternate => "Try Alternate",
            Kind::BadRequest => "Bad Request",
            Kind::Unauthorized => "Unauthorized",
            Kind::Forbidden => "Forbidden",
            Kind::UnknownAttribute => "Unknown Attribute",
            Kind::AllocationMismatch => "Allocation Mismatch",
            Kind::StaleNonce => "Stale Nonce",
            Kind::ServerError => "Server Error",
            Kind::InsufficientCapacity => "Insufficient Capacity",
        }
    }
}

impl Eq for Error<'_> {}
impl PartialEq for Error<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}
