//! ## Wire formats of the NAT traversal messaging stack
//!
//! [RFC3489]: https://tools.ietf.org/html/rfc3489
//! [RFC5389]: https://tools.ietf.org/html/rfc5389
//! [RFC5766]: https://tools.ietf.org/html/rfc5766
//!
//! Three wire formats share this crate. STUN messages ([RFC3489] legacy and
//! [RFC5389] modern headers, with the TURN extensions of [RFC5766]) carry the
//! reflexive-address discovery and relay signalling. MTP packets carry
//! reliable message transfer on top of UDP: a fixed 24-byte header with a
//! sequence number and fragmentation bookkeeping, followed by an opaque body.
//! DMTP fields ride inside MTP bodies and describe identities, locations and
//! user messages.
//!
//! All three are tag-length-value encodings built from the primitives in
//! [`tlv`]: STUN attributes use the word family (2-byte tag, 2-byte length,
//! values padded to 4 bytes), DMTP fields use the byte family (1-byte tag,
//! 1-byte length, byte-aligned values). Parsing is zero-copy throughout;
//! decoded values borrow from the input buffer.

pub mod dmtp;
pub mod mtp;
pub mod stun;
pub mod tlv;

use std::{array::TryFromSliceError, str::Utf8Error};

use hmac::{Hmac, Mac, digest::CtOutput};

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    SummaryFailed,
    NotFoundMagicNumber,
    UnknownMethod,
    UnknownVersion,
    UnknownPackageKind,
    MissingField,
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

/// HMAC SHA1 digest.
///
/// # Test
///
/// ```
/// use dim_node_codec::hmac_sha1;
///
/// let key = [
///     0x3eu8, 0x2f, 0x79, 0x1e, 0x1f, 0x14, 0xd1, 0x73, 0xfc, 0x91, 0xff,
///     0x2f, 0x59, 0xb5, 0x0f, 0xd1,
/// ];
///
/// let a = hmac_sha1(&key, &[b"alice"]).unwrap().into_bytes();
/// let b = hmac_sha1(&key, &[b"alice"]).unwrap().into_bytes();
/// let c = hmac_sha1(&key, &[b"bob"]).unwrap().into_bytes();
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// ```
pub fn hmac_sha1(key: &[u8], source: &[&[u8]]) -> Result<CtOutput<Hmac<sha1::Sha1>>, Error> {
    match Hmac::<sha1::Sha1>::new_from_slice(key) {
        Err(_) => Err(Error::SummaryFailed),
        Ok(mut mac) => {
            for buf in source {
                mac.update(buf);
            }

            Ok(mac.finalize())
        }
    }
}

/// CRC32 Fingerprint.
///
/// The value is the CRC-32 of the message XOR'ed with the 32-bit value
/// 0x5354554e, as used by the STUN FINGERPRINT attribute.
///
/// # Test
///
/// ```
/// use dim_node_codec::fingerprint;
///
/// assert_eq!(fingerprint(b"1"), 3498621689);
/// ```
pub fn fingerprint(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes) ^ 0x5354_554e
}
