pub mod attributes;
pub mod methods;

use crate::{
    Error, fingerprint,
    stun::{
        attributes::{AttrKind, Attribute},
        methods::Method,
    },
    tlv::{TlvParser, WordLayout, as_u16, pad_size},
};

use std::ops::Range;

use bytes::{BufMut, BytesMut};

/// The fixed value every RFC5389 message carries in bytes 4..8. Messages
/// without it are treated as RFC3489 legacy messages with a 16-byte
/// transaction id.
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// A cache of the list of attributes, this is for internal use only.
///
/// Attribute codes are kept raw so that comprehension-optional attributes
/// this stack does not know about still round-trip through a decoded
/// message.
#[derive(Debug, Clone)]
pub struct Attributes(Vec<(u16, Range<usize>)>);

impl Default for Attributes {
    fn default() -> Self {
        Self(Vec::with_capacity(20))
    }
}

impl Attributes {
    /// Adds an attribute to the list.
    pub fn append(&mut self, code: u16, range: Range<usize>) {
        self.0.push((code, range));
    }

    /// Gets an attribute from the list.
    ///
    /// Note: This function will only look for the first matching attribute
    /// in the list and return it.
    pub fn get(&self, code: u16) -> Option<Range<usize>> {
        self.0
            .iter()
            .find(|(k, _)| *k == code)
            .map(|(_, v)| v.clone())
    }

    /// Gets all the values of an attribute from the list.
    ///
    /// A stun message can carry multiple attributes with the same code, and
    /// this function returns all of them.
    pub fn get_all<'a>(&'a self, code: u16) -> impl Iterator<Item = &'a Range<usize>> {
        self.0.iter().filter(move |(k, _)| *k == code).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        if !self.0.is_empty() {
            self.0.clear();
        }
    }
}

pub struct MessageEncoder<'a> {
    token: &'a [u8],
    bytes: &'a mut BytesMut,
}

impl<'a> MessageEncoder<'a> {
    /// Start an RFC5389 message with a caller-provided transaction id.
    pub fn new(method: Method, token: &'a [u8; 12], bytes: &'a mut BytesMut) -> Self {
        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put(token.as_slice());

        Self { bytes, token }
    }

    /// rely on old message to create new message.
    ///
    /// The transaction id and the header form (modern or legacy) are taken
    /// from the decoded message, so a reply always matches the request it
    /// answers.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use dim_node_codec::stun::methods::*;
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let mut buf = BytesMut::new();
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// let mut message = MessageEncoder::extend(BINDING_REQUEST, &old, &mut buf);
    /// message.flush();
    ///
    /// assert_eq!(&buf[..], &buffer[..]);
    /// ```
    pub fn extend(method: Method, reader: &Message<'a>, bytes: &'a mut BytesMut) -> Self {
        let token = reader.token();

        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);

        if !reader.is_legacy() {
            bytes.put_u32(MAGIC_COOKIE);
        }

        bytes.put(token);
        Self { bytes, token }
    }

    /// append attribute.
    ///
    /// append attribute to message attribute list.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use dim_node_codec::stun::attributes::*;
    /// use dim_node_codec::stun::methods::*;
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let result = [
    ///     0x00u8, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x06, 0x00,
    ///     0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let mut buf = BytesMut::new();
    /// let mut attributes = Attributes::default();
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// let mut message = MessageEncoder::extend(BINDING_REQUEST, &old, &mut buf);
    ///
    /// message.append::<UserName>("panda");
    /// message.flush();
    ///
    /// assert_eq!(&buf[..], &result[..]);
    /// ```
    pub fn append<'c, T: Attribute<'c>>(&'c mut self, value: T::Item) {
        self.bytes.put_u16(T::KIND as u16);

        // reserve the length position, the real size is only known after
        // the attribute has serialized itself.
        let os = self.bytes.len();
        self.bytes.put_u16(0);
        T::serialize(value, self.bytes, self.token);

        let size = self.bytes.len() - os - 2;
        self.bytes[os..os + 2].copy_from_slice((size as u16).to_be_bytes().as_slice());

        // if you need to padding, padding in the zero bytes.
        let psize = pad_size(size, 4);
        if psize > 0 {
            self.bytes.put(&[0u8; 3][0..psize]);
        }
    }

    /// Write the final attribute list size into the header.
    pub fn flush(&mut self) {
        // Both header forms are 20 bytes: cookie + 12-byte id, or a plain
        // 16-byte id.
        let size = self.bytes.len() - 20;
        self.set_len(size);
    }

    /// Write the header size and seal the message with a FINGERPRINT
    /// attribute.
    ///
    /// The CRC covers the header with the length already accounting for the
    /// fingerprint attribute itself, so the size is written before the
    /// checksum is computed.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use dim_node_codec::stun::attributes::*;
    /// use dim_node_codec::stun::methods::*;
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut buf = BytesMut::new();
    /// let mut attributes = Attributes::default();
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// let mut message = MessageEncoder::extend(BINDING_REQUEST, &old, &mut buf);
    /// message.flush_with_fingerprint();
    ///
    /// let mut attributes = Attributes::default();
    /// let reply = Message::decode(&buf[..], &mut attributes).unwrap();
    ///
    /// assert!(reply.get::<Fingerprint>().is_some());
    /// ```
    pub fn flush_with_fingerprint(&mut self) {
        let size = self.bytes.len() - 20;
        self.set_len(size + 8);

        let checksum = fingerprint(self.bytes);
        self.bytes.put_u16(AttrKind::Fingerprint as u16);
        self.bytes.put_u16(4);
        self.bytes.put_u32(checksum);
    }

    // set stun message header size.
    fn set_len(&mut self, len: usize) {
        self.bytes[2..4].copy_from_slice((len as u16).to_be_bytes().as_slice());
    }
}

pub struct Message<'a> {
    /// message method.
    method: Method,
    /// message source bytes.
    bytes: &'a [u8],
    /// whether the header carries the RFC5389 magic cookie.
    cookie: bool,
    // message attribute list.
    attributes: &'a Attributes,
}

impl<'a> Message<'a> {
    /// message method.
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// message transaction id: 12 bytes for modern messages, 16 for legacy
    /// ones.
    #[inline]
    pub fn token(&self) -> &'a [u8] {
        if self.cookie {
            &self.bytes[8..20]
        } else {
            &self.bytes[4..20]
        }
    }

    /// whether the message used the RFC3489 header form.
    #[inline]
    pub fn is_legacy(&self) -> bool {
        !self.cookie
    }

    /// get attribute.
    ///
    /// get attribute from message attribute list.
    ///
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::attributes::*;
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn get<T: Attribute<'a>>(&self) -> Option<T::Item> {
        let range = self.attributes.get(T::KIND as u16)?;
        T::deserialize(&self.bytes[range], self.token()).ok()
    }

    /// Gets all the values of an attribute from the list.
    pub fn get_all<T: Attribute<'a>>(&self) -> impl Iterator<Item = T::Item> {
        self.attributes
            .get_all(T::KIND as u16)
            .map(|it| T::deserialize(&self.bytes[it.clone()], self.token()))
            .filter(|it| it.is_ok())
            .flatten()
    }

    /// Raw value of an attribute the registry does not know. Unknown codes
    /// never fail decoding, they are just kept as opaque slices.
    pub fn get_raw(&self, code: u16) -> Option<&'a [u8]> {
        self.attributes.get(code).map(|range| &self.bytes[range])
    }

    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::attributes::*;
    /// use dim_node_codec::stun::methods::*;
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer: [u8; 20] = [
    ///     0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49, 0x42,
    ///     0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert_eq!(message.method(), BINDING_REQUEST);
    /// assert!(!message.is_legacy());
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        let len = bytes.len();

        // There must be at least a complete header.
        if len < 20 {
            return Err(Error::InvalidInput);
        }

        // The topmost two bits of a stun message are always zero.
        if bytes[0] >> 6 != 0 {
            return Err(Error::InvalidInput);
        }

        let method = Method::try_from(as_u16(&bytes[..2]))?;

        // The length field does not include the header; the whole message
        // must fit in the buffer.
        let size = as_u16(&bytes[2..4]) as usize + 20;
        if len < size {
            return Err(Error::InvalidInput);
        }

        // Messages without the magic cookie are RFC3489 messages whose
        // transaction id occupies the cookie bytes as well.
        let cookie = bytes[4..8] == MAGIC_COOKIE.to_be_bytes();

        attributes.clear();

        for item in TlvParser::<WordLayout>::new(&bytes[20..size]) {
            attributes.append(item.tag, item.range.start + 20..item.range.end + 20);
        }

        Ok(Self {
            attributes,
            method,
            cookie,
            bytes,
        })
    }

    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::*;
    ///
    /// let buffer: [u8; 20] = [
    ///     0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49, 0x42,
    ///     0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let size = Message::message_size(&buffer[..]).unwrap();
    ///
    /// assert_eq!(size, 20);
    /// ```
    pub fn message_size(bytes: &[u8]) -> Result<usize, Error> {
        if bytes.len() < 20 || bytes[0] >> 6 != 0 {
            return Err(Error::InvalidInput);
        }

        Ok(as_u16(&bytes[2..4]) as usize + 20)
    }
}
