use crate::Error;

/// STUN Methods Registry
///
/// [RFC5389]: https://datatracker.ietf.org/doc/html/rfc5389
/// [RFC5766]: https://datatracker.ietf.org/doc/html/rfc5766
///
/// A STUN method is a hex number in the range 0x000-0x0FF. The class of a
/// message (request, success response, error response, indication) is
/// encoded in two interleaved bits of the message type field, so
/// `Binding(Request)` is 0x0001 while `Binding(Error)` is 0x0111.
///
/// Only the methods this stack exchanges are carried here: Binding for
/// reflexive address discovery, Allocate for acquiring a relayed address,
/// and the Send/Data indications that move application data through the
/// relay. The TURN permission and channel machinery is intentionally
/// absent.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum MethodType {
    Request,
    Response,
    Error,
}

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum Method {
    Binding(MethodType),
    Allocate(MethodType),
    SendIndication,
    DataIndication,
}

pub const BINDING_REQUEST: Method = Method::Binding(MethodType::Request);
pub const BINDING_RESPONSE: Method = Method::Binding(MethodType::Response);
pub const BINDING_ERROR: Method = Method::Binding(MethodType::Error);
pub const ALLOCATE_REQUEST: Method = Method::Allocate(MethodType::Request);
pub const ALLOCATE_RESPONSE: Method = Method::Allocate(MethodType::Response);
pub const ALLOCATE_ERROR: Method = Method::Allocate(MethodType::Error);
pub const SEND_INDICATION: Method = Method::SendIndication;
pub const DATA_INDICATION: Method = Method::DataIndication;

impl Method {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Method::Binding(MethodType::Error) | Method::Allocate(MethodType::Error)
        )
    }

    pub fn error(&self) -> Option<Method> {
        match self {
            Method::Binding(_) => Some(BINDING_ERROR),
            Method::Allocate(_) => Some(ALLOCATE_ERROR),
            _ => None,
        }
    }
}

impl TryFrom<u16> for Method {
    type Error = Error;

    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::methods::*;
    /// use std::convert::TryFrom;
    ///
    /// assert_eq!(Method::try_from(0x0001).unwrap(), BINDING_REQUEST);
    /// assert_eq!(Method::try_from(0x0101).unwrap(), BINDING_RESPONSE);
    /// assert_eq!(Method::try_from(0x0111).unwrap(), BINDING_ERROR);
    /// assert_eq!(Method::try_from(0x0003).unwrap(), ALLOCATE_REQUEST);
    /// assert_eq!(Method::try_from(0x0103).unwrap(), ALLOCATE_RESPONSE);
    /// assert_eq!(Method::try_from(0x0113).unwrap(), ALLOCATE_ERROR);
    /// assert_eq!(Method::try_from(0x0016).unwrap(), SEND_INDICATION);
    /// assert_eq!(Method::try_from(0x0017).unwrap(), DATA_INDICATION);
    /// assert!(Method::try_from(0x0002).is_err());
    /// ```
    fn try_from(value: u16) -> Result<Self, Error> {
        Ok(match value {
            0x0001 => Self::Binding(MethodType::Request),
            0x0101 => Self::Binding(MethodType::Response),
            0x0111 => Self::Binding(MethodType::Error),
            0x0003 => Self::Allocate(MethodType::Request),
            0x0103 => Self::Allocate(MethodType::Response),
            0x0113 => Self::Allocate(MethodType::Error),
            0x0016 => Self::SendIndication,
            0x0017 => Self::DataIndication,
            _ => return Err(Error::UnknownMethod),
        })
    }
}

impl From<Method> for u16 {
    /// # Test
    ///
    /// ```
    /// use dim_node_codec::stun::methods::*;
    ///
    /// assert_eq!(0x0001u16, u16::from(BINDING_REQUEST));
    /// assert_eq!(0x0101u16, u16::from(BINDING_RESPONSE));
    /// assert_eq!(0x0111u16, u16::from(BINDING_ERROR));
    /// assert_eq!(0x0003u16, u16::from(ALLOCATE_REQUEST));
    /// assert_eq!(0x0103u16, u16::from(ALLOCATE_RESPONSE));
    /// assert_eq!(0x0113u16, u16::from(ALLOCATE_ERROR));
    /// assert_eq!(0x0016u16, u16::from(SEND_INDICATION));
    /// assert_eq!(0x0017u16, u16::from(DATA_INDICATION));
    /// ```
    fn from(value: Method) -> Self {
        match value {
            Method::Binding(MethodType::Request) => 0x0001,
            Method::Binding(MethodType::Response) => 0x0101,
            Method::Binding(MethodType::Error) => 0x0111,
            Method::Allocate(MethodType::Request) => 0x0003,
            Method::Allocate(MethodType::Response) => 0x0103,
            Method::Allocate(MethodType::Error) => 0x0113,
            Method::SendIndication => 0x0016,
            Method::DataIndication => 0x0017,
        }
    }
}
