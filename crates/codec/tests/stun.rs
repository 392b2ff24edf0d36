use anyhow::Result;
use bytes::BytesMut;
use dim_node_codec::stun::{attributes::*, methods::*, *};

const TOKEN: [u8; 12] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
];

#[test]
fn test_reflexive_address_discovery() -> Result<()> {
    // The client's binding request: type 0x0001, length 0, magic cookie,
    // fixed transaction id.
    let mut request = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &TOKEN, &mut request);
    message.flush();

    assert_eq!(
        &request[..],
        &[
            0x00, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
            0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
        ]
    );

    // The server decodes it and answers with the observed source address.
    let mapped = "192.0.2.1:54321".parse()?;
    let mut response = BytesMut::new();
    {
        let mut attributes = Attributes::default();
        let reader = Message::decode(&request[..], &mut attributes)?;
        assert_eq!(reader.method(), BINDING_REQUEST);

        let mut message = MessageEncoder::extend(BINDING_RESPONSE, &reader, &mut response);
        message.append::<XorMappedAddress>(mapped);
        message.flush();
    }

    // On the wire the port is masked with the upper cookie bits and the
    // address with the cookie itself.
    assert_eq!(&response[20..24], &[0x00, 0x20, 0x00, 0x08]);
    assert_eq!(&response[26..28], &(54321u16 ^ 0x2112).to_be_bytes());
    assert_eq!(&response[28..32], &[0xc0 ^ 0x21, 0x00 ^ 0x12, 0x02 ^ 0xa4, 0x01 ^ 0x42]);

    // The client unmasks the observed reflexive address.
    let mut attributes = Attributes::default();
    let reader = Message::decode(&response[..], &mut attributes)?;
    assert_eq!(reader.method(), BINDING_RESPONSE);
    assert_eq!(reader.token(), &TOKEN);
    assert_eq!(reader.get::<XorMappedAddress>(), Some(mapped));

    Ok(())
}

#[test]
fn test_attribute_round_trips() -> Result<()> {
    let addr = "203.0.113.7:4444".parse()?;

    let mut bytes = BytesMut::new();
    let mut message = MessageEncoder::new(ALLOCATE_RESPONSE, &TOKEN, &mut bytes);
    message.append::<XorRelayedAddress>(addr);
    message.append::<XorMappedAddress>(addr);
    message.append::<MappedAddress>(addr);
    message.append::<Lifetime>(600);
    message.append::<Software>("dim-node.test");
    message.append::<UserName>("alice");
    message.append::<ChangeRequest>(ChangeRequest { ip: true, port: true });
    message.flush();

    let mut attributes = Attributes::default();
    let reader = Message::decode(&bytes[..], &mut attributes)?;

    assert_eq!(reader.get::<XorRelayedAddress>(), Some(addr));
    assert_eq!(reader.get::<XorMappedAddress>(), Some(addr));
    assert_eq!(reader.get::<MappedAddress>(), Some(addr));
    assert_eq!(reader.get::<Lifetime>(), Some(600));
    assert_eq!(reader.get::<Software>(), Some("dim-node.test"));
    assert_eq!(reader.get::<UserName>(), Some("alice"));
    assert_eq!(
        reader.get::<ChangeRequest>(),
        Some(ChangeRequest { ip: true, port: true })
    );

    Ok(())
}

#[test]
fn test_send_indication_carries_data() -> Result<()> {
    let peer = "198.51.100.9:5555".parse()?;
    let payload = b"application bytes";

    let mut bytes = BytesMut::new();
    let mut message = MessageEncoder::new(SEND_INDICATION, &TOKEN, &mut bytes);
    message.append::<XorPeerAddress>(peer);
    message.append::<Data>(payload);
    message.flush();

    let mut attributes = Attributes::default();
    let reader = Message::decode(&bytes[..], &mut attributes)?;

    assert_eq!(reader.method(), SEND_INDICATION);
    assert_eq!(reader.get::<XorPeerAddress>(), Some(peer));
    assert_eq!(reader.get::<Data>(), Some(payload.as_slice()));

    Ok(())
}

#[test]
fn test_unknown_attributes_are_kept_raw() -> Result<()> {
    let mut bytes = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &TOKEN, &mut bytes);
    message.append::<UserName>("alice");
    message.flush();

    // Smuggle in a comprehension-optional attribute the registry does not
    // carry.
    bytes[3] += 8;
    bytes.extend_from_slice(&[0xbf, 0x00, 0x00, 0x03, 0x01, 0x02, 0x03, 0x00]);

    let mut attributes = Attributes::default();
    let reader = Message::decode(&bytes[..], &mut attributes)?;

    assert_eq!(reader.get::<UserName>(), Some("alice"));
    assert_eq!(reader.get_raw(0xbf00), Some(&[0x01u8, 0x02, 0x03][..]));

    Ok(())
}

#[test]
fn test_legacy_header_round_trip() -> Result<()> {
    // RFC3489 form: no magic cookie, the transaction id fills 16 bytes.
    let request = [
        0x00u8, 0x01, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
        0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
    ];

    let mut attributes = Attributes::default();
    let reader = Message::decode(&request[..], &mut attributes)?;

    assert!(reader.is_legacy());
    assert_eq!(reader.token().len(), 16);

    // A reply extends the legacy header form as well.
    let mut response = BytesMut::new();
    let mut message = MessageEncoder::extend(BINDING_RESPONSE, &reader, &mut response);
    message.append::<MappedAddress>("192.0.2.1:54321".parse()?);
    message.flush();

    let mut attributes = Attributes::default();
    let reader = Message::decode(&response[..], &mut attributes)?;

    assert!(reader.is_legacy());
    assert_eq!(reader.get::<MappedAddress>(), Some("192.0.2.1:54321".parse()?));

    Ok(())
}

#[test]
fn test_fingerprint_seals_message() -> Result<()> {
    let mut bytes = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &TOKEN, &mut bytes);
    message.append::<Software>("dim-node.test");
    message.flush_with_fingerprint();

    let mut attributes = Attributes::default();
    let reader = Message::decode(&bytes[..], &mut attributes)?;
    let checksum = reader.get::<Fingerprint>().unwrap();

    // The CRC covers everything before the fingerprint attribute itself.
    let expected = dim_node_codec::fingerprint(&bytes[..bytes.len() - 8]);
    assert_eq!(checksum, expected);

    Ok(())
}

#[test]
fn test_malformed_messages_are_rejected() {
    let mut attributes = Attributes::default();

    // Too short for a header.
    assert!(Message::decode(&[0u8; 12][..], &mut attributes).is_err());

    // Topmost bits are not zero.
    let mut bytes = [0u8; 20];
    bytes[0] = 0xc0;
    assert!(Message::decode(&bytes[..], &mut attributes).is_err());

    // Length field points past the end of the buffer.
    let bytes = [
        0x00u8, 0x01, 0x00, 0x20, 0x21, 0x12, 0xa4, 0x42, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
        0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c,
    ];
    assert!(Message::decode(&bytes[..], &mut attributes).is_err());
}
