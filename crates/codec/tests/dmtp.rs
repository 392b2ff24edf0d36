use anyhow::Result;
use bytes::BytesMut;
use dim_node_codec::dmtp::*;

fn sample_location() -> Location {
    let mut location = Location::new("alice", 1700000000);
    location.source = Some("192.168.0.5:9394".parse().unwrap());
    location.mapped = Some("203.0.113.7:4444".parse().unwrap());
    location.relayed = Some("198.51.100.2:3478".parse().unwrap());
    location.signature = Some(vec![0xaa; 20].into());
    location.nat = Some("Port Restricted Cone NAT".to_string());
    location
}

#[test]
fn test_command_round_trips() -> Result<()> {
    let location = sample_location();

    for command in [
        Command::Hi(location.clone()),
        Command::Sign(location.clone()),
        Command::From(location.clone()),
        Command::Bye(location.clone()),
        Command::Call {
            identifier: "bob".to_string(),
        },
    ] {
        let body = command.encode();
        assert_eq!(Command::decode(&body)?, command);
    }

    Ok(())
}

#[test]
fn test_hi_without_optional_fields() -> Result<()> {
    // The first login announcement carries only the identifier and time.
    let body = Command::Hi(Location::new("alice", 1700000000)).encode();

    match Command::decode(&body)? {
        Command::Hi(it) => {
            assert_eq!(it.identifier, "alice");
            assert_eq!(it.timestamp, 1700000000);
            assert_eq!(it.source, None);
            assert_eq!(it.mapped, None);
            assert_eq!(it.signature, None);
        }
        _ => panic!("expected a HI command"),
    }

    Ok(())
}

#[test]
fn test_envelope_round_trip() -> Result<()> {
    let envelope = Envelope {
        sender: "alice".to_string(),
        receiver: "bob".to_string(),
        timestamp: 1700000000,
        content: "hello bob".into(),
        signature: Some(vec![1, 2, 3].into()),
        key: Some(vec![4, 5, 6].into()),
        attachment: Some(vec![7, 8, 9].into()),
    };

    let body = envelope.encode();
    assert_eq!(Envelope::decode(&body)?, envelope);

    Ok(())
}

#[test]
fn test_long_content_spans_repeated_fields() -> Result<()> {
    // 1500 bytes of content cannot fit one 255-byte field.
    let content: Vec<u8> = (0..1500u32).map(|it| it as u8).collect();
    let envelope = Envelope {
        sender: "alice".to_string(),
        receiver: "bob".to_string(),
        timestamp: 1700000000,
        content: content.clone().into(),
        signature: None,
        key: None,
        attachment: None,
    };

    let body = envelope.encode();

    let (fields, residual) = Fields::parse(&body);
    assert_eq!(residual, 0);
    assert_eq!(fields.get_all(FieldKind::Content).count(), 6);

    let decoded = Envelope::decode(&body)?;
    assert_eq!(decoded.content.as_ref(), content.as_slice());

    Ok(())
}

#[test]
fn test_signable_bytes_layout() {
    let location = sample_location();
    let bytes = location.signable_bytes();

    // source (8) + mapped (8) + relayed (8) + timestamp (4).
    assert_eq!(bytes.len(), 28);
    assert_eq!(&bytes[24..28], &1700000000u32.to_be_bytes());

    // Dropping an optional address shortens the layout without shifting
    // the timestamp encoding.
    let mut partial = location.clone();
    partial.relayed = None;
    let bytes = partial.signable_bytes();
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[16..20], &1700000000u32.to_be_bytes());
}

#[test]
fn test_unknown_fields_are_tolerated() -> Result<()> {
    let mut buf = BytesMut::new();
    put_str(FieldKind::Sender, "alice", &mut buf);
    put_str(FieldKind::Receiver, "bob", &mut buf);
    put(FieldKind::Content, b"hi", &mut buf);

    // An unassigned tag between known fields.
    buf.extend_from_slice(&[0x7e, 0x02, 0xff, 0xff]);
    put_time(1700000000, &mut buf);

    let envelope = Envelope::decode(&buf[..])?;
    assert_eq!(envelope.sender, "alice");
    assert_eq!(envelope.timestamp, 1700000000);

    Ok(())
}

#[test]
fn test_truncated_frame_keeps_prefix() {
    let mut buf = BytesMut::new();
    put_str(FieldKind::Identifier, "alice", &mut buf);

    // A field claiming more bytes than remain.
    buf.extend_from_slice(&[FieldKind::NatType as u8, 0x20, 0x41]);

    let (fields, residual) = Fields::parse(&buf[..]);
    assert_eq!(fields.get_str(FieldKind::Identifier), Some("alice"));
    assert_eq!(fields.get(FieldKind::NatType), None);
    assert_eq!(residual, 3);
}

#[test]
fn test_command_without_command_field_is_rejected() {
    let mut buf = BytesMut::new();
    put_str(FieldKind::Identifier, "alice", &mut buf);

    assert!(Command::decode(&buf[..]).is_err());
}
