use anyhow::Result;
use bytes::Bytes;
use dim_node_codec::mtp::*;

#[test]
fn test_header_round_trip_is_bit_exact() -> Result<()> {
    let pack = Package::create(Kind::Command, Some(0xDEADBEEF), Bytes::from_static(b"HI"));
    let bytes = pack.to_bytes();

    // The header layout on the wire.
    assert_eq!(&bytes[0..4], b"DIM\0");
    assert_eq!(bytes[4], VERSION);
    assert_eq!(bytes[5], 1);
    assert_eq!(&bytes[6..10], &0xDEADBEEFu32.to_be_bytes());
    assert_eq!(&bytes[10..14], &1u32.to_be_bytes());
    assert_eq!(&bytes[14..18], &0u32.to_be_bytes());
    assert_eq!(&bytes[18..22], &2u32.to_be_bytes());
    assert_eq!(&bytes[22..24], &[0, 0]);
    assert_eq!(bytes.len(), HEADER_SIZE + 2);

    let parsed = Package::parse(&bytes)?;
    assert_eq!(parsed.head, pack.head);
    assert_eq!(parsed.body, pack.body);
    assert_eq!(parsed.to_bytes(), bytes);

    Ok(())
}

#[test]
fn test_split_assemble_in_any_order() -> Result<()> {
    let body: Vec<u8> = (0..1500u32).map(|it| it as u8).collect();
    let pack = Package::create(Kind::Message, Some(42), Bytes::from(body.clone()));

    let mut fragments = pack.split();
    assert_eq!(fragments.len(), 3);

    // Fragment body lengths sum to the original body length.
    let total: usize = fragments.iter().map(|it| it.body.len()).sum();
    assert_eq!(total, body.len());

    // Arrival order does not matter.
    fragments.swap(0, 2);
    fragments.swap(1, 2);

    let assembled = Package::assemble(&fragments).unwrap();
    assert_eq!(assembled.head.kind, Kind::Message);
    assert_eq!(assembled.head.sn, 42);
    assert_eq!(assembled.head.pages, 1);
    assert_eq!(assembled.head.offset, 0);
    assert_eq!(assembled.body.as_ref(), body.as_slice());

    Ok(())
}

#[test]
fn test_exact_cap_body_is_one_datagram() {
    let pack = Package::create(
        Kind::Message,
        None,
        Bytes::from(vec![0u8; MAX_BODY_SIZE]),
    );

    assert_eq!(pack.head.pages, 1);
    assert!(pack.to_bytes().len() <= 576);
}

#[test]
fn test_assemble_rejects_inconsistent_fragments() {
    let pack = Package::create(Kind::Message, Some(1), Bytes::from(vec![0u8; 1100]));
    let fragments = pack.split();

    // A missing fragment.
    assert!(Package::assemble(&fragments[..2]).is_none());

    // A duplicated offset.
    let mut duplicated = fragments.clone();
    duplicated[1] = duplicated[0].clone();
    assert!(Package::assemble(&duplicated).is_none());

    // A foreign sequence number.
    let stranger = Package::create(Kind::Message, Some(2), Bytes::from(vec![0u8; 1100]));
    let mut mixed = fragments.clone();
    mixed[2] = stranger.split()[2].clone();
    assert!(Package::assemble(&mixed).is_none());
}

#[test]
fn test_parse_rejects_malformed_packets() {
    // Wrong magic.
    let mut bytes = Package::create(Kind::Command, None, Bytes::new()).to_bytes().to_vec();
    bytes[0] = b'X';
    assert!(Package::parse(&Bytes::from(bytes)).is_err());

    // Unknown version.
    let mut bytes = Package::create(Kind::Command, None, Bytes::new()).to_bytes().to_vec();
    bytes[4] = 9;
    assert!(Package::parse(&Bytes::from(bytes)).is_err());

    // Unknown packet type.
    let mut bytes = Package::create(Kind::Command, None, Bytes::new()).to_bytes().to_vec();
    bytes[5] = 0x7f;
    assert!(Package::parse(&Bytes::from(bytes)).is_err());

    // Body length pointing past the end of the datagram.
    let mut bytes = Package::create(Kind::Command, None, Bytes::new()).to_bytes().to_vec();
    bytes[21] = 1;
    assert!(Package::parse(&Bytes::from(bytes)).is_err());

    // A short datagram is not a packet at all.
    assert!(Package::parse(&Bytes::from_static(b"DIM\0")).is_err());
}

#[test]
fn test_sequence_numbers_are_unique_and_nonzero() {
    let mut seen = std::collections::HashSet::new();
    for _ in 0..10_000 {
        let sn = next_sn();
        assert_ne!(sn, 0);
        assert!(seen.insert(sn));
    }
}

#[test]
fn test_fragment_respond_round_trip() {
    let body = fragment_respond_body(3, 2);
    assert_eq!(body.len(), 10);
    assert_eq!(parse_fragment_respond(&body), Some((3, 2)));

    // A plain "OK" respond is not a fragment acknowledgement.
    assert_eq!(parse_fragment_respond(OK), None);
}
