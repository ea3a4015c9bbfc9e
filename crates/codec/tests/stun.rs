use anyhow::{Result, anyhow};
use bytes::BytesMut;
use relay_server_codec::{
    Attributes, DecodeResult, Decoder,
    channel_data::ChannelData,
    crypto::{fingerprint, long_term_credential_digest},
    message::{MAGIC_COOKIE, Message, MessageEncoder, attributes::*, methods::*},
};

const TOKEN: [u8; 12] = [
    0x64, 0x4f, 0x5a, 0x78, 0x6a, 0x56, 0x33, 0x62, 0x4b, 0x52, 0x33, 0x31,
];

fn decode<'a>(decoder: &'a mut Decoder, bytes: &'a [u8]) -> Result<Message<'a>> {
    match decoder.decode(bytes)? {
        DecodeResult::Message(message) => Ok(message),
        DecodeResult::ChannelData(_) => Err(anyhow!("expected a stun message")),
    }
}

#[test]
fn encode_decode_is_identity_on_recognized_attributes() -> Result<()> {
    let peer = "198.51.100.5:9999".parse()?;
    let relayed = "203.0.113.1:50000".parse()?;
    let mapped = "203.0.113.7:40000".parse()?;
    let alternate = "203.0.113.2:3478".parse()?;

    let mut buf = BytesMut::with_capacity(1280);

    {
        let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &TOKEN, &mut buf);
        message.append::<RequestedTransport>(TRANSPORT_UDP);
        message.append::<UserName>("panda");
        message.append::<Realm>("localhost");
        message.append::<Nonce>("1c13d2b245b3a734");
        message.append::<Lifetime>(600);
        message.append::<ChannelNumber>(0x4001);
        message.append::<XorPeerAddress>(peer);
        message.append::<XorRelayedAddress>(relayed);
        message.append::<XorMappedAddress>(mapped);
        message.append::<MappedAddress>(mapped);
        message.append::<AlternateServer>(alternate);
        message.append::<Data>(b"hi");
        message.append::<EvenPort>(true);
        message.append::<ReservationToken>(0x1122334455667788);
        message.append::<Software>("relay-server.test");
        message.flush(None)?;
    }

    let mut decoder = Decoder::default();
    let message = decode(&mut decoder, &buf)?;

    assert_eq!(message.method(), ALLOCATE_REQUEST);
    assert_eq!(message.transaction_id(), &TOKEN);
    assert_eq!(message.get::<RequestedTransport>(), Some(TRANSPORT_UDP));
    assert_eq!(message.get::<UserName>(), Some("panda"));
    assert_eq!(message.get::<Realm>(), Some("localhost"));
    assert_eq!(message.get::<Nonce>(), Some("1c13d2b245b3a734"));
    assert_eq!(message.get::<Lifetime>(), Some(600));
    assert_eq!(message.get::<ChannelNumber>(), Some(0x4001));
    assert_eq!(message.get::<XorPeerAddress>(), Some(peer));
    assert_eq!(message.get::<XorRelayedAddress>(), Some(relayed));
    assert_eq!(message.get::<XorMappedAddress>(), Some(mapped));
    assert_eq!(message.get::<MappedAddress>(), Some(mapped));
    assert_eq!(message.get::<AlternateServer>(), Some(alternate));
    assert_eq!(message.get::<Data>(), Some(b"hi".as_slice()));
    assert_eq!(message.get::<EvenPort>(), Some(true));
    assert_eq!(message.get::<ReservationToken>(), Some(0x1122334455667788));
    assert_eq!(message.get::<Software>(), Some("relay-server.test"));
    assert!(message.unknown_attributes().is_empty());

    Ok(())
}

#[test]
fn encode_decode_error_response() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);

    {
        let mut message = MessageEncoder::new(ALLOCATE_ERROR, &TOKEN, &mut buf);
        message.append::<ErrorCode>(ErrorCode::from(ErrorType::Unauthorized));
        message.append::<UnknownAttributes>(vec![0x7ffe, 0x7fff]);
        message.append::<Realm>("localhost");
        message.flush(None)?;
    }

    let mut decoder = Decoder::default();
    let message = decode(&mut decoder, &buf)?;

    assert_eq!(message.method(), ALLOCATE_ERROR);

    let error = message.get::<ErrorCode>().unwrap();
    assert_eq!(error, ErrorCode::from(ErrorType::Unauthorized));
    assert_eq!(error.message, "Unauthorized");

    assert_eq!(
        message.get::<UnknownAttributes>(),
        Some(vec![0x7ffe, 0x7fff])
    );

    Ok(())
}

#[test]
fn message_integrity_and_fingerprint() -> Result<()> {
    let key = long_term_credential_digest("panda", "localhost", "raspberry")?;
    let mapped = "203.0.113.7:40000".parse()?;

    let mut buf = BytesMut::with_capacity(1280);

    {
        let mut message = MessageEncoder::new(BINDING_RESPONSE, &TOKEN, &mut buf);
        message.append::<XorMappedAddress>(mapped);
        message.flush(Some(key.as_slice()))?;
    }

    let mut decoder = Decoder::default();

    {
        let message = decode(&mut decoder, &buf)?;
        assert!(message.checksum(&key).is_ok());

        let wrong = long_term_credential_digest("panda", "localhost", "grape")?;
        assert!(message.checksum(&wrong).is_err());
    }

    // The fingerprint is the final attribute and covers everything
    // before it, with the header length already including it.
    {
        let total = buf.len();
        let value = u32::from_be_bytes(buf[total - 4..].try_into()?);
        assert_eq!(
            &buf[total - 8..total - 4],
            &[0x80, 0x28, 0x00, 0x04],
            "fingerprint must be the last attribute"
        );

        assert_eq!(value, fingerprint(&buf[..total - 8]));
    }

    // A flipped payload bit must break the integrity check.
    {
        let mut tampered = buf.to_vec();
        tampered[26] ^= 0x01;

        let mut decoder = Decoder::default();
        let message = decode(&mut decoder, &tampered)?;
        assert!(message.checksum(&key).is_err());
    }

    Ok(())
}

#[test]
fn attribute_padding_is_zero_and_excluded_from_length() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);

    {
        let mut message = MessageEncoder::new(BINDING_REQUEST, &TOKEN, &mut buf);
        message.append::<UserName>("panda");
        message.flush(None)?;
    }

    // 4 bytes of TLV header, 5 bytes of value, 3 bytes of padding.
    assert_eq!(buf.len(), 20 + 12);
    assert_eq!(u16::from_be_bytes(buf[2..4].try_into()?), 12);
    assert_eq!(u16::from_be_bytes(buf[22..24].try_into()?), 5);
    assert_eq!(&buf[29..32], &[0, 0, 0]);

    Ok(())
}

#[test]
fn unknown_comprehension_required_attributes_are_collected() -> Result<()> {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&0x0001u16.to_be_bytes());
    buf.extend_from_slice(&16u16.to_be_bytes());
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(&TOKEN);
    // an unknown comprehension-required attribute
    buf.extend_from_slice(&[0x7f, 0xff, 0x00, 0x00]);
    // an unknown comprehension-optional attribute, skipped silently
    buf.extend_from_slice(&[0x80, 0x01, 0x00, 0x00]);
    // RESPONSE-ADDRESS, a legacy type that is ignored, not reported
    buf.extend_from_slice(&[0x00, 0x02, 0x00, 0x00]);
    // CHANGE-ADDRESS, likewise
    buf.extend_from_slice(&[0x00, 0x03, 0x00, 0x00]);

    let mut decoder = Decoder::default();
    let message = decode(&mut decoder, &buf)?;

    assert_eq!(message.unknown_attributes(), &[0x7fff]);
    Ok(())
}

#[test]
fn channel_data_round_trip() -> Result<()> {
    let mut buf = BytesMut::with_capacity(1280);

    ChannelData {
        number: 0x4001,
        bytes: b"hello",
    }
    .encode(&mut buf);

    assert_eq!(&buf[..], &[0x40, 0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);

    let mut decoder = Decoder::default();
    match decoder.decode(&buf)? {
        DecodeResult::ChannelData(frame) => {
            assert_eq!(frame.number(), 0x4001);
            assert_eq!(frame.as_bytes(), b"hello");
        }
        DecodeResult::Message(_) => return Err(anyhow!("expected channel data")),
    }

    Ok(())
}

#[test]
fn channel_data_payload_stops_at_declared_length() -> Result<()> {
    // trailing padding after the declared length is not payload.
    let frame = [0x40u8, 0x01, 0x00, 0x02, b'h', b'i', 0x00, 0x00];
    let decoded = ChannelData::decode(&frame)?;

    assert_eq!(decoded.number(), 0x4001);
    assert_eq!(decoded.as_bytes(), b"hi");
    Ok(())
}

#[test]
fn decode_rejects_garbage() {
    let mut decoder = Decoder::default();

    // too short for any kind of frame
    assert!(decoder.decode(&[0x00, 0x01]).is_err());

    // the top two bits of the first byte must be 00 or 01
    assert!(decoder.decode(&[0xc0, 0x00, 0x00, 0x00]).is_err());

    // short of a full stun header
    assert!(decoder.decode(&[0u8; 19]).is_err());

    // a stun header with the wrong magic cookie
    let mut buf = vec![0x00, 0x01, 0x00, 0x00, 0xde, 0xad, 0xbe, 0xef];
    buf.extend_from_slice(&TOKEN);
    assert!(decoder.decode(&buf).is_err());

    // a truncated message, length field pointing past the datagram
    let mut buf = vec![0x00, 0x01, 0x00, 0x08];
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(&TOKEN);
    assert!(decoder.decode(&buf).is_err());
}

#[test]
fn legacy_attributes_are_ignored() -> Result<()> {
    let mut attributes = Attributes::default();

    let mut buf = BytesMut::new();
    buf.extend_from_slice(&0x0001u16.to_be_bytes());
    buf.extend_from_slice(&8u16.to_be_bytes());
    buf.extend_from_slice(&MAGIC_COOKIE.to_be_bytes());
    buf.extend_from_slice(&TOKEN);
    // PASSWORD and REFLECTED-FROM from RFC 3489
    buf.extend_from_slice(&[0x00, 0x07, 0x00, 0x00]);
    buf.extend_from_slice(&[0x00, 0x0b, 0x00, 0x00]);

    let message = Message::decode(&buf, &mut attributes)?;
    assert!(message.unknown_attributes().is_empty());

    Ok(())
}
