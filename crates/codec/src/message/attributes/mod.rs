pub mod address;
pub mod error;

use std::net::SocketAddr;

use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

pub use self::{
    address::Addr,
    error::{ErrorCode, ErrorType},
};

use crate::Error;

/// Attribute type registry.
///
/// Types in the range 0x0000-0x7FFF are comprehension-required; an
/// unrecognized type from that range makes the request fail with
/// `420 Unknown Attribute`. Types in 0x8000-0xFFFF are
/// comprehension-optional and may be skipped silently.
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Hash, Debug, Clone, Copy)]
pub enum AttributeType {
    MappedAddress = 0x0001,
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    UnknownAttributes = 0x000A,
    ChannelNumber = 0x000C,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    EvenPort = 0x0018,
    RequestedTransport = 0x0019,
    DontFragment = 0x001A,
    XorMappedAddress = 0x0020,
    ReservationToken = 0x0022,
    Software = 0x8022,
    AlternateServer = 0x8023,
    Fingerprint = 0x8028,
}

/// RFC 3489 legacy attribute types. These are comprehension-required by
/// their code point but are ignored for backwards compatibility instead
/// of triggering a 420.
pub const LEGACY_ATTRIBUTES: [u16; 6] = [
    0x0002, // RESPONSE-ADDRESS
    0x0003, // CHANGE-ADDRESS
    0x0004, // SOURCE-ADDRESS
    0x0005, // CHANGED-ADDRESS
    0x0007, // PASSWORD
    0x000B, // REFLECTED-FROM
];

/// A typed stun/turn message attribute.
///
/// `serialize` writes the attribute body only; the type and length
/// fields and the padding are the encoder's business. The transaction
/// id is passed through for the XOR'ed address attributes.
pub trait Attribute<'a> {
    const TYPE: AttributeType;
    type Item;

    /// write the attribute body to the buffer.
    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]);
    /// read the attribute body from the buffer.
    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error>;
}

/// The USERNAME attribute is used for message integrity.  It identifies
/// the username and password combination used in the message-integrity
/// check. It MUST contain a UTF-8-encoded sequence of fewer than 513
/// bytes.
pub struct UserName;

impl<'a> Attribute<'a> for UserName {
    const TYPE: AttributeType = AttributeType::UserName;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// The DATA attribute is present in all Send and Data indications.  The
/// value portion of this attribute is variable length and consists of
/// the application data (that is, the data that would immediately follow
/// the UDP header if the data was sent directly between the client
/// and the peer).
pub struct Data;

impl<'a> Attribute<'a> for Data {
    const TYPE: AttributeType = AttributeType::Data;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// The REALM attribute may be present in requests and responses.
///
/// Presence of the REALM attribute in a request indicates that long-term
/// credentials are being used for authentication.  Presence in certain
/// error responses indicates that the server wishes the client to use a
/// long-term credential in that realm for authentication.
pub struct Realm;

impl<'a> Attribute<'a> for Realm {
    const TYPE: AttributeType = AttributeType::Realm;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// The NONCE attribute may be present in requests and responses. A
/// server handing out long-term credentials challenges clients with a
/// fresh nonce and answers requests carrying an outdated one with
/// `438 Stale Nonce`.
pub struct Nonce;

impl<'a> Attribute<'a> for Nonce {
    const TYPE: AttributeType = AttributeType::Nonce;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// The SOFTWARE attribute contains a textual description of the software
/// being used by the agent sending the message.  The attribute has no
/// impact on operation of the protocol and serves only as a tool for
/// diagnostic and debugging purposes.
pub struct Software;

impl<'a> Attribute<'a> for Software {
    const TYPE: AttributeType = AttributeType::Software;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(bytes)?)
    }
}

/// The MESSAGE-INTEGRITY attribute contains an HMAC-SHA1 of the STUN
/// message, and is therefore always 20 bytes.
///
/// The text used as input to HMAC is the STUN message, up to and
/// including the attribute preceding the MESSAGE-INTEGRITY attribute,
/// with the Length field of the header adjusted to point to the end of
/// the MESSAGE-INTEGRITY attribute.
pub struct MessageIntegrity;

impl<'a> Attribute<'a> for MessageIntegrity {
    const TYPE: AttributeType = AttributeType::MessageIntegrity;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put(value);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(bytes)
    }
}

/// The ERROR-CODE attribute, carried by every error response.
impl<'a> Attribute<'a> for ErrorCode<'a> {
    const TYPE: AttributeType = AttributeType::ErrorCode;
    type Item = ErrorCode<'a>;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        value.encode(bytes);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        ErrorCode::try_from(bytes)
    }
}

/// The UNKNOWN-ATTRIBUTES attribute is present only in an error
/// response when the response code is 420. Its body is the list of
/// 16-bit attribute types the server did not understand.
pub struct UnknownAttributes;

impl<'a> Attribute<'a> for UnknownAttributes {
    const TYPE: AttributeType = AttributeType::UnknownAttributes;
    type Item = Vec<u16>;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        for kind in value {
            bytes.put_u16(kind);
        }
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.len() % 2 != 0 {
            return Err(Error::InvalidInput);
        }

        Ok(bytes
            .chunks_exact(2)
            .map(|it| u16::from_be_bytes([it[0], it[1]]))
            .collect())
    }
}

/// The XOR-PEER-ADDRESS specifies the address and port of the peer as
/// seen from the TURN server.  It is encoded in the same way as
/// XOR-MAPPED-ADDRESS.
pub struct XorPeerAddress;

impl<'a> Attribute<'a> for XorPeerAddress {
    const TYPE: AttributeType = AttributeType::XorPeerAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, bytes, true)
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        Addr::decode(bytes, token, true)
    }
}

/// The XOR-RELAYED-ADDRESS is present in Allocate responses.  It
/// specifies the address and port that the server allocated to the
/// client.  It is encoded in the same way as XOR-MAPPED-ADDRESS.
pub struct XorRelayedAddress;

impl<'a> Attribute<'a> for XorRelayedAddress {
    const TYPE: AttributeType = AttributeType::XorRelayedAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, bytes, true)
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        Addr::decode(bytes, token, true)
    }
}

/// The XOR-MAPPED-ADDRESS attribute is identical to the MAPPED-ADDRESS
/// attribute, except that the reflexive transport address is obfuscated
/// through the XOR function, so that well-meaning NATs do not rewrite
/// the address bytes in flight.
pub struct XorMappedAddress;

impl<'a> Attribute<'a> for XorMappedAddress {
    const TYPE: AttributeType = AttributeType::XorMappedAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, bytes, true)
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        Addr::decode(bytes, token, true)
    }
}

/// The MAPPED-ADDRESS attribute indicates a reflexive transport address
/// of the client, encoded in plain binary. It is used only by servers
/// for achieving backwards compatibility with RFC 3489 clients.
pub struct MappedAddress;

impl<'a> Attribute<'a> for MappedAddress {
    const TYPE: AttributeType = AttributeType::MappedAddress;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, bytes, false)
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        Addr::decode(bytes, token, false)
    }
}

/// The ALTERNATE-SERVER attribute carries an alternate transport
/// address where the client should have sent its request, encoded the
/// same way as MAPPED-ADDRESS.
pub struct AlternateServer;

impl<'a> Attribute<'a> for AlternateServer {
    const TYPE: AttributeType = AttributeType::AlternateServer;
    type Item = SocketAddr;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]) {
        Addr::encode(&value, token, bytes, false)
    }

    fn deserialize(bytes: &'a [u8], token: &'a [u8]) -> Result<Self::Item, Error> {
        Addr::decode(bytes, token, false)
    }
}

/// The LIFETIME attribute represents the duration for which the server
/// will maintain an allocation in the absence of a refresh.  The value
/// is a 32-bit unsigned number of seconds remaining until expiration.
pub struct Lifetime;

impl<'a> Attribute<'a> for Lifetime {
    const TYPE: AttributeType = AttributeType::Lifetime;
    type Item = u32;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u32(value)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// Protocol number for UDP in REQUESTED-TRANSPORT.
pub const TRANSPORT_UDP: u8 = 0x11;

/// This attribute is used by the client to request a specific transport
/// protocol for the allocated transport address:
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Protocol   |                    RFFU                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The raw protocol byte is handed to the caller so that an
/// unsupported protocol can be answered with the proper error code
/// rather than being mistaken for a missing attribute.
pub struct RequestedTransport;

impl<'a> Attribute<'a> for RequestedTransport {
    const TYPE: AttributeType = AttributeType::RequestedTransport;
    type Item = u8;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u8(value);
        bytes.put(&[0u8; 3][..]);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput);
        }

        Ok(bytes[0])
    }
}

/// The EVEN-PORT attribute asks the server for an even relay port
/// number; the `R` bit additionally asks it to reserve the next higher
/// port. Its body is the `R` bit followed by 7 reserved bits.
pub struct EvenPort;

impl<'a> Attribute<'a> for EvenPort {
    const TYPE: AttributeType = AttributeType::EvenPort;
    type Item = bool;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u8(if value { 0x80 } else { 0x00 });
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput);
        }

        Ok(bytes[0] >> 7 == 1)
    }
}

/// The DONT-FRAGMENT attribute has no body; its mere presence asks the
/// server to set the DF bit on datagrams it relays to the peer.
pub struct DontFragment;

impl<'a> Attribute<'a> for DontFragment {
    const TYPE: AttributeType = AttributeType::DontFragment;
    type Item = ();

    fn serialize(_: Self::Item, _: &mut BytesMut, _: &[u8]) {}

    fn deserialize(_: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(())
    }
}

/// The RESERVATION-TOKEN attribute contains an 8-byte token that
/// uniquely identifies a relayed transport address being held in
/// reserve by the server.
pub struct ReservationToken;

impl<'a> Attribute<'a> for ReservationToken {
    const TYPE: AttributeType = AttributeType::ReservationToken;
    type Item = u64;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u64(value)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u64::from_be_bytes(bytes.try_into()?))
    }
}

/// The CHANNEL-NUMBER attribute contains the number of the channel.
/// The body is the 16-bit channel number followed by a two-octet RFFU
/// field which MUST be set to 0 on transmission and ignored on
/// reception.
pub struct ChannelNumber;

impl<'a> Attribute<'a> for ChannelNumber {
    const TYPE: AttributeType = AttributeType::ChannelNumber;
    type Item = u16;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u16(value);
        bytes.put_u16(0);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        if bytes.len() < 2 {
            return Err(Error::InvalidInput);
        }

        Ok(u16::from_be_bytes(bytes[..2].try_into()?))
    }
}

/// The FINGERPRINT attribute MAY be present in all STUN messages.
///
/// The value of the attribute is computed as the CRC-32 of the STUN
/// message up to (but excluding) the FINGERPRINT attribute itself,
/// XOR'ed with the 32-bit value 0x5354554e.  When present, the
/// FINGERPRINT attribute MUST be the last attribute in the message.
///
/// As with MESSAGE-INTEGRITY, the CRC covers the Length field from the
/// STUN message header, so that field must include the FINGERPRINT
/// attribute before the CRC is computed.
pub struct Fingerprint;

impl<'a> Attribute<'a> for Fingerprint {
    const TYPE: AttributeType = AttributeType::Fingerprint;
    type Item = u32;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _: &[u8]) {
        bytes.put_u32(value)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}
