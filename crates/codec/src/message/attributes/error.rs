use bytes::{BufMut, BytesMut};
use num_enum::TryFromPrimitive;

use crate::Error;

/// The error codes a server can put into an ERROR-CODE attribute,
/// with their recommended reason phrases. The discriminant is the wire
/// form: the class in the upper byte, the number in the lower byte.
///
/// 300  Try Alternate: The client should contact an alternate server
///      for this request.
///
/// 400  Bad Request: The request was malformed.  The client SHOULD NOT
///      retry the request without modification from the previous
///      attempt.
///
/// 401  Unauthorized: The request did not contain the correct
///      credentials to proceed.  The client should retry the request
///      with proper credentials.
///
/// 420  Unknown Attribute: The server received a STUN packet containing
///      a comprehension-required attribute that it did not understand.
///      The server MUST put this unknown attribute in the UNKNOWN-
///      ATTRIBUTE attribute of its error response.
///
/// 437  Allocation Mismatch: A request was received by the server that
///      requires an allocation to be in place, but no allocation
///      exists, or a request was received that requires no allocation,
///      but an allocation exists.
///
/// 438  Stale Nonce: The NONCE used by the client was no longer valid.
///      The client should retry, using the NONCE provided in the
///      response.
///
/// 442  Unsupported Transport Protocol: The Allocate request asked the
///      server to use a transport protocol between the server and the
///      peer that the server does not support.
///
/// 508  Insufficient Capacity: The server is unable to carry out the
///      request due to some capacity limit being reached.
///
/// 500  Server Error: The server has suffered a temporary error.  The
///      client should try again.
#[repr(u16)]
#[derive(TryFromPrimitive, PartialEq, Eq, Copy, Clone, Debug)]
pub enum ErrorType {
    TryAlternate = 0x0300,
    BadRequest = 0x0400,
    Unauthorized = 0x0401,
    Forbidden = 0x0403,
    UnknownAttribute = 0x0414,
    AllocationMismatch = 0x0425,
    StaleNonce = 0x0426,
    WrongCredentials = 0x0429,
    UnsupportedTransportProtocol = 0x042A,
    AllocationQuotaReached = 0x0456,
    ServerError = 0x0500,
    InsufficientCapacity = 0x0508,
}

/// [RFC3629]: https://datatracker.ietf.org/doc/html/rfc3629
/// [RFC7231]: https://datatracker.ietf.org/doc/html/rfc7231
///
/// The ERROR-CODE attribute is used in error response messages.  It
/// contains a numeric error code value in the range of 300 to 699 plus a
/// textual reason phrase encoded in UTF-8 [RFC3629]; it is also
/// consistent in its code assignments and semantics with SIP and HTTP
/// [RFC7231].
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
///
/// The class is the hundreds digit of the error code and MUST be
/// between 3 and 6; the number is the code modulo 100 and MUST be
/// between 0 and 99.
#[derive(Clone, Debug)]
pub struct ErrorCode<'a> {
    pub code: u16,
    pub message: &'a str,
}

impl ErrorCode<'_> {
    /// create an error attribute from an error type.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use relay_server_codec::message::attributes::error::*;
    ///
    /// ErrorCode::from(ErrorType::TryAlternate);
    /// ```
    pub fn from(code: ErrorType) -> Self {
        Self {
            code: code as u16,
            message: code.into(),
        }
    }

    /// encode the error attribute body.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use relay_server_codec::message::attributes::error::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74,
    ///     0x65, 0x72, 0x6e, 0x61, 0x74, 0x65,
    /// ];
    ///
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let error = ErrorCode::from(ErrorType::TryAlternate);
    /// error.encode(&mut buf);
    /// assert_eq!(&buf[..], &buffer);
    /// ```
    pub fn encode(self, buf: &mut BytesMut) {
        buf.put_u16(0x0000);
        buf.put_u16(self.code);
        buf.put(self.message.as_bytes());
    }
}

impl<'a> TryFrom<&'a [u8]> for ErrorCode<'a> {
    type Error = Error;

    /// # Test
    ///
    /// ```
    /// use relay_server_codec::message::attributes::error::*;
    /// use std::convert::TryFrom;
    ///
    /// let buffer = [
    ///     0x00u8, 0x00, 0x03, 0x00, 0x54, 0x72, 0x79, 0x20, 0x41, 0x6c, 0x74,
    ///     0x65, 0x72, 0x6e, 0x61, 0x74, 0x65,
    /// ];
    ///
    /// let error = ErrorCode::try_from(&buffer[..]).unwrap();
    /// assert_eq!(error.code, ErrorType::TryAlternate as u16);
    /// assert_eq!(error.message, "Try Alternate");
    /// ```
    fn try_from(packet: &'a [u8]) -> Result<Self, Self::Error> {
        if packet.len() < 4 {
            return Err(Error::InvalidInput);
        }

        Ok(Self {
            code: u16::from_be_bytes(packet[2..4].try_into()?),
            message: std::str::from_utf8(&packet[4..])?,
        })
    }
}

impl From<ErrorType> for &'static str {
    /// # Test
    ///
    /// ```
    /// use relay_server_codec::message::attributes::error::*;
    ///
    /// let reason: &'static str = ErrorType::TryAlternate.into();
    /// assert_eq!(reason, "Try Alternate");
    /// ```
    #[rustfmt::skip]
    fn from(val: ErrorType) -> Self {
        match val {
            ErrorType::TryAlternate => "Try Alternate",
            ErrorType::BadRequest => "Bad Request",
            ErrorType::Unauthorized => "Unauthorized",
            ErrorType::Forbidden => "Forbidden",
            ErrorType::UnknownAttribute => "Unknown Attribute",
            ErrorType::AllocationMismatch => "Allocation Mismatch",
            ErrorType::StaleNonce => "Stale Nonce",
            ErrorType::WrongCredentials => "Wrong Credentials",
            ErrorType::UnsupportedTransportProtocol => "Unsupported Transport Protocol",
            ErrorType::AllocationQuotaReached => "Allocation Quota Reached",
            ErrorType::ServerError => "Server Error",
            ErrorType::InsufficientCapacity => "Insufficient Capacity",
        }
    }
}

impl Eq for ErrorCode<'_> {}
impl PartialEq for ErrorCode<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}
