//! ## Session Traversal Utilities for NAT (STUN)
//!
//! [RFC5389]: https://tools.ietf.org/html/rfc5389
//! [RFC5766]: https://tools.ietf.org/html/rfc5766
//!
//! STUN is a client-server protocol carried in fixed 20-byte-header
//! messages followed by a list of type-length-value attributes. TURN
//! [RFC5766] extends STUN with relaying methods and with a compact
//! 4-byte channel-data framing for payload traffic. Both message kinds
//! share one UDP socket and are told apart by the two most significant
//! bits of the first byte: `00` is a STUN message, `01` is channel data.
//!
//! This crate implements the wire codec only. It performs no I/O and
//! holds no protocol state beyond a reusable attribute cache.

pub mod channel_data;
pub mod crypto;
pub mod message;

use self::{
    channel_data::ChannelData,
    message::{Message, attributes::AttributeType},
};

use std::{array::TryFromSliceError, ops::Range, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    SummaryFailed,
    NotFoundIntegrity,
    IntegrityFailed,
    NotFoundMagicCookie,
    UnknownMethod,
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

pub enum DecodeResult<'a> {
    Message(Message<'a>),
    ChannelData(ChannelData<'a>),
}

/// A cache of the list of attributes, this is for internal use only.
///
/// Besides the recognized attributes it records the type codes of
/// comprehension-required attributes the decoder did not understand, so
/// that the server can answer with `420 Unknown Attribute`.
#[derive(Debug, Clone)]
pub struct Attributes {
    list: Vec<(AttributeType, Range<usize>)>,
    unknown: Vec<u16>,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            list: Vec::with_capacity(20),
            unknown: Vec::new(),
        }
    }
}

impl Attributes {
    /// Adds an attribute to the list.
    pub fn append(&mut self, kind: AttributeType, range: Range<usize>) {
        self.list.push((kind, range));
    }

    /// Records an unrecognized comprehension-required attribute type.
    pub fn append_unknown(&mut self, kind: u16) {
        self.unknown.push(kind);
    }

    /// Gets an attribute from the list.
    ///
    /// Note: This function will only look for the first matching property in
    /// the list and return it.
    pub fn get(&self, kind: &AttributeType) -> Option<Range<usize>> {
        self.list
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, v)| v.clone())
    }

    /// Gets all the values of an attribute from a list.
    ///
    /// Normally a stun message can have multiple attributes with the same name,
    /// and this function will all the values of the current attribute.
    pub fn get_all<'a>(
        &'a self,
        kind: &'a AttributeType,
    ) -> impl Iterator<Item = &'a Range<usize>> {
        self.list
            .iter()
            .filter(move |(k, _)| k == kind)
            .map(|(_, v)| v)
    }

    /// Unrecognized comprehension-required attribute types, in the order
    /// they appeared.
    pub fn unknown(&self) -> &[u16] {
        &self.unknown
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.unknown.clear();
    }
}

#[derive(Default)]
pub struct Decoder(Attributes);

impl Decoder {
    /// # Test
    ///
    /// ```
    /// use relay_server_codec::message::attributes::UserName;
    /// use relay_server_codec::{DecodeResult, Decoder};
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let mut decoder = Decoder::default();
    /// let payload = decoder.decode(&buffer).unwrap();
    ///
    /// if let DecodeResult::Message(message) = payload {
    ///     assert!(message.get::<UserName>().is_none())
    /// } else {
    ///     panic!("expected a stun message");
    /// }
    /// ```
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> Result<DecodeResult<'a>, Error> {
        if bytes.len() < 4 {
            return Err(Error::InvalidInput);
        }

        Ok(match bytes[0] >> 6 {
            0 => {
                self.0.clear();

                DecodeResult::Message(Message::decode(bytes, &mut self.0)?)
            }
            1 => DecodeResult::ChannelData(ChannelData::decode(bytes)?),
            _ => return Err(Error::InvalidInput),
        })
    }
}
