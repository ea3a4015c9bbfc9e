pub mod attributes;
pub mod methods;

use crate::{
    Attributes, Error,
    crypto::{fingerprint, hmac_sha1},
    message::{
        attributes::{Attribute, AttributeType, LEGACY_ATTRIBUTES, MessageIntegrity},
        methods::Method,
    },
};

use bytes::{BufMut, BytesMut};

pub static MAGIC_COOKIE: u32 = 0x2112A442;

pub struct MessageEncoder<'a> {
    token: &'a [u8],
    bytes: &'a mut BytesMut,
}

impl<'a> MessageEncoder<'a> {
    /// create a new message with the given transaction id.
    pub fn new(method: Method, token: &'a [u8; 12], bytes: &'a mut BytesMut) -> Self {
        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put(token.as_slice());

        Self { bytes, token }
    }

    /// rely on an old message to create a new message.
    ///
    /// The transaction id of the old message is echoed verbatim, which
    /// is how responses are paired with their requests.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use relay_server_codec::message::methods::*;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
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
    /// message.flush(None).unwrap();
    ///
    /// assert_eq!(&buf[..], &buffer[..]);
    /// ```
    pub fn extend(method: Method, reader: &Message<'a>, bytes: &'a mut BytesMut) -> Self {
        let token = reader.transaction_id();

        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put(token);
        Self { bytes, token }
    }

    /// append an attribute to the message attribute list.
    ///
    /// The length field of the attribute excludes the padding, while
    /// the message moves on to the next 4-byte boundary.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use relay_server_codec::message::attributes::*;
    /// use relay_server_codec::message::methods::*;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let new_buf = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
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
    ///
    /// assert_eq!(&new_buf[..], &buf[..]);
    /// ```
    pub fn append<'c, T: Attribute<'c>>(&'c mut self, value: T::Item) {
        self.bytes.put_u16(T::TYPE as u16);

        // reserve the length field, the real size is known only after
        // the body has been written.
        let os = self.bytes.len();
        self.bytes.put_u16(0);
        T::serialize(value, self.bytes, self.token);

        let size = self.bytes.len() - os - 2;
        self.bytes[os..os + 2].copy_from_slice(&(size as u16).to_be_bytes());

        let psize = alignment_32(size);
        if psize > 0 {
            self.bytes.put(&[0u8; 4][..psize]);
        }
    }

    /// back-patch the header length and finish the message.
    ///
    /// If a key is given, MESSAGE-INTEGRITY and FINGERPRINT are
    /// appended as the final two attributes.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use relay_server_codec::crypto::long_term_credential_digest;
    /// use relay_server_codec::message::methods::*;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x00, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b,
    /// ];
    ///
    /// let result = [
    ///     0, 1, 0, 32, 33, 18, 164, 66, 114, 109, 73, 66, 114, 82, 100, 72, 87,
    ///     98, 75, 43, 0, 8, 0, 20, 69, 14, 110, 68, 82, 30, 232, 222, 44, 240,
    ///     250, 182, 156, 92, 25, 23, 152, 198, 217, 222, 128, 40, 0, 4, 74, 165,
    ///     171, 86,
    /// ];
    ///
    /// let key = long_term_credential_digest("panda", "raspberry", "panda").unwrap();
    ///
    /// let mut attributes = Attributes::default();
    /// let mut buf = BytesMut::with_capacity(1280);
    /// let old = Message::decode(&buffer[..], &mut attributes).unwrap();
    /// let mut message = MessageEncoder::extend(BINDING_REQUEST, &old, &mut buf);
    ///
    /// message.flush(Some(key.as_slice())).unwrap();
    ///
    /// assert_eq!(&buf[..], &result);
    /// ```
    pub fn flush(&mut self, key: Option<&[u8]>) -> Result<(), Error> {
        // write attribute list size.
        self.set_len(self.bytes.len() - 20);

        // if need message integrity?
        if let Some(it) = key {
            self.checksum(it)?;
        }

        Ok(())
    }

    // append the MessageIntegrity and Fingerprint attributes.
    //
    // The HMAC covers the message with the header length pointing at
    // the end of the MessageIntegrity attribute; the CRC covers the
    // message with the header length extended over the Fingerprint
    // attribute as well.
    fn checksum(&mut self, key: &[u8]) -> Result<(), Error> {
        let len = self.bytes.len();

        self.set_len(len + 4);

        {
            let hmac = hmac_sha1(key, &[self.bytes])?;
            self.bytes.put_u16(AttributeType::MessageIntegrity as u16);
            self.bytes.put_u16(20);
            self.bytes.put(hmac.as_slice());
        }

        self.set_len(len + 4 + 8);

        let fingerprint = fingerprint(self.bytes);
        self.bytes.put_u16(AttributeType::Fingerprint as u16);
        self.bytes.put_u16(4);
        self.bytes.put_u32(fingerprint);

        Ok(())
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
    /// offset of the MessageIntegrity attribute, used for verification.
    size: u16,
    // message attribute list.
    attributes: &'a Attributes,
}

impl<'a> Message<'a> {
    /// message method.
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    /// message transaction id.
    #[inline]
    pub fn transaction_id(&self) -> &'a [u8] {
        &self.bytes[8..20]
    }

    /// get an attribute from the message attribute list.
    ///
    /// # Test
    ///
    /// ```
    /// use relay_server_codec::message::attributes::*;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x01, 0x00, 0x0c, 0x21, 0x12, 0xa4, 0x42, 0x72, 0x6d, 0x49,
    ///     0x42, 0x72, 0x52, 0x64, 0x48, 0x57, 0x62, 0x4b, 0x2b, 0x00, 0x06, 0x00,
    ///     0x05, 0x70, 0x61, 0x6e, 0x64, 0x61, 0x00, 0x00, 0x00,
    /// ];
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert_eq!(message.get::<UserName>(), Some("panda"));
    /// ```
    pub fn get<T: Attribute<'a>>(&self) -> Option<T::Item> {
        let range = self.attributes.get(&T::TYPE)?;
        T::deserialize(&self.bytes[range], self.transaction_id()).ok()
    }

    /// Gets all the values of an attribute from the list.
    ///
    /// A stun message can carry multiple attributes with the same type;
    /// CreatePermission uses this for its peer addresses.
    pub fn get_all<T: Attribute<'a>>(&self) -> impl Iterator<Item = T::Item> {
        self.attributes
            .get_all(&T::TYPE)
            .filter_map(|it| T::deserialize(&self.bytes[it.clone()], self.transaction_id()).ok())
    }

    /// Unrecognized comprehension-required attribute types found while
    /// decoding. A request carrying any of these must be answered with
    /// `420 Unknown Attribute`.
    pub fn unknown_attributes(&self) -> &[u16] {
        self.attributes.unknown()
    }

    /// check the MessageIntegrity attribute.
    ///
    /// Recomputes the HMAC over the received bytes with the header
    /// length re-adjusted the way the sender had it while signing.
    ///
    /// # Test
    ///
    /// ```
    /// use relay_server_codec::crypto::long_term_credential_digest;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
    ///
    /// let buffer = [
    ///     0x00u8, 0x03, 0x00, 0x50, 0x21, 0x12, 0xa4, 0x42, 0x64, 0x4f, 0x5a,
    ///     0x78, 0x6a, 0x56, 0x33, 0x62, 0x4b, 0x52, 0x33, 0x31, 0x00, 0x19, 0x00,
    ///     0x04, 0x11, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x05, 0x70, 0x61, 0x6e,
    ///     0x64, 0x61, 0x00, 0x00, 0x00, 0x00, 0x14, 0x00, 0x09, 0x72, 0x61, 0x73,
    ///     0x70, 0x62, 0x65, 0x72, 0x72, 0x79, 0x00, 0x00, 0x00, 0x00, 0x15, 0x00,
    ///     0x10, 0x31, 0x63, 0x31, 0x33, 0x64, 0x32, 0x62, 0x32, 0x34, 0x35, 0x62,
    ///     0x33, 0x61, 0x37, 0x33, 0x34, 0x00, 0x08, 0x00, 0x14, 0xd6, 0x78, 0x26,
    ///     0x99, 0x0e, 0x15, 0x56, 0x15, 0xe5, 0xf4, 0x24, 0x74, 0xe2, 0x3c, 0x26,
    ///     0xc5, 0xb1, 0x03, 0xb2, 0x6d,
    /// ];
    ///
    /// let key = long_term_credential_digest("panda", "raspberry", "panda").unwrap();
    ///
    /// let mut attributes = Attributes::default();
    /// let message = Message::decode(&buffer[..], &mut attributes).unwrap();
    ///
    /// assert!(message.checksum(&key).is_ok());
    /// ```
    pub fn checksum(&self, key: &[u8]) -> Result<(), Error> {
        if self.bytes.is_empty() || self.size < 20 {
            return Err(Error::InvalidInput);
        }

        // unwrap MessageIntegrity attribute,
        // an error occurs if not found.
        let integrity = self
            .get::<MessageIntegrity>()
            .ok_or(Error::NotFoundIntegrity)?;

        // the header length as it was when the sender signed: up to and
        // including the MessageIntegrity attribute.
        let size_buf = (self.size + 4).to_be_bytes();
        let body = [
            &self.bytes[0..2],
            &size_buf,
            &self.bytes[4..self.size as usize],
        ];

        if integrity != hmac_sha1(key, &body)?.as_slice() {
            return Err(Error::IntegrityFailed);
        }

        Ok(())
    }

    /// # Test
    ///
    /// ```
    /// use relay_server_codec::message::attributes::*;
    /// use relay_server_codec::message::methods::*;
    /// use relay_server_codec::message::*;
    /// use relay_server_codec::*;
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
    /// assert!(message.get::<UserName>().is_none());
    /// ```
    pub fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        let len = bytes.len();

        // There must be at least a complete header.
        if len < 20 {
            return Err(Error::InvalidInput);
        }

        let method = Method::try_from(u16::from_be_bytes(bytes[..2].try_into()?))?;

        // The length field counts attribute bytes only, the header is
        // not included. The datagram must hold the whole message.
        let size = u16::from_be_bytes(bytes[2..4].try_into()?) as usize + 20;
        if len < size {
            return Err(Error::InvalidInput);
        }

        // Check whether the magic cookie is the same.
        if bytes[4..8] != MAGIC_COOKIE.to_be_bytes() {
            return Err(Error::NotFoundMagicCookie);
        }

        let mut find_integrity = false;
        let mut content_len = 0;
        let mut offset = 20;

        while offset + 4 <= size {
            // get attribute type
            let key = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);

            // whether the MessageIntegrity attribute has been found,
            // if not found, record the current offset position.
            if !find_integrity {
                content_len = offset as u16;
            }

            // get attribute size
            let value_size = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;

            // check if the attribute length has overflowed.
            offset += 4;
            if size - offset < value_size {
                break;
            }

            // body range.
            let range = offset..(offset + value_size);

            // if there are padding bytes,
            // skip padding size.
            if value_size > 0 {
                offset += value_size + alignment_32(value_size);
            }

            match AttributeType::try_from(key) {
                Ok(kind) => {
                    // check whether the current attribute is MessageIntegrity,
                    // if it is, mark this attribute has been found.
                    if kind == AttributeType::MessageIntegrity {
                        find_integrity = true;
                    }

                    attributes.append(kind, range);
                }
                Err(_) => {
                    // comprehension-optional attributes may be skipped,
                    // but unknown comprehension-required ones are
                    // reported, except for the RFC 3489 leftovers.
                    if key < 0x8000 && !LEGACY_ATTRIBUTES.contains(&key) {
                        attributes.append_unknown(key);
                    }
                }
            }
        }

        Ok(Self {
            size: content_len,
            attributes,
            method,
            bytes,
        })
    }
}

/// compute padding size.
///
/// Attribute bodies are aligned on 4-byte boundaries.
///
/// # Test
///
/// ```
/// use relay_server_codec::message::alignment_32;
///
/// assert_eq!(alignment_32(4), 0);
/// assert_eq!(alignment_32(0), 0);
/// assert_eq!(alignment_32(5), 3);
/// ```
#[inline(always)]
pub fn alignment_32(size: usize) -> usize {
    let range = size % 4;
    if size == 0 || range == 0 {
        return 0;
    }

    4 - range
}
