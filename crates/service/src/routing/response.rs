use codec::message::methods::Method;

/// An encoded response ready to be written back to the source of the
/// request. Indications and dropped datagrams produce no response.
#[derive(Debug)]
pub struct Response<'a> {
    pub(crate) method: Method,
    pub(crate) payload: &'a [u8],
}

impl<'a> Response<'a> {
    /// The method of the response.
    #[inline(always)]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Whether the response reports a protocol error.
    #[inline(always)]
    pub fn is_error(&self) -> bool {
        self.method.is_error()
    }

    /// The encoded bytes of the response.
    #[inline(always)]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}
