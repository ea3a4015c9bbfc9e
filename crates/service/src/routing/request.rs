use bytes::BytesMut;
use codec::message::{
    Message,
    attributes::{ErrorType, Nonce, Realm, UserName},
};

use crate::{ServiceHandler, allocation::FiveTuple, routing::State};

pub(crate) struct Request<'a, 'b, T, M>
where
    T: ServiceHandler,
{
    pub id: &'a FiveTuple,
    pub encode_buffer: &'b mut BytesMut,
    pub state: &'a State<T>,
    pub payload: &'a M,
}

impl<'a, 'b, T> Request<'a, 'b, T, Message<'a>>
where
    T: ServiceHandler + 'static,
{
    // Authenticate the request and return the username together with
    // the message-integrity key, which also signs the response.
    //
    // For the challenge mechanisms all of USERNAME, REALM, NONCE and
    // MESSAGE-INTEGRITY must be present, anything missing or not
    // matching is met with a fresh 401 challenge; only an outdated
    // nonce is reported separately as 438 so the client knows it can
    // retry with the same credentials.
    pub fn verify(&self) -> Result<(&'a str, Vec<u8>), ErrorType> {
        let Some(username) = self.payload.get::<UserName>() else {
            return Err(ErrorType::Unauthorized);
        };

        if self.state.credentials.is_long_term() {
            let Some(realm) = self.payload.get::<Realm>() else {
                return Err(ErrorType::Unauthorized);
            };

            let Some(nonce) = self.payload.get::<Nonce>() else {
                return Err(ErrorType::Unauthorized);
            };

            if realm != self.state.realm {
                return Err(ErrorType::Unauthorized);
            }

            if !self.state.allocations.verify_nonce(self.id, nonce) {
                return Err(ErrorType::StaleNonce);
            }
        }

        let Some(key) = self.state.credentials.key(username, &self.state.realm) else {
            return Err(ErrorType::Unauthorized);
        };

        if self.payload.checksum(&key).is_err() {
            return Err(ErrorType::Unauthorized);
        }

        Ok((username, key))
    }
}
