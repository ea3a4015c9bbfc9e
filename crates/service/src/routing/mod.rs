mod handlers;
mod request;
mod response;

pub use self::response::Response;

use crate::{
    Service, ServiceHandler,
    allocation::{Allocations, FiveTuple},
    auth::Credentials,
    routing::request::Request,
};

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use codec::{DecodeResult, Decoder, message::methods::*};
use tokio::net::UdpSocket;

pub(crate) struct State<T>
where
    T: ServiceHandler,
{
    pub realm: String,
    pub software: String,
    pub mapped_address: Option<SocketAddr>,
    pub credentials: Arc<Credentials>,
    pub allocations: Arc<Allocations<T>>,
    // The external address of this interface and the local address the
    // socket is bound to.
    pub endpoint: SocketAddr,
    pub interface: SocketAddr,
    // The listening socket itself; relays write peer traffic back to
    // clients through it.
    pub socket: Arc<UdpSocket>,
}

#[derive(Debug)]
pub enum RouteResult<'a> {
    Exceptional(codec::Error),
    Response(Response<'a>),
    None,
}

/// Per-socket request router.
///
/// Owns a decoder and an encode buffer so that routing a datagram
/// allocates nothing; the shared service state sits behind `Arc`s.
pub struct Router<T>
where
    T: ServiceHandler,
{
    id: FiveTuple,
    state: State<T>,
    decoder: Decoder,
    bytes: BytesMut,
}

impl<T> Router<T>
where
    T: ServiceHandler + 'static,
{
    pub(crate) fn new(
        service: &Service<T>,
        endpoint: SocketAddr,
        interface: SocketAddr,
        socket: Arc<UdpSocket>,
    ) -> Self {
        Self {
            bytes: BytesMut::with_capacity(4096),
            decoder: Decoder::default(),
            id: FiveTuple {
                client: "0.0.0.0:0".parse().unwrap(),
                interface,
            },
            state: State {
                allocations: service.get_allocations().clone(),
                credentials: service.credentials().clone(),
                mapped_address: service.mapped_address(),
                software: service.software().to_string(),
                realm: service.realm().to_string(),
                interface,
                endpoint,
                socket,
            },
        }
    }

    /// Process one datagram received from `source` on this socket.
    ///
    /// Requests yield a response to send back to the source; replayed
    /// transactions are answered with the stored bytes; indications,
    /// channel data and anything dropped yield nothing.
    pub async fn route<'a, 'b: 'a>(
        &'b mut self,
        bytes: &'b [u8],
        source: SocketAddr,
    ) -> RouteResult<'a> {
        {
            self.id.client = source;
        }

        let payload = match self.decoder.decode(bytes) {
            Ok(it) => it,
            Err(e) => return RouteResult::Exceptional(e),
        };

        match payload {
            DecodeResult::ChannelData(frame) => {
                handlers::channel_data(&self.state, &self.id, &frame);

                RouteResult::None
            }
            DecodeResult::Message(message) => {
                let is_request = message.method().is_request();

                // A replayed transaction gets the stored response,
                // byte-identical, nothing recomputed.
                if is_request {
                    if let Some(cached) = self
                        .state
                        .allocations
                        .cached_response(&self.id, message.transaction_id())
                    {
                        self.bytes.clear();
                        self.bytes.extend_from_slice(&cached);

                        return RouteResult::Response(Response {
                            method: message.method(),
                            payload: &self.bytes,
                        });
                    }
                }

                let mut transaction_id = [0u8; 12];
                transaction_id.copy_from_slice(message.transaction_id());

                let has_unknown = !message.unknown_attributes().is_empty();

                let req = Request {
                    id: &self.id,
                    state: &self.state,
                    encode_buffer: &mut self.bytes,
                    payload: &message,
                };

                let result = if is_request && has_unknown {
                    handlers::reject_unknown(req)
                } else {
                    match message.method() {
                        BINDING_REQUEST => handlers::binding(req),
                        ALLOCATE_REQUEST => handlers::allocate(req).await,
                        CREATE_PERMISSION_REQUEST => handlers::create_permission(req),
                        CHANNEL_BIND_REQUEST => handlers::channel_bind(req),
                        REFRESH_REQUEST => handlers::refresh(req),
                        SEND_INDICATION => handlers::indication(req),
                        _ => None,
                    }
                };

                if is_request {
                    if let Some(response) = &result {
                        self.state.allocations.cache_response(
                            &self.id,
                            &transaction_id,
                            response.payload(),
                        );
                    }
                }

                result.map(RouteResult::Response).unwrap_or(RouteResult::None)
            }
        }
    }
}
