use std::net::IpAddr;

use codec::{
    channel_data::ChannelData,
    message::{
        Message, MessageEncoder,
        attributes::{
            ChannelNumber, Data, ErrorCode, ErrorType, EvenPort, Lifetime, MappedAddress, Nonce,
            Realm, RequestedTransport, ReservationToken, Software, TRANSPORT_UDP,
            UnknownAttributes, XorMappedAddress, XorPeerAddress, XorRelayedAddress,
        },
        methods::{
            ALLOCATE_RESPONSE, BINDING_RESPONSE, CHANNEL_BIND_RESPONSE,
            CREATE_PERMISSION_RESPONSE, REFRESH_RESPONSE,
        },
    },
};

use crate::{
    ServiceHandler,
    allocation::{Allocations, DEFAULT_LIFETIME, FiveTuple, MAX_LIFETIME},
    routing::{State, request::Request, response::Response},
};

// Clamp the client's desired lifetime into the server's bounds. An
// absent LIFETIME attribute asks for the default.
fn time_to_expiry(lifetime: Option<u32>) -> u32 {
    match lifetime {
        Some(it) => it.clamp(DEFAULT_LIFETIME, MAX_LIFETIME),
        None => DEFAULT_LIFETIME,
    }
}

// Turn a protocol error into an error response of the same method.
//
// The challenge mechanisms attach REALM and the current NONCE to auth
// failures so the client has everything it needs to retry.
fn reject<'a, T>(req: Request<'_, 'a, T, Message<'_>>, error: ErrorType) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let method = req.payload.method().error()?;

    {
        let mut message = MessageEncoder::extend(method, req.payload, req.encode_buffer);
        message.append::<ErrorCode>(ErrorCode::from(error));

        if matches!(error, ErrorType::Unauthorized | ErrorType::StaleNonce)
            && req.state.credentials.is_long_term()
        {
            let nonce = req.state.allocations.get_nonce(req.id);
            message.append::<Nonce>(&nonce);
            message.append::<Realm>(&req.state.realm);
        }

        message.flush(None).ok()?;
    }

    Some(Response {
        payload: req.encode_buffer,
        method,
    })
}

// A request carried a comprehension-required attribute the decoder did
// not recognize; per the rules it fails as a whole with the offending
// type codes listed back.
pub(crate) fn reject_unknown<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let method = req.payload.method().error()?;
    let unknown = req.payload.unknown_attributes().to_vec();

    log::warn!(
        "unknown comprehension-required attributes: client={}, attributes={:04x?}",
        req.id.client,
        unknown
    );

    {
        let mut message = MessageEncoder::extend(method, req.payload, req.encode_buffer);
        message.append::<ErrorCode>(ErrorCode::from(ErrorType::UnknownAttribute));
        message.append::<UnknownAttributes>(unknown);
        message.flush(None).ok()?;
    }

    Some(Response {
        payload: req.encode_buffer,
        method,
    })
}

/// [RFC5389](https://datatracker.ietf.org/doc/html/rfc5389)
///
/// As the Binding request passes through NATs on its way here, each
/// one rewrites the source transport address of the packet. The server
/// copies the source address it finally observed into an
/// XOR-MAPPED-ADDRESS attribute of the Binding response, and the
/// address survives the trip back because the NATs only rewrite the IP
/// header, not the STUN body. This is how a client learns its
/// reflexive transport address.
pub(crate) fn binding<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let mapped = req.state.mapped_address.unwrap_or(req.id.client);

    {
        let mut message = MessageEncoder::extend(BINDING_RESPONSE, req.payload, req.encode_buffer);
        message.append::<XorMappedAddress>(mapped);
        message.append::<MappedAddress>(mapped);
        message.append::<Software>(&req.state.software);
        message.flush(None).ok()?;
    }

    Some(Response {
        method: BINDING_RESPONSE,
        payload: req.encode_buffer,
    })
}

/// [RFC5766 Section 6.2](https://tools.ietf.org/html/rfc5766#section-6.2)
///
/// The Allocate checklist, in order: authenticate; an occupied
/// five-tuple with a foreign transaction id is a mismatch;
/// REQUESTED-TRANSPORT must be present and must be UDP;
/// RESERVATION-TOKEN and EVEN-PORT together are malformed, and either
/// alone asks for a reservation this server does not keep; then a
/// relay port is taken and the lifetime clamped into bounds.
///
/// The success response carries XOR-RELAYED-ADDRESS, LIFETIME and the
/// client's reflexive address in XOR-MAPPED-ADDRESS.
pub(crate) async fn allocate<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let (username, key) = match req.verify() {
        Ok(it) => it,
        Err(e) => return reject(req, e),
    };

    let mut transaction_id = [0u8; 12];
    transaction_id.copy_from_slice(req.payload.transaction_id());

    if let Some(existing) = req.state.allocations.get_transaction_id(req.id) {
        if existing != transaction_id {
            return reject(req, ErrorType::AllocationMismatch);
        }
    }

    let transport = match req.payload.get::<RequestedTransport>() {
        Some(it) => it,
        None => return reject(req, ErrorType::BadRequest),
    };

    if transport != TRANSPORT_UDP {
        return reject(req, ErrorType::UnsupportedTransportProtocol);
    }

    let reservation = req.payload.get::<ReservationToken>().is_some();
    let even_port = req.payload.get::<EvenPort>().is_some();
    if reservation && even_port {
        return reject(req, ErrorType::BadRequest);
    }

    // Port reservations are not kept; a client asking for one learns
    // that the capacity for it does not exist.
    if reservation || even_port {
        return reject(req, ErrorType::InsufficientCapacity);
    }

    let lifetime = time_to_expiry(req.payload.get::<Lifetime>());

    let relay_addr = match Allocations::allocate(
        &req.state.allocations,
        req.id,
        username,
        transaction_id,
        req.state.socket.clone(),
        req.state.endpoint.ip(),
        lifetime,
    )
    .await
    {
        Ok(it) => it,
        Err(e) => return reject(req, e),
    };

    let mapped = req.state.mapped_address.unwrap_or(req.id.client);

    {
        let mut message = MessageEncoder::extend(ALLOCATE_RESPONSE, req.payload, req.encode_buffer);
        message.append::<XorRelayedAddress>(relay_addr);
        message.append::<Lifetime>(lifetime);
        message.append::<XorMappedAddress>(mapped);
        message.append::<Software>(&req.state.software);
        message.flush(Some(key.as_slice())).ok()?;
    }

    Some(Response {
        method: ALLOCATE_RESPONSE,
        payload: req.encode_buffer,
    })
}

/// [RFC5766 Section 7.2](https://tools.ietf.org/html/rfc5766#section-7.2)
///
/// A zero desired lifetime destroys the allocation, any other value
/// extends it within the server's bounds. The success response echoes
/// the lifetime actually applied.
pub(crate) fn refresh<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let (_, key) = match req.verify() {
        Ok(it) => it,
        Err(e) => return reject(req, e),
    };

    let lifetime = match req.payload.get::<Lifetime>() {
        Some(0) => 0,
        other => time_to_expiry(other),
    };

    if !req.state.allocations.refresh(req.id, lifetime) {
        return reject(req, ErrorType::AllocationMismatch);
    }

    {
        let mut message = MessageEncoder::extend(REFRESH_RESPONSE, req.payload, req.encode_buffer);
        message.append::<Lifetime>(lifetime);
        message.flush(Some(key.as_slice())).ok()?;
    }

    Some(Response {
        method: REFRESH_RESPONSE,
        payload: req.encode_buffer,
    })
}

/// [RFC5766 Section 9.2](https://tools.ietf.org/html/rfc5766#section-9.2)
///
/// The CreatePermission request MUST contain at least one
/// XOR-PEER-ADDRESS attribute and MAY contain multiple. A permission
/// is installed or refreshed for the IP of each one; the ports are
/// irrelevant. The success response has no mandatory attributes.
pub(crate) fn create_permission<'a, T>(
    req: Request<'_, 'a, T, Message<'_>>,
) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let (_, key) = match req.verify() {
        Ok(it) => it,
        Err(e) => return reject(req, e),
    };

    let peers: Vec<IpAddr> = req
        .payload
        .get_all::<XorPeerAddress>()
        .map(|it| it.ip())
        .collect();

    if peers.is_empty() {
        return reject(req, ErrorType::BadRequest);
    }

    if !req.state.allocations.create_permission(req.id, &peers) {
        return reject(req, ErrorType::AllocationMismatch);
    }

    {
        MessageEncoder::extend(CREATE_PERMISSION_RESPONSE, req.payload, req.encode_buffer)
            .flush(Some(key.as_slice()))
            .ok()?;
    }

    Some(Response {
        method: CREATE_PERMISSION_RESPONSE,
        payload: req.encode_buffer,
    })
}

/// [RFC5766 Section 11.2](https://tools.ietf.org/html/rfc5766#section-11.2)
///
/// The request must carry CHANNEL-NUMBER and XOR-PEER-ADDRESS, the
/// channel number must lie in 0x4000-0x4FFF, and neither side of the
/// binding may already be bound to someone else. Success installs the
/// binding in both directions plus a permission for the peer IP, and
/// answers with an empty body.
pub(crate) fn channel_bind<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let (_, key) = match req.verify() {
        Ok(it) => it,
        Err(e) => return reject(req, e),
    };

    let Some(number) = req.payload.get::<ChannelNumber>() else {
        return reject(req, ErrorType::BadRequest);
    };

    if !(0x4000..=0x4FFF).contains(&number) {
        return reject(req, ErrorType::BadRequest);
    }

    let Some(peer) = req.payload.get::<XorPeerAddress>() else {
        return reject(req, ErrorType::BadRequest);
    };

    if let Err(e) = req.state.allocations.bind_channel(req.id, number, peer) {
        return reject(req, e);
    }

    {
        MessageEncoder::extend(CHANNEL_BIND_RESPONSE, req.payload, req.encode_buffer)
            .flush(Some(key.as_slice()))
            .ok()?;
    }

    Some(Response {
        method: CHANNEL_BIND_RESPONSE,
        payload: req.encode_buffer,
    })
}

/// [RFC5766 Section 10.2](https://tools.ietf.org/html/rfc5766#section-10.2)
///
/// Send indications are not authenticated. The indication MUST carry
/// XOR-PEER-ADDRESS and DATA; if either is missing or the permission
/// check fails, the message is discarded without a word, indications
/// are never answered with errors.
pub(crate) fn indication<'a, T>(req: Request<'_, 'a, T, Message<'_>>) -> Option<Response<'a>>
where
    T: ServiceHandler + 'static,
{
    let peer = req.payload.get::<XorPeerAddress>()?;
    let data = req.payload.get::<Data>()?;

    req.state.allocations.send_to_peer(req.id, peer, data);
    None
}

/// [RFC5766 Section 11.5](https://tools.ietf.org/html/rfc5766#section-11.5)
///
/// Channel data from the client goes to whatever peer the channel is
/// bound to on the allocation of the sender's five-tuple. Unbound
/// channels are silently discarded.
pub(crate) fn channel_data<T>(state: &State<T>, id: &FiveTuple, frame: &ChannelData<'_>)
where
    T: ServiceHandler + 'static,
{
    state
        .allocations
        .send_channel(id, frame.number(), frame.as_bytes());
}
