use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Result, anyhow};
use bytes::BytesMut;
use codec::{
    DecodeResult, Decoder,
    crypto::long_term_credential_digest,
    message::{
        Message, MessageEncoder,
        attributes::{
            ChannelNumber, Data, ErrorCode, ErrorType, Lifetime, Nonce, Realm,
            RequestedTransport, Software, TRANSPORT_UDP, UnknownAttributes, UserName,
            XorMappedAddress, XorPeerAddress, XorRelayedAddress,
        },
        methods::{
            ALLOCATE_ERROR, ALLOCATE_REQUEST, ALLOCATE_RESPONSE, BINDING_REQUEST,
            BINDING_RESPONSE, CHANNEL_BIND_REQUEST, CHANNEL_BIND_RESPONSE,
            CREATE_PERMISSION_REQUEST, CREATE_PERMISSION_RESPONSE, Method, REFRESH_REQUEST,
            REFRESH_RESPONSE, SEND_INDICATION,
        },
    },
};
use relay_server_service::{
    Service, ServiceHandler, ServiceOptions,
    allocation::ports::PortRange,
    auth::Credentials,
    routing::{RouteResult, Router},
};
use tokio::{net::UdpSocket, time::timeout};

const REALM: &str = "localhost";
const USERNAME: &str = "panda";
const PASSWORD: &str = "raspberry";

#[derive(Default, Clone)]
struct Handler;

impl ServiceHandler for Handler {}

struct Env {
    router: Router<Handler>,
    client: UdpSocket,
    client_addr: SocketAddr,
}

async fn setup() -> Result<Env> {
    let listen = Arc::new(UdpSocket::bind("127.0.0.1:0").await?);
    let interface = listen.local_addr()?;

    let users = [(USERNAME.to_string(), PASSWORD.to_string())]
        .into_iter()
        .collect::<std::collections::HashMap<_, _>>();

    let service = Service::new(ServiceOptions {
        software: "relay-server.test".to_string(),
        realm: REALM.to_string(),
        mapped_address: None,
        port_range: PortRange::default(),
        credentials: Credentials::long_term(REALM, &users)?,
        handler: Handler,
    });

    let router = service.make_router(interface, interface, listen.clone());

    let client = UdpSocket::bind("127.0.0.1:0").await?;
    let client_addr = client.local_addr()?;

    Ok(Env {
        router,
        client,
        client_addr,
    })
}

// Route a datagram and hand back an owned copy of the response bytes.
async fn route(env: &mut Env, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(match env.router.route(bytes, env.client_addr).await {
        RouteResult::Response(response) => Some(response.payload().to_vec()),
        RouteResult::None => None,
        RouteResult::Exceptional(e) => return Err(anyhow!("undecodable datagram: {:?}", e)),
    })
}

async fn route_expecting_response(env: &mut Env, bytes: &[u8]) -> Result<Vec<u8>> {
    route(env, bytes)
        .await?
        .ok_or_else(|| anyhow!("expected a response"))
}

fn parse<'a>(decoder: &'a mut Decoder, bytes: &'a [u8]) -> Result<Message<'a>> {
    match decoder.decode(bytes)? {
        DecodeResult::Message(message) => Ok(message),
        DecodeResult::ChannelData(_) => Err(anyhow!("expected a stun message")),
    }
}

fn expect_error(payload: &[u8], error: ErrorType) -> Result<()> {
    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, payload)?;

    assert!(message.method().is_error());
    assert_eq!(message.get::<ErrorCode>(), Some(ErrorCode::from(error)));
    Ok(())
}

// Build a credentialed request: the caller appends the method-specific
// attributes, then USERNAME/REALM/NONCE and the integrity checksum go
// on the end.
fn signed(
    method: Method,
    nonce: &str,
    buf: &mut BytesMut,
    build: impl FnOnce(&mut MessageEncoder<'_>),
) -> Result<()> {
    let key = long_term_credential_digest(USERNAME, REALM, PASSWORD)?;
    let token = rand::random::<[u8; 12]>();

    let mut message = MessageEncoder::new(method, &token, buf);
    build(&mut message);
    message.append::<UserName>(USERNAME);
    message.append::<Realm>(REALM);
    message.append::<Nonce>(nonce);
    message.flush(Some(key.as_slice()))?;
    Ok(())
}

// Send an unauthenticated request of the given method and harvest the
// nonce from the 401 challenge.
async fn challenge(env: &mut Env, method: Method) -> Result<String> {
    let token = rand::random::<[u8; 12]>();
    let mut buf = BytesMut::with_capacity(1280);
    MessageEncoder::new(method, &token, &mut buf).flush(None)?;

    let payload = route_expecting_response(env, &buf).await?;

    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(
        message.get::<ErrorCode>(),
        Some(ErrorCode::from(ErrorType::Unauthorized))
    );

    Ok(message
        .get::<Nonce>()
        .ok_or_else(|| anyhow!("expected a nonce"))?
        .to_string())
}

// Run the long-term credential dance: the unauthenticated Allocate is
// challenged with 401 + REALM + NONCE, the credentialed retry gets the
// relay address. Returns the relay address and the session nonce.
async fn allocate(env: &mut Env) -> Result<(SocketAddr, String)> {
    let mut buf = BytesMut::with_capacity(1280);

    let token = rand::random::<[u8; 12]>();
    {
        let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
        message.append::<RequestedTransport>(TRANSPORT_UDP);
        message.flush(None)?;
    }

    let payload = route_expecting_response(env, &buf).await?;
    let nonce = {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;

        assert_eq!(message.method(), ALLOCATE_ERROR);
        assert_eq!(
            message.get::<ErrorCode>(),
            Some(ErrorCode::from(ErrorType::Unauthorized))
        );
        assert_eq!(message.get::<Realm>(), Some(REALM));

        message
            .get::<Nonce>()
            .ok_or_else(|| anyhow!("expected a nonce"))?
            .to_string()
    };

    signed(ALLOCATE_REQUEST, &nonce, &mut buf, |message| {
        message.append::<RequestedTransport>(TRANSPORT_UDP);
    })?;

    let payload = route_expecting_response(env, &buf).await?;
    let key = long_term_credential_digest(USERNAME, REALM, PASSWORD)?;

    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(message.method(), ALLOCATE_RESPONSE);
    assert!(message.checksum(&key).is_ok());
    assert_eq!(message.get::<Lifetime>(), Some(600));
    assert_eq!(message.get::<XorMappedAddress>(), Some(env.client_addr));

    let relay = message
        .get::<XorRelayedAddress>()
        .ok_or_else(|| anyhow!("expected a relayed address"))?;

    Ok((relay, nonce))
}

async fn recv(socket: &UdpSocket) -> Result<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; 2048];
    let (size, source) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf)).await??;
    buf.truncate(size);
    Ok((buf, source))
}

#[tokio::test]
async fn binding_request_reflects_the_source_address() -> Result<()> {
    let mut env = setup().await?;

    let token = rand::random::<[u8; 12]>();
    let mut buf = BytesMut::with_capacity(1280);
    MessageEncoder::new(BINDING_REQUEST, &token, &mut buf).flush(None)?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(message.method(), BINDING_RESPONSE);
    assert_eq!(message.transaction_id(), &token);
    assert_eq!(message.get::<XorMappedAddress>(), Some(env.client_addr));
    assert!(message.get::<Software>().is_some());
    Ok(())
}

#[tokio::test]
async fn allocate_needs_credentials() -> Result<()> {
    let mut env = setup().await?;
    let (relay, _) = allocate(&mut env).await?;

    assert_eq!(relay.ip(), env.client_addr.ip());
    Ok(())
}

#[tokio::test]
async fn allocate_rejects_foreign_transports() -> Result<()> {
    let mut env = setup().await?;

    // any nonce will do for the challenge, the request only has to
    // fail authentication to learn the real one.
    let mut buf = BytesMut::with_capacity(1280);
    let token = rand::random::<[u8; 12]>();
    {
        let mut message = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
        message.append::<RequestedTransport>(0x06);
        message.flush(None)?;
    }

    let payload = route_expecting_response(&mut env, &buf).await?;
    let nonce = {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        message
            .get::<Nonce>()
            .ok_or_else(|| anyhow!("expected a nonce"))?
            .to_string()
    };

    // authenticated, but asking for TCP relaying
    signed(ALLOCATE_REQUEST, &nonce, &mut buf, |message| {
        message.append::<RequestedTransport>(0x06);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::UnsupportedTransportProtocol)
}

#[tokio::test]
async fn allocate_requires_a_transport() -> Result<()> {
    let mut env = setup().await?;
    let nonce = challenge(&mut env, ALLOCATE_REQUEST).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(ALLOCATE_REQUEST, &nonce, &mut buf, |_| {})?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::BadRequest)
}

#[tokio::test]
async fn allocate_twice_is_a_mismatch() -> Result<()> {
    let mut env = setup().await?;
    let (_, nonce) = allocate(&mut env).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(ALLOCATE_REQUEST, &nonce, &mut buf, |message| {
        message.append::<RequestedTransport>(TRANSPORT_UDP);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::AllocationMismatch)
}

#[tokio::test]
async fn retransmissions_replay_the_stored_response() -> Result<()> {
    let mut env = setup().await?;
    let (_, nonce) = allocate(&mut env).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(REFRESH_REQUEST, &nonce, &mut buf, |message| {
        message.append::<Lifetime>(900);
    })?;

    let first = route_expecting_response(&mut env, &buf).await?;
    let second = route_expecting_response(&mut env, &buf).await?;

    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn stale_nonces_are_challenged_again() -> Result<()> {
    let mut env = setup().await?;
    let (_, _nonce) = allocate(&mut env).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(REFRESH_REQUEST, "0123456789abcdef", &mut buf, |message| {
        message.append::<Lifetime>(900);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(
        message.get::<ErrorCode>(),
        Some(ErrorCode::from(ErrorType::StaleNonce))
    );

    // the response carries a fresh challenge
    assert!(message.get::<Nonce>().is_some());
    assert_eq!(message.get::<Realm>(), Some(REALM));
    Ok(())
}

#[tokio::test]
async fn unknown_comprehension_required_attributes_fail_the_request() -> Result<()> {
    let mut env = setup().await?;

    let token = rand::random::<[u8; 12]>();
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x04]);
    buf.extend_from_slice(&0x2112A442u32.to_be_bytes());
    buf.extend_from_slice(&token);
    buf.extend_from_slice(&[0x7f, 0xff, 0x00, 0x00]);

    let payload = route_expecting_response(&mut env, &buf).await?;
    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(
        message.get::<ErrorCode>(),
        Some(ErrorCode::from(ErrorType::UnknownAttribute))
    );
    assert_eq!(message.get::<UnknownAttributes>(), Some(vec![0x7fff]));
    Ok(())
}

#[tokio::test]
async fn create_permission_without_an_allocation_fails() -> Result<()> {
    let mut env = setup().await?;
    let nonce = challenge(&mut env, CREATE_PERMISSION_REQUEST).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(CREATE_PERMISSION_REQUEST, &nonce, &mut buf, |message| {
        message.append::<XorPeerAddress>("198.51.100.5:9999".parse().unwrap());
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::AllocationMismatch)
}

#[tokio::test]
async fn create_permission_then_send_reaches_the_peer() -> Result<()> {
    let mut env = setup().await?;
    let (relay, nonce) = allocate(&mut env).await?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(CREATE_PERMISSION_REQUEST, &nonce, &mut buf, |message| {
        message.append::<XorPeerAddress>(peer_addr);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        assert_eq!(message.method(), CREATE_PERMISSION_RESPONSE);
    }

    // indications are unauthenticated and unanswered
    let token = rand::random::<[u8; 12]>();
    {
        let mut message = MessageEncoder::new(SEND_INDICATION, &token, &mut buf);
        message.append::<XorPeerAddress>(peer_addr);
        message.append::<Data>(b"hi");
        message.flush(None)?;
    }

    assert!(route(&mut env, &buf).await?.is_none());

    let (data, source) = recv(&peer).await?;
    assert_eq!(data, b"hi");
    assert_eq!(source, relay);
    Ok(())
}

#[tokio::test]
async fn send_without_a_permission_is_dropped() -> Result<()> {
    let mut env = setup().await?;
    let (_, _nonce) = allocate(&mut env).await?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let token = rand::random::<[u8; 12]>();
    let mut buf = BytesMut::with_capacity(1280);
    {
        let mut message = MessageEncoder::new(SEND_INDICATION, &token, &mut buf);
        message.append::<XorPeerAddress>(peer_addr);
        message.append::<Data>(b"hi");
        message.flush(None)?;
    }

    assert!(route(&mut env, &buf).await?.is_none());

    let mut recv_buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(500), peer.recv_from(&mut recv_buf))
            .await
            .is_err()
    );

    Ok(())
}

#[tokio::test]
async fn channel_binding_relays_both_directions() -> Result<()> {
    let mut env = setup().await?;
    let (relay, nonce) = allocate(&mut env).await?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x4001);
        message.append::<XorPeerAddress>(peer_addr);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        assert_eq!(message.method(), CHANNEL_BIND_RESPONSE);
    }

    // client -> peer as a channel frame
    let mut frame = vec![0x40, 0x01, 0x00, 0x05];
    frame.extend_from_slice(b"hello");
    assert!(route(&mut env, &frame).await?.is_none());

    let (data, source) = recv(&peer).await?;
    assert_eq!(data, b"hello");
    assert_eq!(source, relay);

    // peer -> client comes back framed on the same channel
    peer.send_to(b"world", relay).await?;
    let (data, _) = recv(&env.client).await?;
    assert_eq!(&data, &[0x40, 0x01, 0x00, 0x05, b'w', b'o', b'r', b'l', b'd']);

    Ok(())
}

#[tokio::test]
async fn channel_bindings_are_exclusive() -> Result<()> {
    let mut env = setup().await?;
    let (_, nonce) = allocate(&mut env).await?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let other = UdpSocket::bind("127.0.0.1:0").await?;
    let other_addr = other.local_addr()?;

    let mut buf = BytesMut::with_capacity(1280);

    // channel numbers below 0x4000 are out of range
    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x3fff);
        message.append::<XorPeerAddress>(peer_addr);
    })?;
    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::BadRequest)?;

    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x4001);
        message.append::<XorPeerAddress>(peer_addr);
    })?;
    let payload = route_expecting_response(&mut env, &buf).await?;
    {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        assert_eq!(message.method(), CHANNEL_BIND_RESPONSE);
    }

    // rebinding the same pair refreshes it
    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x4001);
        message.append::<XorPeerAddress>(peer_addr);
    })?;
    let payload = route_expecting_response(&mut env, &buf).await?;
    {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        assert_eq!(message.method(), CHANNEL_BIND_RESPONSE);
    }

    // the channel is taken by another peer address
    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x4001);
        message.append::<XorPeerAddress>(other_addr);
    })?;
    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::BadRequest)?;

    // and the peer is taken by another channel
    signed(CHANNEL_BIND_REQUEST, &nonce, &mut buf, |message| {
        message.append::<ChannelNumber>(0x4002);
        message.append::<XorPeerAddress>(peer_addr);
    })?;
    let payload = route_expecting_response(&mut env, &buf).await?;
    expect_error(&payload, ErrorType::BadRequest)?;

    Ok(())
}

#[tokio::test]
async fn refresh_to_zero_destroys_the_allocation() -> Result<()> {
    let mut env = setup().await?;
    let (_, nonce) = allocate(&mut env).await?;

    let peer = UdpSocket::bind("127.0.0.1:0").await?;
    let peer_addr = peer.local_addr()?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(CREATE_PERMISSION_REQUEST, &nonce, &mut buf, |message| {
        message.append::<XorPeerAddress>(peer_addr);
    })?;
    route_expecting_response(&mut env, &buf).await?;

    signed(REFRESH_REQUEST, &nonce, &mut buf, |message| {
        message.append::<Lifetime>(0);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    {
        let mut decoder = Decoder::default();
        let message = parse(&mut decoder, &payload)?;
        assert_eq!(message.method(), REFRESH_RESPONSE);
        assert_eq!(message.get::<Lifetime>(), Some(0));
    }

    // the five-tuple no longer relays anything
    let token = rand::random::<[u8; 12]>();
    {
        let mut message = MessageEncoder::new(SEND_INDICATION, &token, &mut buf);
        message.append::<XorPeerAddress>(peer_addr);
        message.append::<Data>(b"hi");
        message.flush(None)?;
    }

    assert!(route(&mut env, &buf).await?.is_none());

    let mut recv_buf = [0u8; 64];
    assert!(
        timeout(Duration::from_millis(500), peer.recv_from(&mut recv_buf))
            .await
            .is_err()
    );

    Ok(())
}

#[tokio::test]
async fn refresh_clamps_the_lifetime() -> Result<()> {
    let mut env = setup().await?;
    let (_, nonce) = allocate(&mut env).await?;

    let mut buf = BytesMut::with_capacity(1280);
    signed(REFRESH_REQUEST, &nonce, &mut buf, |message| {
        message.append::<Lifetime>(86400);
    })?;

    let payload = route_expecting_response(&mut env, &buf).await?;
    let mut decoder = Decoder::default();
    let message = parse(&mut decoder, &payload)?;

    assert_eq!(message.method(), REFRESH_RESPONSE);
    assert_eq!(message.get::<Lifetime>(), Some(3600));
    Ok(())
}
