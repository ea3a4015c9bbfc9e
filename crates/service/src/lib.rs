//! ## TURN relay service
//!
//! [RFC5766]: https://tools.ietf.org/html/rfc5766
//!
//! The service owns everything between a decoded datagram and the
//! socket it is answered on: the allocation table keyed by five-tuple,
//! the credential mechanisms, the per-allocation relay sockets with
//! their permissions and channel bindings, and the request routing
//! that ties the RFC 5766 processing rules together.
//!
//! One [`routing::Router`] is created per listening socket; a router
//! borrows nothing from the service and can live on its own task. All
//! routers share the same [`allocation::Allocations`] table, so a
//! client is free to talk to any listening interface.

pub mod allocation;
pub mod auth;
mod relay;
pub mod routing;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use tokio::net::UdpSocket;

use crate::{
    allocation::{Allocations, FiveTuple, ports::PortRange},
    auth::Credentials,
    routing::Router,
};

/// Observer of allocation lifecycle events.
///
/// The service calls these hooks after the corresponding operation has
/// been applied to the allocation table. They exist so the process can
/// log or account for sessions without the service knowing anything
/// about the logging backend.
pub trait ServiceHandler: Send + Sync {
    /// A relay port has been allocated for the session.
    #[allow(unused_variables)]
    fn on_allocated(&self, id: &FiveTuple, username: &str, port: u16) {}

    /// Permissions have been installed or refreshed for the peers.
    #[allow(unused_variables)]
    fn on_create_permission(&self, id: &FiveTuple, username: &str, peers: &[IpAddr]) {}

    /// A channel has been bound or refreshed.
    #[allow(unused_variables)]
    fn on_channel_bind(&self, id: &FiveTuple, username: &str, channel: u16) {}

    /// The allocation lifetime has been extended or, with a zero
    /// lifetime, the allocation has been released.
    #[allow(unused_variables)]
    fn on_refresh(&self, id: &FiveTuple, username: &str, lifetime: u32) {}

    /// The allocation is gone. Possible reasons: the lifetime expired,
    /// or the client released it with a zero-lifetime refresh.
    #[allow(unused_variables)]
    fn on_destroy(&self, id: &FiveTuple, username: &str) {}
}

pub struct ServiceOptions<T> {
    pub software: String,
    pub realm: String,
    /// Forces the XOR-MAPPED-ADDRESS value in responses. Useful when
    /// the server sits behind its own NAT and knows better than the
    /// socket what the clients can reach.
    pub mapped_address: Option<SocketAddr>,
    pub port_range: PortRange,
    pub credentials: Credentials,
    pub handler: T,
}

/// Turn service.
#[derive(Clone)]
pub struct Service<T> {
    allocations: Arc<Allocations<T>>,
    credentials: Arc<Credentials>,
    software: String,
    realm: String,
    mapped_address: Option<SocketAddr>,
}

impl<T> Service<T>
where
    T: ServiceHandler + 'static,
{
    /// Create turn service.
    pub fn new(options: ServiceOptions<T>) -> Self {
        Self {
            allocations: Allocations::new(options.port_range, options.handler),
            credentials: Arc::new(options.credentials),
            mapped_address: options.mapped_address,
            software: options.software,
            realm: options.realm,
        }
    }

    /// Create a router for one listening socket.
    ///
    /// `interface` is the local address the socket is bound to and
    /// `endpoint` the external address clients and peers can reach it
    /// on; the two only differ when the server sits behind static NAT.
    /// The socket handle is kept by the relays so that peer traffic
    /// can be written back to clients.
    pub fn make_router(
        &self,
        endpoint: SocketAddr,
        interface: SocketAddr,
        socket: Arc<UdpSocket>,
    ) -> Router<T> {
        Router::new(self, endpoint, interface, socket)
    }

    pub fn get_allocations(&self) -> &Arc<Allocations<T>> {
        &self.allocations
    }

    pub(crate) fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    pub(crate) fn software(&self) -> &str {
        &self.software
    }

    pub(crate) fn realm(&self) -> &str {
        &self.realm
    }

    pub(crate) fn mapped_address(&self) -> Option<SocketAddr> {
        self.mapped_address
    }
}
