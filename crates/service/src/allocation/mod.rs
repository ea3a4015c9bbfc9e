pub mod ports;

use crate::{
    ServiceHandler,
    allocation::ports::{PortAllocator, PortRange},
    relay,
};

use std::{
    net::{IpAddr, SocketAddr},
    ops::{Deref, DerefMut},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, sleep},
    time::Duration,
};

use ahash::{HashMap, HashMapExt};
use codec::message::attributes::ErrorType;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::{net::UdpSocket, task::AbortHandle};

/// Default allocation lifetime in seconds; also the lower clamp bound
/// for client-requested lifetimes.
pub const DEFAULT_LIFETIME: u32 = 600;

/// Upper clamp bound for client-requested allocation lifetimes.
pub const MAX_LIFETIME: u32 = 3600;

/// Permissions last 300 seconds and are refreshed by CreatePermission.
pub const PERMISSION_LIFETIME: u64 = 300;

/// Channel bindings last 600 seconds and are refreshed by repeating
/// the same ChannelBind.
pub const CHANNEL_LIFETIME: u64 = 600;

// Sent responses are kept long enough to cover the full client
// retransmission schedule, then forgotten.
const RESPONSE_LIFETIME: u64 = 10;

// How long an auth session keeps its nonce without traffic.
const NONCE_LIFETIME: u64 = 600;

/// The five-tuple identifying an allocation.
///
/// (client IP, client port, server IP, server port, transport); the
/// transport protocol here is always UDP, so two socket addresses are
/// enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub client: SocketAddr,
    pub interface: SocketAddr,
}

/// The default HashMap is created without allocating capacity. To improve
/// performance, the turn server needs to pre-allocate the available capacity.
///
/// So here the HashMap is rewrapped to allocate a large capacity at the
/// default creation time as well.
pub struct Table<K, V>(HashMap<K, V>);

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self(HashMap::with_capacity(1024))
    }
}

impl<K, V> Deref for Table<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K, V> DerefMut for Table<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// A specially optimised timer.
///
/// This timer does not advance on its own, the sweeper thread steps it
/// once a second. Everything that expires measures time in its ticks.
///
/// ```
/// use relay_server_service::allocation::Timer;
///
/// let timer = Timer::default();
///
/// assert_eq!(timer.get(), 0);
/// assert_eq!(timer.add(), 1);
/// assert_eq!(timer.get(), 1);
/// ```
#[derive(Default)]
pub struct Timer(AtomicU64);

impl Timer {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn add(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// Nonce handed to a client five-tuple during the long-term credential
// challenge.
struct SessionNonce {
    nonce: String,
    expires: u64,
}

// The last response sent to a five-tuple. Retransmitted requests are
// answered with these exact bytes; the integrity and fingerprint
// attributes must not be recomputed.
struct CachedResponse {
    transaction_id: [u8; 12],
    bytes: Vec<u8>,
    expires: u64,
}

/// One relay allocation.
///
/// Owns the relay UDP socket and the forwarding state attached to it:
/// the permission set and the channel bindings in both directions.
pub struct Allocation {
    pub username: String,
    pub transaction_id: [u8; 12],
    pub relay_addr: SocketAddr,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) pump: AbortHandle,
    // peer IP -> expiry tick
    pub(crate) permissions: HashMap<IpAddr, u64>,
    // peer IP -> channel number, and channel number -> (peer, expiry)
    pub(crate) channel_by_peer: HashMap<IpAddr, u16>,
    pub(crate) peer_by_channel: HashMap<u16, (SocketAddr, u64)>,
    pub(crate) expires: u64,
}

/// The allocation table and everything expiring around it.
pub struct Allocations<T> {
    sessions: RwLock<Table<FiveTuple, SessionNonce>>,
    pub(crate) table: RwLock<Table<FiveTuple, Allocation>>,
    responses: RwLock<Table<FiveTuple, CachedResponse>>,
    ports: Mutex<PortAllocator>,
    timer: Timer,
    handler: T,
}

impl<T> Allocations<T>
where
    T: ServiceHandler + 'static,
{
    pub fn new(port_range: PortRange, handler: T) -> Arc<Self> {
        let this = Arc::new(Self {
            ports: Mutex::new(PortAllocator::new(port_range)),
            sessions: RwLock::new(Table::default()),
            responses: RwLock::new(Table::default()),
            table: RwLock::new(Table::default()),
            timer: Timer::default(),
            handler,
        });

        // This is a background thread that silently handles expiring
        // allocations, permissions, channel bindings, nonces and cached
        // responses.
        let this_ = Arc::downgrade(&this);
        thread::spawn(move || {
            let mut expired = Vec::with_capacity(255);

            while let Some(this) = this_.upgrade() {
                // The timer advances one second and gets the current time
                // offset.
                let now = this.timer.add();

                {
                    this.sessions.write().retain(|_, v| v.expires > now);
                    this.responses.write().retain(|_, v| v.expires > now);
                }

                // Find and delete the allocations whose lifetime has
                // elapsed.
                {
                    this.table
                        .read()
                        .iter()
                        .filter(|(_, v)| v.expires <= now)
                        .for_each(|(k, _)| expired.push(*k));

                    if !expired.is_empty() {
                        this.remove(&expired);
                        expired.clear();
                    }
                }

                // Permissions and channel bindings carry their own
                // shorter lifetimes inside a living allocation.
                {
                    let mut table = this.table.write();
                    for allocation in table.values_mut() {
                        allocation.permissions.retain(|_, expires| *expires > now);
                        allocation
                            .peer_by_channel
                            .retain(|_, (_, expires)| *expires > now);

                        let peer_by_channel = &allocation.peer_by_channel;
                        allocation
                            .channel_by_peer
                            .retain(|_, number| peer_by_channel.contains_key(number));
                    }
                }

                sleep(Duration::from_secs(1));
            }
        });

        this
    }

    pub fn handler(&self) -> &T {
        &self.handler
    }

    /// The current tick of the internal timer.
    pub fn now(&self) -> u64 {
        self.timer.get()
    }

    /// The nonce currently challenged to this five-tuple, creating one
    /// if the five-tuple has not been seen yet.
    pub fn get_nonce(&self, id: &FiveTuple) -> String {
        {
            if let Some(it) = self.sessions.read().get(id) {
                return it.nonce.clone();
            }
        }

        let nonce = make_nonce();
        self.sessions.write().insert(
            *id,
            SessionNonce {
                nonce: nonce.clone(),
                expires: self.timer.get() + NONCE_LIFETIME,
            },
        );

        nonce
    }

    /// Whether the presented nonce is the one this five-tuple was
    /// challenged with. Anything else, including a nonce the sweeper
    /// has already forgotten, counts as stale.
    pub fn verify_nonce(&self, id: &FiveTuple, nonce: &str) -> bool {
        self.sessions
            .read()
            .get(id)
            .map(|it| it.nonce == nonce)
            .unwrap_or(false)
    }

    /// The stored response for a retransmitted transaction, if it is
    /// still in the replay window.
    pub fn cached_response(&self, id: &FiveTuple, transaction_id: &[u8]) -> Option<Vec<u8>> {
        let responses = self.responses.read();
        let cached = responses.get(id)?;

        (cached.transaction_id == transaction_id && cached.expires > self.timer.get())
            .then(|| cached.bytes.clone())
    }

    /// Remember the response sent for a transaction so that a
    /// retransmission gets the byte-identical answer.
    pub fn cache_response(&self, id: &FiveTuple, transaction_id: &[u8], bytes: &[u8]) {
        let Ok(transaction_id) = <[u8; 12]>::try_from(transaction_id) else {
            return;
        };

        self.responses.write().insert(
            *id,
            CachedResponse {
                bytes: bytes.to_vec(),
                expires: self.timer.get() + RESPONSE_LIFETIME,
                transaction_id,
            },
        );
    }

    /// The transaction id that created the allocation for this
    /// five-tuple.
    pub fn get_transaction_id(&self, id: &FiveTuple) -> Option<[u8; 12]> {
        self.table.read().get(id).map(|it| it.transaction_id)
    }

    /// Create an allocation: take a relay port, bind the relay socket
    /// next to the listening interface and start pumping peer traffic.
    ///
    /// An Allocate repeated with the transaction id that built the
    /// allocation is idempotent; any other transaction id on an
    /// occupied five-tuple is a mismatch, which the caller reports.
    pub async fn allocate(
        this: &Arc<Self>,
        id: &FiveTuple,
        username: &str,
        transaction_id: [u8; 12],
        listen: Arc<UdpSocket>,
        external_ip: IpAddr,
        lifetime: u32,
    ) -> Result<SocketAddr, ErrorType> {
        {
            if let Some(allocation) = this.table.read().get(id) {
                return if allocation.transaction_id == transaction_id {
                    Ok(allocation.relay_addr)
                } else {
                    Err(ErrorType::AllocationMismatch)
                };
            }
        }

        // The previous owner of a freed port can hold the OS socket
        // open for a moment, so a failed bind gets a few fresh tries.
        let mut bound = None;
        for _ in 0..5 {
            let Some(port) = this.ports.lock().alloc() else {
                break;
            };

            match UdpSocket::bind(SocketAddr::new(id.interface.ip(), port)).await {
                Ok(socket) => {
                    bound = Some((port, socket));
                    break;
                }
                Err(_) => {
                    this.ports.lock().restore(port);
                }
            }
        }

        let Some((port, socket)) = bound else {
            return Err(ErrorType::InsufficientCapacity);
        };

        let socket = Arc::new(socket);
        let relay_addr = SocketAddr::new(external_ip, port);
        let pump = relay::spawn(this, *id, socket.clone(), listen);

        this.table.write().insert(
            *id,
            Allocation {
                username: username.to_string(),
                expires: this.timer.get() + lifetime as u64,
                permissions: HashMap::with_capacity(8),
                channel_by_peer: HashMap::with_capacity(8),
                peer_by_channel: HashMap::with_capacity(8),
                transaction_id,
                relay_addr,
                socket,
                pump,
            },
        );

        this.handler.on_allocated(id, username, port);
        Ok(relay_addr)
    }

    /// Extend the allocation lifetime, or destroy it when the desired
    /// lifetime is zero.
    pub fn refresh(&self, id: &FiveTuple, lifetime: u32) -> bool {
        if lifetime == 0 {
            let username = self.table.read().get(id).map(|it| it.username.clone());
            let Some(username) = username else {
                return false;
            };

            self.handler.on_refresh(id, &username, 0);
            self.remove(&[*id]);
            true
        } else {
            let username = {
                let mut table = self.table.write();
                let Some(allocation) = table.get_mut(id) else {
                    return false;
                };

                allocation.expires = self.timer.get() + lifetime as u64;
                allocation.username.clone()
            };

            self.handler.on_refresh(id, &username, lifetime);
            true
        }
    }

    /// Install or refresh permissions for the peer addresses.
    pub fn create_permission(&self, id: &FiveTuple, peers: &[IpAddr]) -> bool {
        let expires = self.timer.get() + PERMISSION_LIFETIME;

        let username = {
            let mut table = self.table.write();
            let Some(allocation) = table.get_mut(id) else {
                return false;
            };

            for peer in peers {
                allocation.permissions.insert(*peer, expires);
            }

            allocation.username.clone()
        };

        self.handler.on_create_permission(id, &username, peers);
        true
    }

    /// Bind a channel number to a peer address, or refresh an existing
    /// binding.
    ///
    /// A channel number binds to exactly one peer address and a peer
    /// address to exactly one channel number within an allocation;
    /// breaking either rule is a bad request. A successful bind also
    /// installs a permission for the peer IP.
    pub fn bind_channel(
        &self,
        id: &FiveTuple,
        number: u16,
        peer: SocketAddr,
    ) -> Result<(), ErrorType> {
        let now = self.timer.get();

        let username = {
            let mut table = self.table.write();
            let Some(allocation) = table.get_mut(id) else {
                return Err(ErrorType::AllocationMismatch);
            };

            if let Some((bound, _)) = allocation.peer_by_channel.get(&number) {
                if *bound != peer {
                    return Err(ErrorType::BadRequest);
                }
            }

            if let Some(bound) = allocation.channel_by_peer.get(&peer.ip()) {
                if *bound != number {
                    return Err(ErrorType::BadRequest);
                }
            }

            allocation
                .peer_by_channel
                .insert(number, (peer, now + CHANNEL_LIFETIME));
            allocation.channel_by_peer.insert(peer.ip(), number);
            allocation
                .permissions
                .insert(peer.ip(), now + PERMISSION_LIFETIME);

            allocation.username.clone()
        };

        self.handler.on_channel_bind(id, &username, number);
        Ok(())
    }

    // Tear the allocations down: close the relay socket by dropping it,
    // stop the pump task, release the port and notify the handler.
    fn remove(&self, ids: &[FiveTuple]) {
        let mut removed = Vec::with_capacity(ids.len());

        {
            let mut table = self.table.write();
            let mut ports = self.ports.lock();

            for id in ids {
                if let Some(allocation) = table.remove(id) {
                    allocation.pump.abort();
                    ports.restore(allocation.relay_addr.port());
                    removed.push((*id, allocation.username));
                }
            }
        }

        for (id, username) in removed {
            self.handler.on_destroy(&id, &username);
        }
    }
}

// A random nonce of 16 hex characters.
fn make_nonce() -> String {
    format!("{:016x}", rand::rng().random::<u64>())
}
