//! The relay data plane.
//!
//! Every allocation owns one UDP socket. Traffic from the client to a
//! peer leaves through that socket (Send indications and channel
//! data), and traffic from a peer comes back in on it, gets rewrapped
//! and is written to the client through the server's listening socket.
//!
//! A permission for the peer IP gates both directions; datagrams
//! without one are dropped and never bounced back.

use crate::{
    ServiceHandler,
    allocation::{Allocations, FiveTuple},
};

use std::{net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use codec::{
    channel_data::ChannelData,
    message::{
        MessageEncoder,
        attributes::{Data, XorPeerAddress},
        methods::DATA_INDICATION,
    },
};
use rand::Rng;
use tokio::{net::UdpSocket, task::AbortHandle};

// Start the pump task reading the relay socket of one allocation.
//
// The task holds only a weak handle to the allocation table, the table
// owns the task and not the other way around. It dies with the socket
// when the allocation is removed.
pub(crate) fn spawn<T>(
    allocations: &Arc<Allocations<T>>,
    id: FiveTuple,
    socket: Arc<UdpSocket>,
    listen: Arc<UdpSocket>,
) -> AbortHandle
where
    T: ServiceHandler + 'static,
{
    let weak = Arc::downgrade(allocations);
    tokio::spawn(async move {
        let mut buf = vec![0u8; 2048];
        let mut bytes = BytesMut::with_capacity(2048);

        loop {
            let (size, peer) = match socket.recv_from(&mut buf).await {
                Ok(it) => it,
                Err(_) => break,
            };

            let Some(allocations) = weak.upgrade() else {
                break;
            };

            if allocations
                .wrap_peer_data(&id, peer, &buf[..size], &mut bytes)
                .is_some()
            {
                if let Err(e) = listen.try_send_to(&bytes, id.client) {
                    log::warn!(
                        "failed to forward peer data: client={}, error={}",
                        id.client,
                        e
                    );
                }
            }
        }
    })
    .abort_handle()
}

impl<T> Allocations<T>
where
    T: ServiceHandler + 'static,
{
    /// Rewrap a datagram received from a peer for delivery to the
    /// client: a channel frame when the peer IP has a channel bound,
    /// otherwise a Data indication carrying XOR-PEER-ADDRESS and DATA.
    ///
    /// Returns None when the allocation is gone or the peer has no
    /// permission, in which case the datagram is dropped.
    pub fn wrap_peer_data(
        &self,
        id: &FiveTuple,
        peer: SocketAddr,
        data: &[u8],
        bytes: &mut BytesMut,
    ) -> Option<()> {
        let channel = {
            let table = self.table.read();
            let allocation = table.get(id)?;

            if !allocation.permissions.contains_key(&peer.ip()) {
                log::warn!("no permission for {}: dropping datagram", peer.ip());
                return None;
            }

            allocation.channel_by_peer.get(&peer.ip()).copied()
        };

        match channel {
            Some(number) => {
                ChannelData {
                    bytes: data,
                    number,
                }
                .encode(bytes);
            }
            None => {
                // Indications start their own transactions; the id is
                // opaque to the receiver.
                let token: [u8; 12] = rand::rng().random();
                let mut message = MessageEncoder::new(DATA_INDICATION, &token, bytes);
                message.append::<XorPeerAddress>(peer);
                message.append::<Data>(data);
                message.flush(None).ok()?;
            }
        }

        Some(())
    }

    /// Forward a Send indication payload to the peer, if a permission
    /// for its IP is installed. Without one the data is dropped
    /// silently; indications are never answered with errors.
    pub fn send_to_peer(&self, id: &FiveTuple, peer: SocketAddr, data: &[u8]) {
        let table = self.table.read();
        let Some(allocation) = table.get(id) else {
            return;
        };

        if !allocation.permissions.contains_key(&peer.ip()) {
            log::warn!("no permission for {}: dropping send request", peer.ip());
            return;
        }

        if let Err(e) = allocation.socket.try_send_to(data, peer) {
            log::warn!("failed to relay to peer: peer={}, error={}", peer, e);
        }
    }

    /// Forward channel data to the peer the channel is bound to. An
    /// unbound channel number means the frame is silently discarded.
    pub fn send_channel(&self, id: &FiveTuple, number: u16, data: &[u8]) {
        let peer = {
            let table = self.table.read();
            table
                .get(id)
                .and_then(|it| it.peer_by_channel.get(&number))
                .map(|(peer, _)| *peer)
        };

        if let Some(peer) = peer {
            self.send_to_peer(id, peer, data);
        }
    }
}
