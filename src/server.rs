use std::sync::Arc;

use anyhow::Result;
use service::{Service, routing::RouteResult};
use tokio::net::UdpSocket;

use crate::{config::Config, observer::Observer};

/// Bind one UDP socket per configured interface and spawn its receive
/// loop. Each loop owns a router; datagrams are handled to completion
/// in arrival order, so responses to one five-tuple are never
/// reordered.
pub async fn start(config: &Config, service: &Service<Observer>) -> Result<()> {
    for interface in config.turn.interfaces.iter().copied() {
        let socket = Arc::new(UdpSocket::bind(interface.listen).await?);
        let mut router = service.make_router(interface.external, interface.listen, socket.clone());

        tokio::spawn(async move {
            let mut buf = vec![0u8; interface.mtu];

            loop {
                let (size, source) = match socket.recv_from(&mut buf).await {
                    Ok(it) => it,
                    Err(e) => {
                        log::error!("listener died: listen={}, error={}", interface.listen, e);
                        break;
                    }
                };

                match router.route(&buf[..size], source).await {
                    RouteResult::Response(response) => {
                        if response.is_error() {
                            log::info!(
                                "error response: source={}, method={:?}",
                                source,
                                response.method()
                            );
                        }

                        if let Err(e) = socket.send_to(response.payload(), source).await {
                            log::error!("failed to send response: source={}, error={}", source, e);
                        }
                    }
                    RouteResult::Exceptional(e) => {
                        log::debug!("dropped datagram: source={}, error={:?}", source, e);
                    }
                    RouteResult::None => {}
                }
            }
        });

        log::info!(
            "turn server listening: listen={}, external={}",
            interface.listen,
            interface.external
        );
    }

    Ok(())
}
