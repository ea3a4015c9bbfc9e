use std::net::IpAddr;

use service::{ServiceHandler, allocation::FiveTuple};

/// Logs allocation lifecycle events.
#[derive(Default, Clone)]
pub struct Observer;

impl ServiceHandler for Observer {
    fn on_allocated(&self, id: &FiveTuple, username: &str, port: u16) {
        log::info!(
            "allocated: client={}, interface={}, username={:?}, port={}",
            id.client,
            id.interface,
            username,
            port
        );
    }

    fn on_create_permission(&self, id: &FiveTuple, username: &str, peers: &[IpAddr]) {
        log::info!(
            "create permission: client={}, username={:?}, peers={:?}",
            id.client,
            username,
            peers
        );
    }

    fn on_channel_bind(&self, id: &FiveTuple, username: &str, channel: u16) {
        log::info!(
            "channel bind: client={}, username={:?}, channel=0x{:04x}",
            id.client,
            username,
            channel
        );
    }

    fn on_refresh(&self, id: &FiveTuple, username: &str, lifetime: u32) {
        log::info!(
            "refresh: client={}, username={:?}, lifetime={}",
            id.client,
            username,
            lifetime
        );
    }

    fn on_destroy(&self, id: &FiveTuple, username: &str) {
        log::info!("destroyed: client={}, username={:?}", id.client, username);
    }
}
