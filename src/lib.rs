pub mod config;
pub mod observer;
pub mod server;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use service::{Service, ServiceOptions, auth::Credentials};

use self::{
    config::{Config, Mechanism},
    observer::Observer,
};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "relay-server.",
    env!("CARGO_PKG_VERSION")
);

/// In order to let the integration test directly use this crate and
/// start the server, a function is opened to replace the main function
/// to directly start the server.
pub async fn startup(config: Arc<Config>) -> Result<()> {
    let credentials = match config.auth.mechanism {
        Mechanism::ShortTerm => Credentials::short_term(&config.auth.static_credentials)?,
        Mechanism::LongTerm => {
            Credentials::long_term(&config.turn.realm, &config.auth.static_credentials)?
        }
        Mechanism::TimeLimited => Credentials::time_limited(
            config
                .auth
                .static_auth_secret
                .clone()
                .ok_or_else(|| anyhow!("the time-limited mechanism needs static-auth-secret"))?,
        ),
    };

    let service = Service::new(ServiceOptions {
        software: SOFTWARE.to_string(),
        realm: config.turn.realm.clone(),
        mapped_address: config.turn.mapped_address,
        port_range: config.runtime.port_range,
        handler: Observer,
        credentials,
    });

    server::start(&config, &service).await?;

    // The turn server is non-blocking after it runs and needs to be
    // kept from exiting immediately.
    std::future::pending::<()>().await;
    Ok(())
}
