use std::{collections::HashMap, fs::read_to_string, net::SocketAddr, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use service::allocation::ports::PortRange;

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub struct Interface {
    ///
    /// The address and port the UDP socket is bound to.
    ///
    pub listen: SocketAddr,
    ///
    /// external address
    ///
    /// specify the node external address and port.
    /// for the case of exposing the service to the outside,
    /// you need to manually specify the server external IP
    /// address and service listening port.
    ///
    pub external: SocketAddr,
    ///
    /// Maximum Transmission Unit (MTU) size for network packets.
    ///
    #[serde(default = "Interface::mtu")]
    pub mtu: usize,
}

impl Interface {
    fn mtu() -> usize {
        1500
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Turn {
    ///
    /// turn server realm
    ///
    /// specify the domain where the server is located.
    /// for a single node, this configuration is fixed,
    /// but each node can be configured as a different domain.
    /// this is a good idea to divide the nodes by namespace.
    ///
    #[serde(default = "Turn::realm")]
    pub realm: String,
    ///
    /// turn server listen interfaces
    ///
    /// The address and port to which the UDP Server is bound. Multiple
    /// addresses can be bound at the same time.
    ///
    #[serde(default)]
    pub interfaces: Vec<Interface>,
    ///
    /// Forces the XOR-MAPPED-ADDRESS value in responses instead of the
    /// observed source address of each request.
    ///
    #[serde(default)]
    pub mapped_address: Option<SocketAddr>,
}

impl Turn {
    fn realm() -> String {
        "localhost".to_string()
    }
}

impl Default for Turn {
    fn default() -> Self {
        Self {
            realm: Self::realm(),
            interfaces: Default::default(),
            mapped_address: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Runtime {
    ///
    /// Port range for relay allocations, both ends inclusive.
    ///
    #[serde(default)]
    pub port_range: PortRange,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mechanism {
    ShortTerm,
    #[default]
    LongTerm,
    TimeLimited,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// The credential mechanism clients are authenticated with.
    ///
    #[serde(default)]
    pub mechanism: Mechanism,
    ///
    /// static user password
    ///
    /// This option can be used to specify the static identity
    /// authentication information used by the turn server for
    /// verification. Used by the short-term and long-term mechanisms.
    ///
    #[serde(default)]
    pub static_credentials: HashMap<String, String>,
    ///
    /// Static authentication key value (string) for the time-limited
    /// mechanism. Ephemeral usernames of the form
    /// `<unix-expiry>:<user>` are accepted with passwords derived from
    /// this secret.
    ///
    #[serde(default)]
    pub static_auth_secret: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => return Err(format!("unknown log level: {value}")),
        })
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Log {
    ///
    /// log level
    ///
    /// An enum representing the available verbosity levels of the logger.
    ///
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub turn: Turn,
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub log: Log,
}

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    ///
    /// Specify the configuration file path
    ///
    /// Example: relay-server --config /etc/relay-server/config.json5
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from config file and command line parameters.
    ///
    /// Load command line parameters, if the configuration file path is
    /// specified, the configuration is read from the configuration file,
    /// otherwise the default configuration is used.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => serde_json5::from_str(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }
}
