use std::{fs::read_to_string, net::SocketAddr, str::FromStr};

use anyhow::Result;
use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Transport {
    ///
    /// The address and port the node's UDP socket binds to.
    ///
    #[serde(default = "Transport::bind")]
    pub bind: SocketAddr,
    ///
    /// external address
    ///
    /// For a node exposed behind its own NAT or on a multi-homed host,
    /// the address remote peers should use. Offered as the relayed
    /// address in allocate responses. Defaults to the bound address.
    ///
    #[serde(default)]
    pub external: Option<SocketAddr>,
    ///
    /// Seconds between heartbeat rounds over the tracked connections.
    ///
    #[serde(default = "Transport::ping_interval")]
    pub ping_interval: u64,
}

impl Transport {
    fn bind() -> SocketAddr {
        "0.0.0.0:3478".parse().unwrap()
    }

    fn ping_interval() -> u64 {
        14
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            bind: Self::bind(),
            external: None,
            ping_interval: Self::ping_interval(),
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct Auth {
    ///
    /// The deployment's shared signing secret.
    ///
    /// Location records are signed and verified with this key. Without
    /// one the node generates a throwaway key at startup, which means
    /// records survive only as long as the process.
    ///
    #[serde(default)]
    pub secret: Option<String>,
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
    pub transport: Transport,
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
    /// Example: dim-node --config /etc/dim-node/config.json
    ///
    #[arg(long, short)]
    config: Option<String>,
}

impl Config {
    ///
    /// Load configure from command line parameters: if a configuration
    /// file path is specified the configuration is read from it,
    /// otherwise the defaults apply.
    ///
    pub fn load() -> Result<Self> {
        Ok(match Cli::parse().config {
            Some(path) => serde_json5::from_str(&read_to_string(path)?)?,
            None => Self::default(),
        })
    }
}
