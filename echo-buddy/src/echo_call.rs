use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use clap::Args;
use thiserror::Error;

use crate::model::EchoOutcome;
use crate::probe_config::ProbeConfig;

pub use self::caller::{PingCaller, SystemPing};

mod caller;
mod reply;

#[derive(Args, Debug, Clone)]
#[group(id = "echo")]
pub struct Params {
    /// Path to (or name of) the system ping binary that does the actual probing
    #[arg(long, value_name = "PATH", default_value = "ping", env = "PING_PATH")]
    ping_path: PathBuf,
}

impl Params {
    pub fn to_opener(&self) -> SystemPing {
        SystemPing::new(self.ping_path.clone())
    }
}

/// One echo request as handed to an [EchoTransport].
#[derive(Debug)]
pub struct EchoRequest<'a> {
    pub payload: &'a [u8],
    pub timeout: Duration,
    pub ttl: u16,
}

/// An open channel to the configured target that can exchange echo requests and replies.
///
/// Implementations never fail as a whole once opened, every problem with a single
/// exchange is expressed as an [EchoOutcome]. Dropping the transport releases it.
#[async_trait]
pub trait EchoTransport: Send {
    async fn send_echo(&mut self, request: EchoRequest<'_>) -> EchoOutcome;
}

/// Creates [EchoTransport]s. Failure here is fatal for a probe run.
#[async_trait]
pub trait OpenTransport: Send + Sync {
    type Transport: EchoTransport;

    async fn open(&self, config: &ProbeConfig) -> Result<Self::Transport, TransportError>;
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ping binary `{path}` cannot be started")]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ping binary `{path}` is not usable: {reason}")]
    Unusable { path: PathBuf, reason: String },

    #[error("failed to resolve target `{target}`")]
    Unresolvable {
        target: String,
        source: std::io::Error,
    },

    #[error("target `{0}` did not resolve to any address")]
    NoAddress(String),
}
