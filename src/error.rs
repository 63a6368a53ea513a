use std::io;
use thiserror::Error;

// every error here is terminal for exactly one session

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("handshake shorter than expected: {0} bytes")]
    Truncated(usize),

    #[error("user id mismatch")]
    UserIdMismatch,

    #[error("unknown command: {0}")]
    UnknownCommand(u8),

    #[error("unknown address type: {0}")]
    UnknownAddressType(u8),

    #[error("empty hostname")]
    EmptyHostname,

    #[error("hostname is not valid utf-8")]
    InvalidHostname,

    #[error("invalid early data: {0}")]
    EarlyData(String),
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("target {0} is blocked")]
    BlockedHost(String),

    #[error("UDP is only supported for DNS on port 53, got port {0}")]
    UdpUnsupported(u16),
}

#[derive(Debug, Error)]
#[error("{strategy} connection to {host}:{port} failed: {source}")]
pub struct ConnectError {
    pub strategy: &'static str,
    pub host: String,
    pub port: u16,
    #[source]
    pub source: io::Error,
}

impl ConnectError {
    pub fn new(strategy: &'static str, host: &str, port: u16, source: io::Error) -> Self {
        Self {
            strategy,
            host: host.to_string(),
            port,
            source,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StreamError(#[from] pub io::Error);

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),
}

pub type Result<T> = std::result::Result<T, TunnelError>;
