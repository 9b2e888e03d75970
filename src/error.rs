//! Error handling for the mock API server.
//!
//! Configuration mistakes (an unsupported method, a bad bind address) are
//! reported to whoever issued the call. Lifecycle failures such as a taken
//! port are fatal for the test run. Requests that match no rule are not
//! errors at all: they receive a `404` from the router.
//!
//! # Bridge replies
//!
//! When a command fails on the command channel the error is reported as a
//! single reply line:
//! ```json
//! {
//!   "ok": false,
//!   "error": "Unsupported method: PUT (only GET, POST and DELETE are supported)"
//! }
//! ```

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid bind address '{address}': {source}")]
    InvalidBindAddress {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported method: {0} (only GET, POST and DELETE are supported)")]
    UnsupportedMethod(String),
    #[error("Port already in use: {addr}")]
    PortInUse {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Mock API server is already running on {addr}")]
    AlreadyRunning { addr: SocketAddr },
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid command: {0}")]
    Command(String),
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),
}

impl Error {
    /// Classify a failed `bind` so that a taken port gets its own variant
    pub(crate) fn from_bind(addr: SocketAddr, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::AddrInUse {
            Error::PortInUse { addr, source }
        } else {
            Error::Bind { addr, source }
        }
    }
}
