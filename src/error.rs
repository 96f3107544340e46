//! Main crate error

use std::net::SocketAddr;
use std::time::Duration;

use crate::common::{Contact, Kuid, RequestKind};

#[derive(thiserror::Error, Debug)]
/// Mojito crate error enum.
pub enum Error {
    /// No response arrived within the request timeout.
    #[error(transparent)]
    Timeout(#[from] RequestTimeout),

    /// Another live node answered for the local node's id.
    #[error("Collision with {0}")]
    Collision(Contact),

    /// A `FIND_NODE` lookup completed without finding any contact.
    #[error("No such node: {0}")]
    NoSuchNode(Kuid),

    /// A `FIND_VALUE` lookup completed without finding any value.
    #[error("No such value: {0}")]
    NoSuchValue(Kuid),

    #[error("Message dispatcher is not bound to a transport")]
    NotBound,

    #[error("Message dispatcher is already bound to a transport")]
    AlreadyBound,

    #[error("Message dispatcher is closed")]
    Closed,

    /// The operation was cancelled before it resolved.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A callback of the owning operation panicked.
    #[error("Uncaught error in operation callback: {0}")]
    Uncaught(String),

    /// The actor thread is gone.
    #[error("Dht was shutdown")]
    Shutdown,

    #[error("Invalid KUID size, expected 20, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid KUID encoding: {0}")]
    InvalidKuid(String),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse packet bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),
}

/// A request that was not answered in time.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{request} request to {address} timed out after {elapsed:?}")]
pub struct RequestTimeout {
    /// Id of the contact the request was sent to, `None` for anonymous pings.
    pub contact_id: Option<Kuid>,
    pub address: SocketAddr,
    pub request: RequestKind,
    pub elapsed: Duration,
}

/// Alias for `Result<T, mojito::Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
