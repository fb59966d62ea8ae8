// Error types for the hub, its storage, and the client side.
//
// `ProtocolError` is the per-connection fault: any one raised while handling
// a packet disconnects exactly that peer. The others surface to whoever
// started the hub or the client.

use std::io;

use tandem_protocol::DecodeError;
use thiserror::Error;

/// A peer sent something the hub cannot accept.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("username not set")]
    MissingUsername,
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),
    #[error("username {0} is already connected")]
    UsernameTaken(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("corrupt save data: {0}")]
    Corrupt(#[from] DecodeError),
}

/// Failures starting or configuring the hub.
#[derive(Debug, Error)]
pub enum HubError {
    #[error("network error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid settings: {0}")]
    Config(#[from] toml::de::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("disconnected by server: {0}")]
    Disconnected(String),
}
