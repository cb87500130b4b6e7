use std::{io, net::SocketAddr};

use thiserror::Error;

/// Listener-level failures. Everything below the listener is recovered per connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay listener on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to read relay listener address")]
    LocalAddr(#[source] io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
