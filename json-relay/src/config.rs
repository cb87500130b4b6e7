use std::net::{Ipv4Addr, SocketAddr};

use crate::cli::ServeArgs;

pub const DEFAULT_PORT: u16 = 3000;
/// Largest accepted message or frame, in bytes (100 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address the listener binds. Port `0` picks an ephemeral port.
    pub listen: SocketAddr,
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&ServeArgs> for RelayConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            listen: SocketAddr::new(args.host, args.port),
            max_message_size: args.max_message_size,
        }
    }
}
