//! WebSocket relay that rebroadcasts JSON messages on a local network.
//!
//! Clients hold a WebSocket open to the relay and send text frames. Every frame
//! that parses as JSON is forwarded, byte for byte, to every other connected
//! client. Nothing is stored, acknowledged, or routed beyond "everyone except
//! the sender". Each module focuses on a concrete responsibility:
//!
//! - [`relay`] owns the accept loop and each connection's lifecycle: register,
//!   read frames, deregister on close or error.
//! - [`registry`] is the shared set of live connections; broadcasts iterate a
//!   snapshot of it.
//! - [`validator`] decides whether a payload is JSON worth relaying.
//! - [`broadcast`] fans one payload out to every other open connection.
//! - [`connection`] is the per-client handle: id, ready state, outbound queue.
//! - [`cli`], [`config`] and [`client`] cover the binary: argument parsing, the
//!   relay configuration, and a small stdin/stdout client for trying it by hand.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod relay;
pub mod validator;

pub use config::RelayConfig;
pub use error::{RelayError, RelayResult};
pub use relay::Relay;
